//! Codec - Wire packing/unpacking shared across the data path.
//!
//! All packet fields live at documented bit ranges inside 64-bit beats
//! or fixed-width packed words; this module holds the shift/mask
//! helpers, the UDP metadata tuple, the order-book response and
//! order-entry operation wire structs, and the IPv4 header checksum.

/// Extract bits `[hi:lo]` (inclusive, LSB-numbered) from a 64-bit beat.
#[inline]
pub const fn bits(word: u64, hi: u32, lo: u32) -> u64 {
    debug_assert!(hi >= lo && hi < 64);
    let width = hi - lo + 1;
    if width == 64 {
        word
    } else {
        (word >> lo) & ((1u64 << width) - 1)
    }
}

/// Write `value` into bits `[hi:lo]` of `word`, returning the new word.
#[inline]
pub const fn set_bits(word: u64, hi: u32, lo: u32, value: u64) -> u64 {
    debug_assert!(hi >= lo && hi < 64);
    let width = hi - lo + 1;
    let mask = if width == 64 { u64::MAX } else { ((1u64 << width) - 1) << lo };
    (word & !mask) | ((value << lo) & mask)
}

/// Reverse the byte order of a 32-bit address (host <-> network order).
#[inline]
pub const fn reverse_u32(v: u32) -> u32 {
    v.swap_bytes()
}

/// Reverse the byte order of a 48-bit MAC address held in the low six
/// bytes of a u64.
#[inline]
pub const fn reverse_u48(v: u64) -> u64 {
    (v & 0xffff_ffff_ffff).swap_bytes() >> 16
}

/// Ones-complement sum with end-around carry over 16-bit words, as used
/// by the IPv4 header checksum. `header` is the raw header bytes; an
/// odd trailing byte is padded with zero.
pub fn ipv4_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = header.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(u16::from_be_bytes([*last, 0]));
    }
    // fold the carries back in
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

// ============================================================================
// Stream word
// ============================================================================

/// One 64-bit beat of a framed stream.
///
/// `keep` flags the valid bytes of `data`; `last` marks the final beat
/// of a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Word {
    pub data: u64,
    pub keep: u8,
    pub last: bool,
}

impl Word {
    #[inline]
    pub const fn new(data: u64, keep: u8, last: bool) -> Self {
        Self { data, keep, last }
    }

    /// Full-width beat in the middle of a frame.
    #[inline]
    pub const fn body(data: u64) -> Self {
        Self { data, keep: 0xff, last: false }
    }

    /// Full-width beat terminating a frame.
    #[inline]
    pub const fn tail(data: u64) -> Self {
        Self { data, keep: 0xff, last: true }
    }
}

// ============================================================================
// UDP metadata tuple
// ============================================================================

/// Source tuple attached to each ingress UDP frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UdpMeta {
    pub src_address: u32,
    pub src_port: u16,
}

impl UdpMeta {
    /// Pack into one beat: address in [31:0], port in [47:32].
    #[inline]
    pub fn pack(&self) -> Word {
        let mut data = 0u64;
        data = set_bits(data, 31, 0, u64::from(self.src_address));
        data = set_bits(data, 47, 32, u64::from(self.src_port));
        Word::tail(data)
    }

    #[inline]
    pub fn unpack(word: &Word) -> Self {
        Self {
            src_address: bits(word.data, 31, 0) as u32,
            src_port: bits(word.data, 47, 32) as u16,
        }
    }
}

// ============================================================================
// Order-book response
// ============================================================================

/// Book depth carried on the response wire.
pub const LEVELS: usize = 5;

/// Top-of-book delta published to the pricing engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OrderBookResponse {
    pub symbol_index: u8,
    pub timestamp: u64,
    /// Best bid/ask prices; additional levels carried in the quantity
    /// arrays only, like the original wire format.
    pub bid_price: u32,
    pub ask_price: u32,
    pub bid_quantity: [u32; LEVELS],
    pub ask_quantity: [u32; LEVELS],
}

/// Packed order-book response: four 64-bit beats.
///
/// | Beat | Bits   | Field            |
/// |------|--------|------------------|
/// | 0    | 7:0    | symbol index     |
/// | 0    | 63:8   | timestamp (56b)  |
/// | 1    | 31:0   | best bid price   |
/// | 1    | 63:32  | best ask price   |
/// | 2    | 63:0   | bid qty L0,L1    |
/// | 3    | 63:0   | ask qty L0,L1    |
/// | 4    | 63:0   | bid qty L2,L3    |
/// | 5    | 63:0   | ask qty L2,L3    |
/// | 6    | 31:0   | bid qty L4       |
/// | 6    | 63:32  | ask qty L4       |
pub const RESPONSE_BEATS: usize = 7;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OrderBookResponsePack {
    pub beats: [u64; RESPONSE_BEATS],
}

impl OrderBookResponse {
    pub fn pack(&self) -> OrderBookResponsePack {
        let mut b = [0u64; RESPONSE_BEATS];
        b[0] = set_bits(b[0], 7, 0, u64::from(self.symbol_index));
        b[0] = set_bits(b[0], 63, 8, self.timestamp & 0x00ff_ffff_ffff_ffff);
        b[1] = set_bits(b[1], 31, 0, u64::from(self.bid_price));
        b[1] = set_bits(b[1], 63, 32, u64::from(self.ask_price));
        b[2] = u64::from(self.bid_quantity[0]) | (u64::from(self.bid_quantity[1]) << 32);
        b[3] = u64::from(self.ask_quantity[0]) | (u64::from(self.ask_quantity[1]) << 32);
        b[4] = u64::from(self.bid_quantity[2]) | (u64::from(self.bid_quantity[3]) << 32);
        b[5] = u64::from(self.ask_quantity[2]) | (u64::from(self.ask_quantity[3]) << 32);
        b[6] = u64::from(self.bid_quantity[4]) | (u64::from(self.ask_quantity[4]) << 32);
        OrderBookResponsePack { beats: b }
    }

    pub fn unpack(pack: &OrderBookResponsePack) -> Self {
        let b = &pack.beats;
        let mut bid_quantity = [0u32; LEVELS];
        let mut ask_quantity = [0u32; LEVELS];
        bid_quantity[0] = bits(b[2], 31, 0) as u32;
        bid_quantity[1] = bits(b[2], 63, 32) as u32;
        ask_quantity[0] = bits(b[3], 31, 0) as u32;
        ask_quantity[1] = bits(b[3], 63, 32) as u32;
        bid_quantity[2] = bits(b[4], 31, 0) as u32;
        bid_quantity[3] = bits(b[4], 63, 32) as u32;
        ask_quantity[2] = bits(b[5], 31, 0) as u32;
        ask_quantity[3] = bits(b[5], 63, 32) as u32;
        bid_quantity[4] = bits(b[6], 31, 0) as u32;
        ask_quantity[4] = bits(b[6], 63, 32) as u32;
        Self {
            symbol_index: bits(b[0], 7, 0) as u8,
            timestamp: bits(b[0], 63, 8),
            bid_price: bits(b[1], 31, 0) as u32,
            ask_price: bits(b[1], 63, 32) as u32,
            bid_quantity,
            ask_quantity,
        }
    }
}

// ============================================================================
// Order-entry operation
// ============================================================================

/// Operation opcode on the order-entry wire.
pub const ORDERENTRY_ADD: u8 = 1;

/// Order direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    #[default]
    Bid = 0,
    Ask = 1,
}

/// One order-entry operation emitted by the pricing engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OrderEntryOperation {
    pub timestamp: u64,
    pub op_code: u8,
    pub symbol_index: u8,
    pub order_id: u32,
    pub quantity: u32,
    pub price: u32,
    pub direction: Direction,
}

/// Packed order-entry operation: three 64-bit beats.
///
/// | Beat | Bits  | Field           |
/// |------|-------|-----------------|
/// | 0    | 7:0   | opcode          |
/// | 0    | 15:8  | symbol index    |
/// | 0    | 16    | direction       |
/// | 0    | 48:17 | order id        |
/// | 1    | 31:0  | quantity        |
/// | 1    | 63:32 | price           |
/// | 2    | 55:0  | timestamp       |
pub const OPERATION_BEATS: usize = 3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OrderEntryOperationPack {
    pub beats: [u64; OPERATION_BEATS],
}

impl OrderEntryOperation {
    pub fn pack(&self) -> OrderEntryOperationPack {
        let mut b = [0u64; OPERATION_BEATS];
        b[0] = set_bits(b[0], 7, 0, u64::from(self.op_code));
        b[0] = set_bits(b[0], 15, 8, u64::from(self.symbol_index));
        b[0] = set_bits(b[0], 16, 16, self.direction as u64);
        b[0] = set_bits(b[0], 48, 17, u64::from(self.order_id));
        b[1] = set_bits(b[1], 31, 0, u64::from(self.quantity));
        b[1] = set_bits(b[1], 63, 32, u64::from(self.price));
        b[2] = set_bits(b[2], 55, 0, self.timestamp & 0x00ff_ffff_ffff_ffff);
        OrderEntryOperationPack { beats: b }
    }

    pub fn unpack(pack: &OrderEntryOperationPack) -> Self {
        let b = &pack.beats;
        Self {
            op_code: bits(b[0], 7, 0) as u8,
            symbol_index: bits(b[0], 15, 8) as u8,
            direction: if bits(b[0], 16, 16) == 0 { Direction::Bid } else { Direction::Ask },
            order_id: bits(b[0], 48, 17) as u32,
            quantity: bits(b[1], 31, 0) as u32,
            price: bits(b[1], 63, 32) as u32,
            timestamp: bits(b[2], 55, 0),
        }
    }
}
