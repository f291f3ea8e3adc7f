//! ARP resolution for the exchange-facing interface.
//!
//! Four cooperating stages, each advanced once per engine step:
//! - a packet receiver that decodes inbound six-beat ARP frames, learns
//!   sender mappings, and queues reply metadata for requests aimed at us
//! - a packet sender that serializes request and reply frames
//! - a 256-entry resolution table direct-indexed by the top byte of the
//!   network-order IP address, with a host maintenance interface
//! - a request timer that suppresses duplicate outstanding requests and
//!   expires unanswered ones
//!
//! Frames are 64-bit beats with network-order fields packed LSB-first,
//! so a 16-bit field holds its bytes swapped relative to host order
//! (opcode 1 reads as 0x0100).

use tracing::debug;

use crate::codec::{bits, reverse_u32, reverse_u48, set_bits, Word};
use crate::stream::Stream;

/// ARP opcodes as they appear in a little-endian read of the wire bytes.
pub const OPCODE_REQUEST: u16 = 0x0100;
pub const OPCODE_REPLY: u16 = 0x0200;

pub const BROADCAST_MAC: u64 = 0xffff_ffff_ffff;

/// Sweep passes an unanswered request survives before it is declared
/// lost. The sweep runs once per 100ms tick, so this is half a second.
pub const MAX_WAIT: u8 = 5;

const TABLE_BINS: usize = 256;

/// True for 224.0.0.0/4, with the address in network order read as a
/// little-endian u32 (first octet in bits 7..0).
#[inline]
pub fn is_multicast(addr: u32) -> bool {
    bits(u64::from(addr), 7, 4) == 0xE
}

/// One resolution table entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TableEntry {
    pub ip: u32,
    pub mac: u64,
    pub valid: bool,
}

impl TableEntry {
    pub fn new(ip: u32, mac: u64, valid: bool) -> Self {
        Self { ip, mac, valid }
    }
}

/// Result of a MAC lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LookupReply {
    pub mac: u64,
    pub hit: bool,
}

/// Fields captured from a received request, echoed back in the reply.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReplyMeta {
    pub src_mac: u64,
    pub eth_type: u16,
    pub hw_type: u16,
    pub proto_type: u16,
    pub hw_len: u8,
    pub proto_len: u8,
    pub hw_addr_src: u64,
    pub proto_addr_src: u32,
}

/// Host maintenance opcodes for the resolution table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum HostOp {
    Add = 1,
    Delete = 2,
    Find = 3,
}

/// Host-facing register block. Add/Find exchange addresses in host
/// order; the table stores network order.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostRegisters {
    pub entry: TableEntry,
    pub op_toggle: bool,
    pub opcode: u8,
    pub entry_bin: u8,
}

/// Stat counters, each fed by a single-bit flag stream.
#[derive(Clone, Copy, Debug, Default)]
pub struct ArpStats {
    pub requests_sent: u32,
    pub replies_sent: u32,
    pub requests_received: u32,
    pub replies_received: u32,
    pub requests_lost: u32,
}

// ============================================================================
// Packet receiver
// ============================================================================

#[derive(Default)]
struct PacketReceiver {
    word_count: u8,
    op_code: u16,
    proto_addr_dst: u32,
    meta: ReplyMeta,
}

impl PacketReceiver {
    fn step(&mut self, my_ip: u32, streams: &mut ArpStreams) {
        let Some(word) = streams.data_in.pop() else { return };
        match self.word_count {
            0 => {
                // beat 0: destination MAC in 47..0, first 16 bits of the
                // source MAC above it
                self.meta.src_mac = set_bits(self.meta.src_mac, 15, 0, bits(word.data, 63, 48));
            }
            1 => {
                self.meta.src_mac = set_bits(self.meta.src_mac, 47, 16, bits(word.data, 31, 0));
                self.meta.eth_type = bits(word.data, 47, 32) as u16;
                self.meta.hw_type = bits(word.data, 63, 48) as u16;
            }
            2 => {
                self.meta.proto_type = bits(word.data, 15, 0) as u16;
                self.meta.hw_len = bits(word.data, 23, 16) as u8;
                self.meta.proto_len = bits(word.data, 31, 24) as u8;
                self.op_code = bits(word.data, 47, 32) as u16;
                self.meta.hw_addr_src =
                    set_bits(self.meta.hw_addr_src, 15, 0, bits(word.data, 63, 48));
            }
            3 => {
                self.meta.hw_addr_src =
                    set_bits(self.meta.hw_addr_src, 47, 16, bits(word.data, 31, 0));
                self.meta.proto_addr_src = bits(word.data, 63, 32) as u32;
            }
            4 => {
                // beat 4: target MAC in 47..0, first 16 bits of the
                // target IP above it
                self.proto_addr_dst =
                    (self.proto_addr_dst & 0xffff_0000) | bits(word.data, 63, 48) as u32;
            }
            5 => {
                self.proto_addr_dst =
                    (self.proto_addr_dst & 0x0000_ffff) | ((bits(word.data, 15, 0) as u32) << 16);
            }
            _ => {}
        }
        self.word_count += 1;

        if word.last {
            let gratuitous = self.meta.proto_addr_src == self.proto_addr_dst;
            if self.proto_addr_dst == my_ip || gratuitous {
                // all-zero sources are address probes, never learned
                if self.meta.proto_addr_src != 0 {
                    let _ = streams.table_insert.push(TableEntry::new(
                        self.meta.proto_addr_src,
                        self.meta.hw_addr_src,
                        true,
                    ));
                    let _ = streams.reply_received.push(self.meta.proto_addr_src);
                }
                if self.op_code == OPCODE_REPLY {
                    let _ = streams.replies_recv_flag.push(());
                }
            }
            if self.op_code == OPCODE_REQUEST && self.proto_addr_dst == my_ip {
                let _ = streams.requests_recv_flag.push(());
                let _ = streams.reply_meta.push(self.meta);
            }
            self.word_count = 0;
        }
    }
}

// ============================================================================
// Packet sender
// ============================================================================

#[derive(Clone, Copy, PartialEq, Eq)]
enum SenderState {
    Idle,
    Reply,
    SendRequest,
}

struct PacketSender {
    state: SenderState,
    send_count: u16,
    reply_meta: ReplyMeta,
    request_ip: u32,
}

impl Default for PacketSender {
    fn default() -> Self {
        Self {
            state: SenderState::Idle,
            send_count: 0,
            reply_meta: ReplyMeta::default(),
            request_ip: 0,
        }
    }
}

impl PacketSender {
    fn step(&mut self, my_mac: u64, my_ip: u32, streams: &mut ArpStreams) {
        match self.state {
            SenderState::Idle => {
                self.send_count = 0;
                if let Some(meta) = streams.reply_meta.pop() {
                    self.reply_meta = meta;
                    let _ = streams.replies_sent_flag.push(());
                    self.state = SenderState::Reply;
                } else if let Some(ip) = streams.request_filtered.pop() {
                    self.request_ip = ip;
                    let _ = streams.requests_sent_flag.push(());
                    self.state = SenderState::SendRequest;
                }
            }
            SenderState::SendRequest => {
                let word = self.request_beat(my_mac, my_ip);
                let _ = streams.data_out.push(word);
                self.send_count += 1;
                if self.send_count == 6 {
                    self.state = SenderState::Idle;
                }
            }
            SenderState::Reply => {
                let word = self.reply_beat(my_mac, my_ip);
                let _ = streams.data_out.push(word);
                self.send_count += 1;
                if self.send_count == 6 {
                    self.state = SenderState::Idle;
                }
            }
        }
    }

    fn request_beat(&self, my_mac: u64, my_ip: u32) -> Word {
        match self.send_count {
            0 => {
                let mut d = set_bits(0, 47, 0, BROADCAST_MAC);
                d = set_bits(d, 63, 48, bits(my_mac, 15, 0));
                Word::body(d)
            }
            1 => {
                let mut d = set_bits(0, 31, 0, bits(my_mac, 47, 16));
                d = set_bits(d, 47, 32, 0x0608);
                d = set_bits(d, 63, 48, 0x0100);
                Word::body(d)
            }
            2 => {
                let mut d = set_bits(0, 15, 0, 0x0008);
                d = set_bits(d, 23, 16, 6);
                d = set_bits(d, 31, 24, 4);
                d = set_bits(d, 47, 32, u64::from(OPCODE_REQUEST));
                d = set_bits(d, 63, 48, bits(my_mac, 15, 0));
                Word::body(d)
            }
            3 => {
                let mut d = set_bits(0, 31, 0, bits(my_mac, 47, 16));
                d = set_bits(d, 63, 32, u64::from(my_ip));
                Word::body(d)
            }
            4 => {
                // sought-after MAC is zero
                let d = set_bits(0, 63, 48, bits(u64::from(self.request_ip), 15, 0));
                Word::body(d)
            }
            _ => {
                let d = set_bits(0, 15, 0, bits(u64::from(self.request_ip), 31, 16));
                Word::new(d, 0x03, true)
            }
        }
    }

    fn reply_beat(&self, my_mac: u64, my_ip: u32) -> Word {
        let m = &self.reply_meta;
        match self.send_count {
            0 => {
                let mut d = set_bits(0, 47, 0, m.src_mac);
                d = set_bits(d, 63, 48, bits(my_mac, 15, 0));
                Word::body(d)
            }
            1 => {
                let mut d = set_bits(0, 31, 0, bits(my_mac, 47, 16));
                d = set_bits(d, 47, 32, u64::from(m.eth_type));
                d = set_bits(d, 63, 48, u64::from(m.hw_type));
                Word::body(d)
            }
            2 => {
                let mut d = set_bits(0, 15, 0, u64::from(m.proto_type));
                d = set_bits(d, 23, 16, u64::from(m.hw_len));
                d = set_bits(d, 31, 24, u64::from(m.proto_len));
                d = set_bits(d, 47, 32, u64::from(OPCODE_REPLY));
                d = set_bits(d, 63, 48, bits(my_mac, 15, 0));
                Word::body(d)
            }
            3 => {
                let mut d = set_bits(0, 31, 0, bits(my_mac, 47, 16));
                d = set_bits(d, 63, 32, u64::from(my_ip));
                Word::body(d)
            }
            4 => {
                let mut d = set_bits(0, 47, 0, m.hw_addr_src);
                d = set_bits(d, 63, 48, bits(u64::from(m.proto_addr_src), 15, 0));
                Word::body(d)
            }
            _ => {
                let d = set_bits(0, 15, 0, bits(u64::from(m.proto_addr_src), 31, 16));
                Word::new(d, 0x03, true)
            }
        }
    }
}

// ============================================================================
// Resolution table
// ============================================================================

struct ResolutionTable {
    bins: Box<[TableEntry]>,
    toggle: bool,
}

impl Default for ResolutionTable {
    fn default() -> Self {
        Self {
            bins: vec![TableEntry::default(); TABLE_BINS].into_boxed_slice(),
            toggle: false,
        }
    }
}

impl ResolutionTable {
    #[inline]
    fn bin_of(ip: u32) -> usize {
        (ip >> 24) as usize
    }

    fn step(&mut self, host: &mut HostRegisters, streams: &mut ArpStreams) {
        if host.op_toggle != self.toggle {
            self.toggle = host.op_toggle;
            match host.opcode {
                o if o == HostOp::Add as u8 => {
                    let ip = reverse_u32(host.entry.ip);
                    let mac = reverse_u48(host.entry.mac);
                    self.bins[Self::bin_of(ip)] = TableEntry::new(ip, mac, host.entry.valid);
                }
                o if o == HostOp::Delete as u8 => {
                    self.bins[host.entry_bin as usize] = TableEntry::default();
                }
                o if o == HostOp::Find as u8 => {
                    let found = self.bins[host.entry_bin as usize];
                    host.entry = TableEntry::new(
                        reverse_u32(found.ip),
                        reverse_u48(found.mac),
                        found.valid,
                    );
                }
                _ => {}
            }
        } else if let Some(entry) = streams.table_insert.pop() {
            self.bins[Self::bin_of(entry.ip)] = entry;
        } else if let Some(query_ip) = streams.lookup_req.pop() {
            let reply = if is_multicast(query_ip) {
                let ip = u64::from(query_ip);
                let mut mac = set_bits(0, 7, 0, 0x01);
                mac = set_bits(mac, 23, 16, 0x5E);
                mac = set_bits(mac, 31, 24, bits(ip, 15, 8) & 0x7F);
                mac = set_bits(mac, 39, 32, bits(ip, 23, 16));
                mac = set_bits(mac, 47, 40, bits(ip, 31, 24));
                LookupReply { mac, hit: true }
            } else {
                let entry = self.bins[Self::bin_of(query_ip)];
                if !entry.valid {
                    debug!(ip = format_args!("{query_ip:#010x}"), "arp miss, requesting");
                    let _ = streams.request_raw.push(query_ip);
                }
                LookupReply { mac: entry.mac, hit: entry.valid }
            };
            let _ = streams.lookup_rsp.push(reply);
        }
    }
}

// ============================================================================
// Request timer
// ============================================================================

#[derive(Clone, Copy, Default)]
struct TimerEntry {
    active: bool,
    time: u8,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SweepState {
    Idle,
    Decrement,
    Check,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum UpdateState {
    Wait,
    Insert,
    Remove,
}

/// Keeps one timer per table bin for in-flight requests. A request for
/// a bin that is already active is dropped, so at most one frame is
/// outstanding per bin at a time.
struct RequestTimer {
    timers: Box<[TimerEntry]>,
    sweep: SweepState,
    update: UpdateState,
    current_ip: u32,
    index: usize,
    cursor: usize,
    has_data: bool,
}

impl Default for RequestTimer {
    fn default() -> Self {
        Self {
            timers: vec![TimerEntry::default(); TABLE_BINS].into_boxed_slice(),
            sweep: SweepState::Idle,
            update: UpdateState::Wait,
            current_ip: 0,
            index: 0,
            cursor: 0,
            has_data: false,
        }
    }
}

impl RequestTimer {
    fn step(&mut self, streams: &mut ArpStreams) {
        if !streams.request_raw.is_empty()
            || !streams.reply_received.is_empty()
            || self.has_data
        {
            match self.update {
                UpdateState::Wait => {
                    if let Some(ip) = streams.request_raw.pop() {
                        self.current_ip = ip;
                        self.index = (ip >> 24) as usize;
                        self.update = UpdateState::Insert;
                        self.has_data = true;
                    } else if let Some(ip) = streams.reply_received.pop() {
                        self.index = (ip >> 24) as usize;
                        self.update = UpdateState::Remove;
                        self.has_data = true;
                    }
                }
                UpdateState::Insert => {
                    if !self.timers[self.index].active {
                        self.timers[self.index] = TimerEntry { active: true, time: MAX_WAIT };
                        let _ = streams.request_filtered.push(self.current_ip);
                    }
                    self.has_data = false;
                    self.update = UpdateState::Wait;
                }
                UpdateState::Remove => {
                    self.timers[self.index].active = false;
                    self.has_data = false;
                    self.update = UpdateState::Wait;
                }
            }
        } else {
            match self.sweep {
                SweepState::Idle => {
                    if streams.tick_100ms.pop().is_some() {
                        self.cursor = 0;
                        self.sweep = SweepState::Decrement;
                    }
                }
                SweepState::Decrement => {
                    if self.timers[self.cursor].active {
                        self.timers[self.cursor].time =
                            self.timers[self.cursor].time.wrapping_sub(1);
                    }
                    self.cursor += 1;
                    if self.cursor == TABLE_BINS - 1 {
                        self.cursor = 0;
                        self.sweep = SweepState::Check;
                    }
                }
                SweepState::Check => {
                    let slot = &mut self.timers[self.cursor];
                    if slot.active && slot.time == 0 {
                        slot.active = false;
                        let _ = streams.req_lost_flag.push(());
                        debug!(bin = self.cursor, "arp request timed out");
                    }
                    self.cursor += 1;
                    if self.cursor == TABLE_BINS - 1 {
                        self.sweep = SweepState::Idle;
                    }
                }
            }
        }
    }
}

// ============================================================================
// Server
// ============================================================================

/// Streams wiring the ARP stages together and to the outside.
pub struct ArpStreams {
    /// Inbound ARP frames from the interface.
    pub data_in: Stream<Word>,
    /// Outbound ARP frames toward the interface.
    pub data_out: Stream<Word>,
    /// MAC lookup requests from the IP encode path.
    pub lookup_req: Stream<u32>,
    /// Lookup responses.
    pub lookup_rsp: Stream<LookupReply>,
    /// 100ms pulses driving the timer sweep.
    pub tick_100ms: Stream<()>,

    reply_meta: Stream<ReplyMeta>,
    reply_received: Stream<u32>,
    table_insert: Stream<TableEntry>,
    request_raw: Stream<u32>,
    request_filtered: Stream<u32>,
    requests_sent_flag: Stream<()>,
    replies_sent_flag: Stream<()>,
    requests_recv_flag: Stream<()>,
    replies_recv_flag: Stream<()>,
    req_lost_flag: Stream<()>,
}

impl ArpStreams {
    pub fn new(depth: usize) -> Self {
        Self {
            data_in: Stream::with_capacity(depth),
            data_out: Stream::with_capacity(depth.max(12)),
            lookup_req: Stream::with_capacity(depth),
            lookup_rsp: Stream::with_capacity(depth),
            tick_100ms: Stream::with_capacity(4),
            reply_meta: Stream::with_capacity(4),
            reply_received: Stream::with_capacity(4),
            table_insert: Stream::with_capacity(4),
            request_raw: Stream::with_capacity(4),
            request_filtered: Stream::with_capacity(4),
            requests_sent_flag: Stream::with_capacity(4),
            replies_sent_flag: Stream::with_capacity(4),
            requests_recv_flag: Stream::with_capacity(4),
            replies_recv_flag: Stream::with_capacity(4),
            req_lost_flag: Stream::with_capacity(4),
        }
    }
}

/// The composed ARP server.
pub struct ArpServer {
    pub my_mac: u64,
    pub my_ip: u32,
    pub host: HostRegisters,
    stats: ArpStats,
    receiver: PacketReceiver,
    sender: PacketSender,
    table: ResolutionTable,
    timer: RequestTimer,
}

impl ArpServer {
    /// Addresses are in network order (little-endian reads of the wire
    /// bytes), matching the frame fields.
    pub fn new(my_mac: u64, my_ip: u32) -> Self {
        Self {
            my_mac,
            my_ip,
            host: HostRegisters::default(),
            stats: ArpStats::default(),
            receiver: PacketReceiver::default(),
            sender: PacketSender::default(),
            table: ResolutionTable::default(),
            timer: RequestTimer::default(),
        }
    }

    #[inline]
    pub fn stats(&self) -> ArpStats {
        self.stats
    }

    /// Advance every stage once.
    pub fn step(&mut self, streams: &mut ArpStreams) {
        self.receiver.step(self.my_ip, streams);
        self.table.step(&mut self.host, streams);
        self.timer.step(streams);
        self.sender.step(self.my_mac, self.my_ip, streams);

        if streams.requests_sent_flag.pop().is_some() {
            self.stats.requests_sent += 1;
        }
        if streams.replies_sent_flag.pop().is_some() {
            self.stats.replies_sent += 1;
        }
        if streams.requests_recv_flag.pop().is_some() {
            self.stats.requests_received += 1;
        }
        if streams.replies_recv_flag.pop().is_some() {
            self.stats.replies_received += 1;
        }
        if streams.req_lost_flag.pop().is_some() {
            self.stats.requests_lost += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MY_MAC: u64 = 0x0605_0403_0201; // 01:02:03:04:05:06 on the wire
    const MY_IP: u32 = 0x0101_a8c0; // 192.168.1.1

    fn setup() -> (ArpServer, ArpStreams) {
        (ArpServer::new(MY_MAC, MY_IP), ArpStreams::new(16))
    }

    fn run(server: &mut ArpServer, streams: &mut ArpStreams, steps: usize) {
        for _ in 0..steps {
            server.step(streams);
        }
    }

    fn collect_frame(streams: &mut ArpStreams) -> Vec<Word> {
        let mut out = Vec::new();
        while let Some(w) = streams.data_out.pop() {
            out.push(w);
        }
        out
    }

    /// Build the six beats of a request frame aimed at `tpa` from
    /// `spa`/`sha`, mirroring what the receiver expects.
    fn request_frame(sha: u64, spa: u32, tpa: u32) -> Vec<Word> {
        let mut beats = Vec::with_capacity(6);
        let mut d = set_bits(0, 47, 0, BROADCAST_MAC);
        d = set_bits(d, 63, 48, bits(sha, 15, 0));
        beats.push(Word::body(d));
        d = set_bits(0, 31, 0, bits(sha, 47, 16));
        d = set_bits(d, 47, 32, 0x0608);
        d = set_bits(d, 63, 48, 0x0100);
        beats.push(Word::body(d));
        d = set_bits(0, 15, 0, 0x0008);
        d = set_bits(d, 23, 16, 6);
        d = set_bits(d, 31, 24, 4);
        d = set_bits(d, 47, 32, u64::from(OPCODE_REQUEST));
        d = set_bits(d, 63, 48, bits(sha, 15, 0));
        beats.push(Word::body(d));
        d = set_bits(0, 31, 0, bits(sha, 47, 16));
        d = set_bits(d, 63, 32, u64::from(spa));
        beats.push(Word::body(d));
        d = set_bits(0, 63, 48, bits(u64::from(tpa), 15, 0));
        beats.push(Word::body(d));
        d = set_bits(0, 15, 0, bits(u64::from(tpa), 31, 16));
        beats.push(Word::new(d, 0x03, true));
        beats
    }

    #[test]
    fn test_request_learns_sender_and_triggers_reply() {
        let (mut server, mut streams) = setup();
        let peer_mac = 0x0c0b_0a09_0807;
        let peer_ip = 0x0201_a8c0;
        for w in request_frame(peer_mac, peer_ip, MY_IP) {
            streams.data_in.push(w).unwrap();
        }
        run(&mut server, &mut streams, 16);

        let frame = collect_frame(&mut streams);
        assert_eq!(frame.len(), 6);
        assert!(frame[5].last);
        assert_eq!(frame[5].keep, 0x03);
        // beat 0 addresses the requester, beat 2 carries the REPLY opcode
        assert_eq!(bits(frame[0].data, 47, 0), peer_mac);
        assert_eq!(bits(frame[2].data, 47, 32) as u16, OPCODE_REPLY);
        // beat 3 carries our IP, beats 4/5 the requester's addresses
        assert_eq!(bits(frame[3].data, 63, 32) as u32, MY_IP);
        assert_eq!(bits(frame[4].data, 47, 0), peer_mac);

        assert_eq!(server.stats().requests_received, 1);
        assert_eq!(server.stats().replies_sent, 1);

        // the sender mapping was learned, so a lookup now hits
        streams.lookup_req.push(peer_ip).unwrap();
        run(&mut server, &mut streams, 2);
        assert_eq!(streams.lookup_rsp.pop(), Some(LookupReply { mac: peer_mac, hit: true }));
    }

    #[test]
    fn test_miss_emits_request_frame() {
        let (mut server, mut streams) = setup();
        let target_ip = 0x0501_a8c0u32;
        streams.lookup_req.push(target_ip).unwrap();
        run(&mut server, &mut streams, 16);

        let rsp = streams.lookup_rsp.pop().unwrap();
        assert!(!rsp.hit);

        let frame = collect_frame(&mut streams);
        assert_eq!(frame.len(), 6);
        assert_eq!(bits(frame[0].data, 47, 0), BROADCAST_MAC);
        assert_eq!(bits(frame[2].data, 47, 32) as u16, OPCODE_REQUEST);
        assert_eq!(bits(frame[4].data, 63, 48) as u32, target_ip & 0xffff);
        assert_eq!(bits(frame[5].data, 15, 0) as u32, target_ip >> 16);
        assert_eq!(server.stats().requests_sent, 1);
    }

    #[test]
    fn test_duplicate_request_suppressed_while_outstanding() {
        let (mut server, mut streams) = setup();
        let target_ip = 0x0501_a8c0u32;
        streams.lookup_req.push(target_ip).unwrap();
        run(&mut server, &mut streams, 16);
        collect_frame(&mut streams);

        streams.lookup_req.push(target_ip).unwrap();
        run(&mut server, &mut streams, 16);
        assert!(collect_frame(&mut streams).is_empty());
        assert_eq!(server.stats().requests_sent, 1);
    }

    #[test]
    fn test_unanswered_request_expires_after_max_wait() {
        let (mut server, mut streams) = setup();
        streams.lookup_req.push(0x0501_a8c0).unwrap();
        run(&mut server, &mut streams, 16);
        collect_frame(&mut streams);

        // each tick drives a decrement pass then a check pass
        for tick in 0..MAX_WAIT {
            streams.tick_100ms.push(()).unwrap();
            run(&mut server, &mut streams, 2 * TABLE_BINS + 2);
            if tick < MAX_WAIT - 1 {
                assert_eq!(server.stats().requests_lost, 0);
            }
        }
        assert_eq!(server.stats().requests_lost, 1);

        // the slot is immediately reusable
        streams.lookup_req.push(0x0501_a8c0).unwrap();
        run(&mut server, &mut streams, 16);
        assert_eq!(collect_frame(&mut streams).len(), 6);
        assert_eq!(server.stats().requests_sent, 2);
    }

    #[test]
    fn test_gratuitous_arp_learned() {
        let (mut server, mut streams) = setup();
        let peer_mac = 0x0c0b_0a09_0807;
        let peer_ip = 0x0901_a8c0;
        for w in request_frame(peer_mac, peer_ip, peer_ip) {
            streams.data_in.push(w).unwrap();
        }
        run(&mut server, &mut streams, 16);
        // not addressed to us, so no reply
        assert!(collect_frame(&mut streams).is_empty());

        streams.lookup_req.push(peer_ip).unwrap();
        run(&mut server, &mut streams, 2);
        assert_eq!(streams.lookup_rsp.pop(), Some(LookupReply { mac: peer_mac, hit: true }));
    }

    #[test]
    fn test_zero_source_probe_not_learned() {
        let (mut server, mut streams) = setup();
        for w in request_frame(0x0c0b_0a09_0807, 0, MY_IP) {
            streams.data_in.push(w).unwrap();
        }
        run(&mut server, &mut streams, 16);
        // probe still gets a reply, but nothing is inserted
        assert_eq!(collect_frame(&mut streams).len(), 6);

        streams.lookup_req.push(0).unwrap();
        run(&mut server, &mut streams, 16);
        assert!(!streams.lookup_rsp.pop().unwrap().hit);
    }

    #[test]
    fn test_multicast_maps_algorithmically() {
        let (mut server, mut streams) = setup();
        // 239.1.130.3 in network order
        let ip: u32 = 0x0382_01ef;
        assert!(is_multicast(ip));
        streams.lookup_req.push(ip).unwrap();
        run(&mut server, &mut streams, 2);
        let rsp = streams.lookup_rsp.pop().unwrap();
        assert!(rsp.hit);
        assert_eq!(bits(rsp.mac, 7, 0), 0x01);
        assert_eq!(bits(rsp.mac, 15, 8), 0x00);
        assert_eq!(bits(rsp.mac, 23, 16), 0x5E);
        // low 23 bits of the group address
        assert_eq!(bits(rsp.mac, 31, 24), 0x01);
        assert_eq!(bits(rsp.mac, 39, 32), 0x82);
        assert_eq!(bits(rsp.mac, 47, 40), 0x03);
        // no request frame for multicast
        run(&mut server, &mut streams, 16);
        assert!(collect_frame(&mut streams).is_empty());
    }

    #[test]
    fn test_host_add_find_delete() {
        let (mut server, mut streams) = setup();
        // host supplies addresses in host order
        server.host.entry = TableEntry::new(0xc0a8_010a, 0x0102_0304_0506, true);
        server.host.opcode = HostOp::Add as u8;
        server.host.op_toggle = !server.host.op_toggle;
        server.step(&mut streams);

        // stored in network order: bin is the last octet
        server.host.entry_bin = 0x0a;
        server.host.opcode = HostOp::Find as u8;
        server.host.op_toggle = !server.host.op_toggle;
        server.step(&mut streams);
        assert_eq!(server.host.entry.ip, 0xc0a8_010a);
        assert_eq!(server.host.entry.mac, 0x0102_0304_0506);
        assert!(server.host.entry.valid);

        server.host.opcode = HostOp::Delete as u8;
        server.host.op_toggle = !server.host.op_toggle;
        server.step(&mut streams);

        server.host.opcode = HostOp::Find as u8;
        server.host.op_toggle = !server.host.op_toggle;
        server.step(&mut streams);
        assert!(!server.host.entry.valid);
    }
}
