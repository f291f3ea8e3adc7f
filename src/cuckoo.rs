//! CuckooTable - Multi-table cuckoo hash engine for session/flow lookup.
//!
//! Keys are placed in one of `NUM_TABLES` parallel tables, each
//! addressed by an independent tabulation hash of the key. Collisions
//! are resolved by evicting the resident entry to one of its alternate
//! slots, bounded by `MAX_TRIALS` displacement rounds; an insert that
//! exhausts the bound drops the final displaced entry and tallies the
//! failure.

use tracing::{debug, warn};

use crate::stream::Stream;

/// Number of parallel hash tables.
pub const NUM_TABLES: usize = 4;
/// Slots per table.
pub const TABLE_SIZE: usize = 512;
/// Displacement rounds before an insert is abandoned.
pub const MAX_TRIALS: usize = 12;

const TABLE_MASK: u16 = (TABLE_SIZE - 1) as u16;
const KEY_BITS: usize = 64;

/// One slot: key, value and occupancy flag.
#[derive(Clone, Copy, Debug, Default)]
struct Slot {
    key: u64,
    value: u16,
    valid: bool,
}

// ============================================================================
// Tabulation hashing
// ============================================================================

/// Per-bit tabulation constants: for every table, key-bit position and
/// bit value there is one random table address which is XOR-folded
/// into the hash. Generated at compile time from a fixed seed so every
/// build hashes identically.
static TABULATION: [[[u16; KEY_BITS]; 2]; NUM_TABLES] = build_tabulation();

const fn build_tabulation() -> [[[u16; KEY_BITS]; 2]; NUM_TABLES] {
    let mut out = [[[0u16; KEY_BITS]; 2]; NUM_TABLES];
    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    let mut t = 0;
    while t < NUM_TABLES {
        let mut b = 0;
        while b < 2 {
            let mut k = 0;
            while k < KEY_BITS {
                // splitmix64 step
                state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
                let mut z = state;
                z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
                z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
                z ^= z >> 31;
                out[t][b][k] = (z as u16) & TABLE_MASK;
                k += 1;
            }
            b += 1;
        }
        t += 1;
    }
    out
}

/// Compute all table addresses for `key` before any decision is made.
#[inline]
fn calculate_hashes(key: u64) -> [u16; NUM_TABLES] {
    let mut hashes = [0u16; NUM_TABLES];
    for (t, hash) in hashes.iter_mut().enumerate() {
        let mut h = 0u16;
        for k in 0..KEY_BITS {
            let bit = ((key >> k) & 1) as usize;
            h ^= TABULATION[t][bit][k];
        }
        *hash = h & TABLE_MASK;
    }
    hashes
}

// ============================================================================
// Requests / responses
// ============================================================================

/// Update opcode carried on the update request stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOp {
    Insert,
    Delete,
}

#[derive(Clone, Copy, Debug)]
pub struct LookupRequest {
    pub key: u64,
    /// Requester tag, echoed back in the response.
    pub source: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LookupResponse {
    pub key: u64,
    pub value: u16,
    pub hit: bool,
    pub source: u8,
}

#[derive(Clone, Copy, Debug)]
pub struct UpdateRequest {
    pub op: UpdateOp,
    pub key: u64,
    pub value: u16,
    pub source: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpdateResponse {
    pub op: UpdateOp,
    pub key: u64,
    pub value: u16,
    pub success: bool,
    pub source: u8,
}

// ============================================================================
// Engine
// ============================================================================

/// Cuckoo hash engine servicing one operation per step.
pub struct CuckooTable {
    tables: Vec<[Slot; NUM_TABLES]>,
    /// Round-robin table selector for eviction.
    victim_idx: usize,
    /// Alternating sub-position bit mixed into victim selection.
    victim_bit: usize,
    insert_failures: u32,
}

impl Default for CuckooTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CuckooTable {
    pub fn new() -> Self {
        Self {
            // stored slot-major so one address pulls all table candidates
            tables: vec![[Slot::default(); NUM_TABLES]; TABLE_SIZE],
            victim_idx: 0,
            victim_bit: 0,
            insert_failures: 0,
        }
    }

    /// Inserts abandoned after `MAX_TRIALS` displacement rounds.
    #[inline]
    pub fn insert_failures(&self) -> u32 {
        self.insert_failures
    }

    /// Look up `key` across all tables.
    ///
    /// All candidate slots are read before the decision; if more than
    /// one table holds the key (which the insert path is meant to make
    /// impossible) the last iterated match wins.
    pub fn lookup(&self, key: u64) -> Option<u16> {
        let hashes = calculate_hashes(key);
        let mut found: Option<u16> = None;
        let mut matches = 0u32;
        for t in 0..NUM_TABLES {
            let slot = self.tables[hashes[t] as usize][t];
            if slot.valid && slot.key == key {
                found = Some(slot.value);
                matches += 1;
            }
        }
        if matches > 1 {
            debug!(key, matches, "key resident in multiple cuckoo tables");
        }
        found
    }

    /// Insert `key -> value`, displacing residents as needed.
    ///
    /// Returns false when `MAX_TRIALS` rounds did not find a home; the
    /// entry displaced on the final round is dropped.
    pub fn insert(&mut self, key: u64, value: u16) -> bool {
        let mut current = Slot { key, value, valid: true };
        self.victim_idx = 0;

        for _ in 0..MAX_TRIALS {
            let hashes = calculate_hashes(current.key);
            let mut candidates = [Slot::default(); NUM_TABLES];
            let mut free: Option<usize> = None;
            for t in 0..NUM_TABLES {
                candidates[t] = self.tables[hashes[t] as usize][t];
                if !candidates[t].valid {
                    free = Some(t);
                }
            }

            let mut placed = false;
            if let Some(slot) = free {
                candidates[slot] = current;
                placed = true;
            } else {
                // evict a resident and retry with it on the next round
                let victim_pos = (hashes[self.victim_idx] as usize % (NUM_TABLES - 1)) + self.victim_bit;
                let victim = candidates[victim_pos];
                candidates[victim_pos] = current;
                current = victim;
                self.victim_idx += 1;
                if self.victim_idx == NUM_TABLES {
                    self.victim_idx = 0;
                }
            }

            for t in 0..NUM_TABLES {
                self.tables[hashes[t] as usize][t] = candidates[t];
            }

            self.victim_bit ^= 1;
            if placed {
                return true;
            }
        }

        warn!(key = current.key, "cuckoo insert exhausted trials, entry dropped");
        self.insert_failures += 1;
        false
    }

    /// Remove `key` wherever it is resident. Returns false on miss.
    pub fn remove(&mut self, key: u64) -> bool {
        let hashes = calculate_hashes(key);
        let mut removed = false;
        for t in 0..NUM_TABLES {
            let addr = hashes[t] as usize;
            let slot = &mut self.tables[addr][t];
            if slot.valid && slot.key == key {
                slot.valid = false;
                removed = true;
            }
        }
        removed
    }

    /// Service one request: a pending lookup wins over a pending
    /// update, and at most one of the two is consumed per step.
    pub fn step(
        &mut self,
        lookup_req: &mut Stream<LookupRequest>,
        update_req: &mut Stream<UpdateRequest>,
        lookup_rsp: &mut Stream<LookupResponse>,
        update_rsp: &mut Stream<UpdateResponse>,
    ) {
        if !lookup_req.is_empty() && !lookup_rsp.is_full() {
            if let Some(req) = lookup_req.pop() {
                let value = self.lookup(req.key);
                let _ = lookup_rsp.push(LookupResponse {
                    key: req.key,
                    value: value.unwrap_or(0),
                    hit: value.is_some(),
                    source: req.source,
                });
            }
        } else if !update_req.is_empty() && !update_rsp.is_full() {
            if let Some(req) = update_req.pop() {
                let success = match req.op {
                    UpdateOp::Insert => self.insert(req.key, req.value),
                    UpdateOp::Delete => self.remove(req.key),
                };
                let _ = update_rsp.push(UpdateResponse {
                    op: req.op,
                    key: req.key,
                    value: req.value,
                    success,
                    source: req.source,
                });
            }
        }
    }
}
