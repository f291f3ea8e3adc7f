//! Ingress packet filter for one physical feed port.
//!
//! Each inbound packet arrives as a metadata word (source address and
//! port) followed by payload words ending with a `last` marker. The
//! filter classifies the packet against up to [`NUM_FILTERS`] address
//! and port rules, tags accepted packets with a split index for the
//! arbitrator, and drops the rest. An optional echo path mirrors all
//! traffic back out for loopback testing.

use crate::codec::{UdpMeta, Word};
use crate::config::FilterControl;
use crate::stream::Stream;

/// Configurable address/port filter rules per port.
pub const NUM_FILTERS: usize = 16;

/// Identifies the logical feed (split) a packet belongs to.
pub type SplitId = u8;

/// Per-port filter rule table and echo source registers.
#[derive(Clone, Copy, Debug)]
pub struct FilterRules {
    pub address: [u32; NUM_FILTERS],
    pub port: [u32; NUM_FILTERS],
    pub split_id: [u32; NUM_FILTERS],
    pub echo_address: u32,
    pub echo_port: u32,
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            address: [0; NUM_FILTERS],
            port: [0; NUM_FILTERS],
            split_id: [0; NUM_FILTERS],
            echo_address: 0,
            echo_port: 0,
        }
    }
}

/// Read-only counters and last-seen debug registers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FilterStatus {
    pub rx_words: u32,
    pub rx_meta: u32,
    pub dropped_words: u32,
    pub last_address: u32,
    pub last_port: u32,
}

/// Streams attached to one filter instance.
pub struct FilterStreams {
    pub meta_in: Stream<UdpMeta>,
    pub data_in: Stream<Word>,
    /// Payload toward the arbitrator.
    pub data_out: Stream<Word>,
    /// Split tag for each accepted packet, read alongside `data_out`.
    pub split_out: Stream<SplitId>,
    /// Echo mirror of metadata and payload.
    pub echo_meta: Stream<UdpMeta>,
    pub echo_data: Stream<Word>,
}

impl FilterStreams {
    pub fn new(depth: usize) -> Self {
        Self {
            meta_in: Stream::with_capacity(depth),
            data_in: Stream::with_capacity(depth),
            data_out: Stream::with_capacity(depth),
            split_out: Stream::with_capacity(depth),
            echo_meta: Stream::with_capacity(depth),
            echo_data: Stream::with_capacity(depth),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FilterState {
    GetValid,
    Forward,
    Drop,
}

/// The per-port ingress filter.
pub struct LineFilter {
    pub rules: FilterRules,
    state: FilterState,
    status: FilterStatus,
}

impl Default for LineFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl LineFilter {
    pub fn new() -> Self {
        Self {
            rules: FilterRules::default(),
            state: FilterState::GetValid,
            status: FilterStatus::default(),
        }
    }

    #[inline]
    pub fn status(&self) -> FilterStatus {
        self.status
    }

    /// Configure one rule slot.
    pub fn set_rule(&mut self, slot: usize, address: u32, port: u32, split_id: SplitId) {
        self.rules.address[slot] = address;
        self.rules.port[slot] = port;
        self.rules.split_id[slot] = u32::from(split_id);
    }

    /// Advance the filter by one transition.
    pub fn step(&mut self, control: FilterControl, streams: &mut FilterStreams) {
        match self.state {
            FilterState::GetValid => {
                let Some(meta) = streams.meta_in.pop() else { return };
                self.status.rx_meta += 1;
                self.status.last_address = meta.src_address;
                self.status.last_port = u32::from(meta.src_port);

                if control.contains(FilterControl::FILTER_DISABLE) {
                    let _ = streams.split_out.push(0);
                    self.state = FilterState::Forward;
                } else {
                    // all rules compared in parallel; a set bit at
                    // position NUM_FILTERS-1-i marks rule i, so the
                    // lowest-numbered matching rule has the leading one
                    let mut matches: u16 = 0;
                    for i in 0..NUM_FILTERS {
                        if meta.src_address == self.rules.address[i]
                            && u32::from(meta.src_port) == self.rules.port[i]
                        {
                            matches |= 1 << (NUM_FILTERS - 1 - i);
                        }
                    }
                    if matches != 0 {
                        let rule = matches.leading_zeros() as usize;
                        let _ = streams.split_out.push(self.rules.split_id[rule] as SplitId);
                        self.state = FilterState::Forward;
                    } else {
                        self.state = FilterState::Drop;
                    }
                }

                if control.contains(FilterControl::ECHO_ENABLE) {
                    let echo = UdpMeta {
                        src_address: self.rules.echo_address,
                        src_port: self.rules.echo_port as u16,
                    };
                    let _ = streams.echo_meta.push(echo);
                }
            }
            FilterState::Forward => {
                if streams.data_in.is_empty() || streams.data_out.is_full() {
                    return;
                }
                let word = streams.data_in.pop().unwrap();
                self.status.rx_words += 1;
                let _ = streams.data_out.push(word);
                if word.last {
                    self.state = FilterState::GetValid;
                }
                if control.contains(FilterControl::ECHO_ENABLE) {
                    let _ = streams.echo_data.push(word);
                }
            }
            FilterState::Drop => {
                let Some(word) = streams.data_in.pop() else { return };
                self.status.dropped_words += 1;
                if word.last {
                    self.state = FilterState::GetValid;
                }
                if control.contains(FilterControl::ECHO_ENABLE) {
                    let _ = streams.echo_data.push(word);
                }
            }
        }
    }
}
