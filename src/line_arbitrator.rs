//! A/B feed arbitration with per-split sequence tracking.
//!
//! Two filtered feed ports carry the same logical feeds (splits). Each
//! packet opens with a 32-bit sequence number in its first word. The
//! arbitrator services the ports in round-robin order and forwards the
//! first packet that advances a split's expected sequence, dropping
//! duplicates from the slower line. A sequence number of zero is an
//! implied feed reset; a debounce timer swallows the mirror reset that
//! arrives on the other line shortly after.

use tracing::debug;

use crate::codec::Word;
use crate::config::ArbControl;
use crate::line_filter::SplitId;
use crate::stream::Stream;

/// Logical feeds multiplexed over the two ports.
pub const NUM_SPLITS: usize = 8;

/// Counters exposed in the register map.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArbStatus {
    pub total_sent: u32,
    pub total_words_sent: u32,
    pub total_missed: u32,
    pub rx_feed: [u32; 2],
    pub tx_feed: [u32; 2],
    pub discarded: [u32; 2],
}

/// Streams attached to the arbitrator.
pub struct ArbStreams {
    pub port0: Stream<Word>,
    pub port1: Stream<Word>,
    pub split0: Stream<SplitId>,
    pub split1: Stream<SplitId>,
    pub out: Stream<Word>,
}

impl ArbStreams {
    pub fn new(depth: usize) -> Self {
        Self {
            port0: Stream::with_capacity(depth),
            port1: Stream::with_capacity(depth),
            split0: Stream::with_capacity(depth),
            split1: Stream::with_capacity(depth),
            out: Stream::with_capacity(depth),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ArbState {
    Fetch,
    Decode,
    Forward0,
    Forward1,
    Drop0,
    Drop1,
}

/// The arbitration engine.
pub struct LineArbitrator {
    /// Steps during which a second implied reset is ignored.
    pub reset_timer_interval: u32,

    state: ArbState,
    word_in: Word,
    reset_timer: u32,
    active_port: u8,
    split_id: SplitId,
    seq_received: u32,
    expected: [u32; NUM_SPLITS],
    forward: bool,
    status: ArbStatus,
}

impl LineArbitrator {
    pub fn new(reset_timer_interval: u32) -> Self {
        Self {
            reset_timer_interval,
            state: ArbState::Fetch,
            word_in: Word::new(0, 0, false),
            reset_timer: 0,
            // port 0 is serviced first
            active_port: 1,
            split_id: 0,
            seq_received: 0,
            expected: [0; NUM_SPLITS],
            forward: false,
            status: ArbStatus::default(),
        }
    }

    #[inline]
    pub fn status(&self) -> ArbStatus {
        self.status
    }

    #[inline]
    pub fn expected_seq(&self, split: SplitId) -> u32 {
        self.expected[split as usize]
    }

    fn fetch_port(&mut self, port: u8, streams: &mut ArbStreams) -> bool {
        let (data, split) = match port {
            0 => (&mut streams.port0, &mut streams.split0),
            _ => (&mut streams.port1, &mut streams.split1),
        };
        if data.is_empty() {
            return false;
        }
        self.active_port = port;
        self.word_in = data.pop().unwrap();
        self.split_id = split.pop().unwrap_or(0);
        self.seq_received = self.word_in.data as u32;
        self.state = ArbState::Decode;
        true
    }

    /// Advance the arbitrator by one transition.
    pub fn step(&mut self, control: ArbControl, streams: &mut ArbStreams) {
        // TODO: the debounce timer is global; it should be per split
        if self.reset_timer > 0 {
            self.reset_timer -= 1;
        }

        if control.contains(ArbControl::RESET_SEQ_NUM) {
            self.expected = [0; NUM_SPLITS];
        }

        match self.state {
            ArbState::Fetch => {
                // service the opposite port from the last packet first
                let preferred = 1 - self.active_port;
                if !self.fetch_port(preferred, streams) {
                    self.fetch_port(1 - preferred, streams);
                }
            }
            ArbState::Decode => {
                let split = self.split_id as usize;
                if self.seq_received == 0 {
                    if self.reset_timer > 0 {
                        // mirror of a reset already seen on the other line
                        debug!(port = self.active_port, "reset mirror discarded");
                        self.forward = false;
                    } else {
                        debug!(port = self.active_port, split, "feed reset");
                        self.expected[split] = 1;
                        self.reset_timer = self.reset_timer_interval;
                        self.forward = true;
                    }
                } else if self.seq_received < self.expected[split] {
                    debug!(
                        port = self.active_port,
                        split,
                        seq = self.seq_received,
                        expected = self.expected[split],
                        "duplicate discarded"
                    );
                    self.forward = false;
                } else if self.seq_received == self.expected[split] {
                    self.expected[split] = self.seq_received + 1;
                    self.forward = true;
                } else if self.reset_timer > 0 {
                    // ahead of expected while a reset is settling
                    debug!(
                        port = self.active_port,
                        split,
                        seq = self.seq_received,
                        "post-reset runahead discarded"
                    );
                    self.forward = false;
                } else {
                    debug!(
                        port = self.active_port,
                        split,
                        seq = self.seq_received,
                        expected = self.expected[split],
                        "gap, forwarding"
                    );
                    self.expected[split] = self.seq_received + 1;
                    self.forward = true;
                    self.status.total_missed += 1;
                }

                self.status.rx_feed[self.active_port as usize] += 1;

                if self.forward {
                    let _ = streams.out.push(self.word_in);
                    self.status.total_words_sent += 1;
                    self.status.total_sent += 1;
                    self.state = if self.active_port == 0 {
                        ArbState::Forward0
                    } else {
                        ArbState::Forward1
                    };
                } else {
                    self.state = if self.active_port == 0 {
                        ArbState::Drop0
                    } else {
                        ArbState::Drop1
                    };
                }
            }
            ArbState::Forward0 | ArbState::Forward1 => {
                let data = if self.state == ArbState::Forward0 {
                    &mut streams.port0
                } else {
                    &mut streams.port1
                };
                if let Some(word) = data.pop() {
                    self.word_in = word;
                    let _ = streams.out.push(word);
                    self.status.total_words_sent += 1;
                }
                if self.word_in.last {
                    let port = usize::from(self.state == ArbState::Forward1);
                    self.status.tx_feed[port] += 1;
                    self.status.total_sent += 1;
                    self.state = ArbState::Fetch;
                }
            }
            ArbState::Drop0 | ArbState::Drop1 => {
                let data = if self.state == ArbState::Drop0 {
                    &mut streams.port0
                } else {
                    &mut streams.port1
                };
                if let Some(word) = data.pop() {
                    self.word_in = word;
                }
                if self.word_in.last {
                    let port = usize::from(self.state == ArbState::Drop1);
                    self.status.discarded[port] += 1;
                    self.state = ArbState::Fetch;
                }
            }
        }
    }
}
