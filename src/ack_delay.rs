//! Event arbitration and delayed-ACK coalescing.
//!
//! Three event sources (rx engine, retransmit timer, tx application)
//! funnel into one ordered stream toward the tx engine. The rx path is
//! never blocked; timer and application events are only admitted while
//! the downstream ack-delay stage and tx engine have drained everything
//! the arbitrator already sent, tracked with wrapping occupancy
//! counters fed by single-bit count flags.
//!
//! The ack-delay stage coalesces bare ACKs: the first ACK for a session
//! arms a countdown instead of being sent. A second ACK arriving while
//! the countdown is live is forwarded at once and disarms it, so two
//! back-to-back bare ACKs cost one wire ACK. Any non-ACK event for the
//! session also flushes the pending ACK (the event itself carries the
//! acknowledgment), and the countdown expiring emits one synthetic ACK.

use crate::session::MAX_SESSIONS;
use crate::stream::Stream;

/// Countdown armed for a coalesced ACK, in engine steps.
pub const ACK_DELAY_TICKS: u16 = 600;

/// TCP-side events flowing toward the tx engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum EventKind {
    Tx = 0,
    Rt,
    Ack,
    Syn,
    SynAck,
    Fin,
    Rst,
    /// An ACK that must bypass coalescing (window updates).
    AckNoDelay,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub session_id: u16,
}

impl Event {
    pub fn new(kind: EventKind, session_id: u16) -> Self {
        Self { kind, session_id }
    }
}

// ============================================================================
// Event arbitrator
// ============================================================================

/// Streams attached to the arbitrator.
pub struct ArbitratorPorts {
    pub rx_events: Stream<Event>,
    pub timer_events: Stream<Event>,
    pub tx_app_events: Stream<Event>,
    /// Arbitrated output, consumed by [`AckDelayTimer`].
    pub out: Stream<Event>,
    /// One flag per event the ack-delay stage consumed.
    pub ack_delay_read: Stream<()>,
    /// One flag per event the ack-delay stage emitted downstream.
    pub ack_delay_write: Stream<()>,
    /// One flag per event the tx engine consumed.
    pub tx_engine_read: Stream<()>,
}

impl ArbitratorPorts {
    pub fn new(depth: usize) -> Self {
        Self {
            rx_events: Stream::with_capacity(depth),
            timer_events: Stream::with_capacity(depth),
            tx_app_events: Stream::with_capacity(depth),
            out: Stream::with_capacity(depth),
            ack_delay_read: Stream::with_capacity(depth),
            ack_delay_write: Stream::with_capacity(depth),
            tx_engine_read: Stream::with_capacity(depth),
        }
    }
}

/// Priority arbiter in front of the ack-delay stage.
#[derive(Default)]
pub struct EventArbitrator {
    write_count: u8,
    ack_delay_read_count: u8,
    ack_delay_write_count: u8,
    tx_engine_read_count: u8,
}

impl EventArbitrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when every event already admitted has been consumed by the
    /// ack-delay stage and everything it emitted has reached the tx
    /// engine.
    #[inline]
    fn pipeline_drained(&self) -> bool {
        self.write_count == self.ack_delay_read_count
            && self.ack_delay_write_count == self.tx_engine_read_count
    }

    pub fn step(&mut self, ports: &mut ArbitratorPorts) {
        // drain the occupancy flags first so the gate sees this step's
        // completions
        while ports.ack_delay_read.pop().is_some() {
            self.ack_delay_read_count = self.ack_delay_read_count.wrapping_add(1);
        }
        while ports.ack_delay_write.pop().is_some() {
            self.ack_delay_write_count = self.ack_delay_write_count.wrapping_add(1);
        }
        while ports.tx_engine_read.pop().is_some() {
            self.tx_engine_read_count = self.tx_engine_read_count.wrapping_add(1);
        }

        if !ports.rx_events.is_empty() {
            if !ports.out.is_full() {
                let ev = ports.rx_events.pop().unwrap();
                let _ = ports.out.push(ev);
                self.write_count = self.write_count.wrapping_add(1);
            }
        } else if self.pipeline_drained() && !ports.out.is_full() {
            if let Some(ev) = ports.timer_events.pop() {
                let _ = ports.out.push(ev);
                self.write_count = self.write_count.wrapping_add(1);
            } else if let Some(ev) = ports.tx_app_events.pop() {
                let _ = ports.out.push(ev);
                self.write_count = self.write_count.wrapping_add(1);
            }
        }
    }
}

// ============================================================================
// Ack-delay timer
// ============================================================================

/// Streams attached to the delay stage.
pub struct AckDelayPorts {
    /// Session IDs whose pending ACK must be cancelled (session closed).
    pub clear: Stream<u16>,
    /// Events toward the tx engine.
    pub out: Stream<Event>,
}

impl AckDelayPorts {
    pub fn new(depth: usize) -> Self {
        Self {
            clear: Stream::with_capacity(depth),
            out: Stream::with_capacity(depth),
        }
    }
}

/// Per-session delayed-ACK countdown bank.
pub struct AckDelayTimer {
    counters: [u16; MAX_SESSIONS],
    clear_flags: [bool; MAX_SESSIONS],
    sweep_pos: usize,
}

impl Default for AckDelayTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl AckDelayTimer {
    pub fn new() -> Self {
        Self {
            counters: [0; MAX_SESSIONS],
            clear_flags: [false; MAX_SESSIONS],
            sweep_pos: 0,
        }
    }

    /// Pending countdown for a session, for diagnostics.
    #[inline]
    pub fn pending(&self, session_id: u16) -> u16 {
        self.counter(session_id as usize)
    }

    /// Out-of-range session IDs read as no pending countdown.
    #[inline]
    fn counter(&self, idx: usize) -> u16 {
        self.counters.get(idx).copied().unwrap_or(0)
    }

    /// Consume one input event if present, otherwise advance the sweep
    /// by one session slot.
    pub fn step(
        &mut self,
        input: &mut Stream<Event>,
        arb: &mut ArbitratorPorts,
        ports: &mut AckDelayPorts,
    ) {
        while let Some(session_id) = ports.clear.pop() {
            if let Some(flag) = self.clear_flags.get_mut(session_id as usize) {
                *flag = true;
            }
        }

        if let Some(ev) = input.pop() {
            let _ = arb.ack_delay_read.push(());
            let idx = ev.session_id as usize;
            match ev.kind {
                EventKind::Ack if self.counter(idx) == 0 => {
                    // first bare ACK arms the countdown
                    if idx < MAX_SESSIONS {
                        self.counters[idx] = ACK_DELAY_TICKS / 2;
                    }
                }
                kind => {
                    // an ACK while armed, or any other event, disarms
                    // the countdown and goes out immediately
                    if idx < MAX_SESSIONS {
                        self.counters[idx] = 0;
                    }
                    let forwarded = if kind == EventKind::AckNoDelay {
                        Event::new(EventKind::Ack, ev.session_id)
                    } else {
                        ev
                    };
                    let _ = ports.out.push(forwarded);
                    let _ = arb.ack_delay_write.push(());
                }
            }
        } else {
            let idx = self.sweep_pos;
            if self.clear_flags[idx] {
                self.clear_flags[idx] = false;
                self.counters[idx] = 0;
            } else if self.counters[idx] > 0 {
                if !ports.out.is_full() {
                    if self.counters[idx] == 1 {
                        let _ = ports.out.push(Event::new(EventKind::Ack, idx as u16));
                        let _ = arb.ack_delay_write.push(());
                    }
                    self.counters[idx] -= 1;
                } else {
                    // backpressured expiry abandons the pending ACK
                    self.counters[idx] = 0;
                }
            }
            self.sweep_pos = (self.sweep_pos + 1) % MAX_SESSIONS;
        }
    }
}
