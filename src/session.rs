//! SessionStateTable - Per-session TCP connection state store.
//!
//! Two read-modify-write ports (rx side and tx side) share the table.
//! A read takes a lock on the session; the matching write releases it.
//! A port that targets a session locked by the opposite port parks the
//! request in a single wait slot and retries it on a later step, so no
//! request is ever lost or reordered against its own port.

use tracing::trace;

use crate::stream::Stream;

/// Maximum concurrently tracked sessions.
pub const MAX_SESSIONS: usize = 32;

/// TCP connection state. LISTEN is folded into Closed, as the state
/// machine only ever opens passively from a SYN.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    #[default]
    Closed = 0,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    Closing,
    TimeWait,
    LastAck,
}

/// A read or write request against one session's state.
#[derive(Clone, Copy, Debug)]
pub struct StateQuery {
    pub session_id: u16,
    /// New state; ignored for reads.
    pub state: SessionState,
    pub write: bool,
}

impl StateQuery {
    pub fn read(session_id: u16) -> Self {
        Self { session_id, state: SessionState::Closed, write: false }
    }

    pub fn write(session_id: u16, state: SessionState) -> Self {
        Self { session_id, state, write: true }
    }
}

/// Input streams feeding the state table.
pub struct SessionPorts {
    /// Read/write requests from the rx engine.
    pub rx_update_req: Stream<StateQuery>,
    /// Read/write requests from the tx application interface.
    pub tx_update_req: Stream<StateQuery>,
    /// Lockless current-state queries from the tx stream interface.
    pub tx_query_req: Stream<u16>,
    /// Session IDs forced closed by the close timer.
    pub timer_release: Stream<u16>,
    /// Read responses back to the rx engine.
    pub rx_update_rsp: Stream<SessionState>,
    /// Read responses back to the tx application interface.
    pub tx_update_rsp: Stream<SessionState>,
    /// Responses to lockless queries.
    pub tx_query_rsp: Stream<SessionState>,
    /// Closed sessions, for the session-ID allocator to reclaim.
    pub release_session: Stream<u16>,
    /// Closed sessions, for the ack-delay timer to clear.
    pub clear_ack_delay: Stream<u16>,
}

impl SessionPorts {
    pub fn new(depth: usize) -> Self {
        Self {
            rx_update_req: Stream::with_capacity(depth),
            tx_update_req: Stream::with_capacity(depth),
            tx_query_req: Stream::with_capacity(depth),
            timer_release: Stream::with_capacity(depth),
            rx_update_rsp: Stream::with_capacity(depth),
            tx_update_rsp: Stream::with_capacity(depth),
            tx_query_rsp: Stream::with_capacity(depth),
            release_session: Stream::with_capacity(depth),
            clear_ack_delay: Stream::with_capacity(depth),
        }
    }
}

/// The state table engine.
pub struct SessionStateTable {
    table: [SessionState; MAX_SESSIONS],

    tx_locked_session: u16,
    rx_locked_session: u16,
    tx_locked: bool,
    rx_locked: bool,

    // single-slot wait stations for deferred requests
    tx_pending: StateQuery,
    rx_pending: StateQuery,
    tx_wait: bool,
    rx_wait: bool,
    close_pending: u16,
    close_wait: bool,

    active_opens: u32,
    passive_opens: u32,
}

impl Default for SessionStateTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateTable {
    pub fn new() -> Self {
        Self {
            table: [SessionState::Closed; MAX_SESSIONS],
            tx_locked_session: 0,
            rx_locked_session: 0,
            tx_locked: false,
            rx_locked: false,
            tx_pending: StateQuery::read(0),
            rx_pending: StateQuery::read(0),
            tx_wait: false,
            rx_wait: false,
            close_pending: 0,
            close_wait: false,
            active_opens: 0,
            passive_opens: 0,
        }
    }

    /// Connections opened actively (a SynSent write).
    #[inline]
    pub fn active_opens(&self) -> u32 {
        self.active_opens
    }

    /// Connections opened passively (a SynReceived write).
    #[inline]
    pub fn passive_opens(&self) -> u32 {
        self.passive_opens
    }

    /// Current state, for diagnostics only; the engines go through the
    /// request streams.
    pub fn peek(&self, session_id: u16) -> SessionState {
        self.table
            .get(session_id as usize)
            .copied()
            .unwrap_or(SessionState::Closed)
    }

    fn apply_tx(&mut self, access: StateQuery, ports: &mut SessionPorts) {
        if access.write {
            // out-of-range writes fall through and only drop the lock
            if let Some(slot) = self.table.get_mut(access.session_id as usize) {
                *slot = access.state;
                if access.state == SessionState::SynSent {
                    self.active_opens += 1;
                    trace!(session = access.session_id, "active open");
                }
            }
            self.tx_locked = false;
        } else {
            let _ = ports.tx_update_rsp.push(self.peek(access.session_id));
            // lock on every read
            self.tx_locked_session = access.session_id;
            self.tx_locked = true;
        }
    }

    fn apply_rx(&mut self, access: StateQuery, deferred: bool, ports: &mut SessionPorts) {
        if access.write {
            if (access.session_id as usize) < MAX_SESSIONS {
                if access.state == SessionState::Closed {
                    let _ = ports.release_session.push(access.session_id);
                    if !deferred {
                        // clear anything still pending in the ack-delay bank
                        let _ = ports.clear_ack_delay.push(access.session_id);
                    }
                    trace!(session = access.session_id, "session closed");
                } else if access.state == SessionState::SynReceived {
                    self.passive_opens += 1;
                    trace!(session = access.session_id, "passive open");
                }
                self.table[access.session_id as usize] = access.state;
            }
            self.rx_locked = false;
        } else {
            let _ = ports.rx_update_rsp.push(self.peek(access.session_id));
            self.rx_locked_session = access.session_id;
            self.rx_locked = true;
        }
    }

    #[inline]
    fn rx_holds(&self, session_id: u16) -> bool {
        self.rx_locked && self.rx_locked_session == session_id
    }

    #[inline]
    fn tx_holds(&self, session_id: u16) -> bool {
        self.tx_locked && self.tx_locked_session == session_id
    }

    /// Service exactly one request, in priority order: tx update,
    /// tx query, rx update, timer release, then the deferred retries.
    pub fn step(&mut self, ports: &mut SessionPorts) {
        if !ports.tx_update_req.is_empty() && !self.tx_wait {
            let access = ports.tx_update_req.pop().unwrap();
            if self.rx_holds(access.session_id) {
                self.tx_pending = access;
                self.tx_wait = true;
            } else {
                self.apply_tx(access, ports);
            }
        } else if !ports.tx_query_req.is_empty() {
            let session_id = ports.tx_query_req.pop().unwrap();
            let state = if (session_id as usize) < MAX_SESSIONS {
                self.table[session_id as usize]
            } else {
                SessionState::Closed
            };
            let _ = ports.tx_query_rsp.push(state);
        } else if !ports.rx_update_req.is_empty() && !self.rx_wait {
            let access = ports.rx_update_req.pop().unwrap();
            if self.tx_holds(access.session_id) {
                self.rx_pending = access;
                self.rx_wait = true;
            } else {
                self.apply_rx(access, false, ports);
            }
        } else if !ports.timer_release.is_empty() && !self.close_wait {
            let session_id = ports.timer_release.pop().unwrap();
            if self.rx_holds(session_id) || self.tx_holds(session_id) {
                self.close_pending = session_id;
                self.close_wait = true;
            } else if let Some(slot) = self.table.get_mut(session_id as usize) {
                *slot = SessionState::Closed;
                let _ = ports.release_session.push(session_id);
            }
        } else if self.tx_wait {
            if !self.rx_holds(self.tx_pending.session_id) {
                let access = self.tx_pending;
                self.apply_tx(access, ports);
                self.tx_wait = false;
            }
        } else if self.rx_wait {
            if !self.tx_holds(self.rx_pending.session_id) {
                let access = self.rx_pending;
                self.apply_rx(access, true, ports);
                self.rx_wait = false;
            }
        } else if self.close_wait
            && !self.rx_holds(self.close_pending)
            && !self.tx_holds(self.close_pending)
        {
            if let Some(slot) = self.table.get_mut(self.close_pending as usize) {
                *slot = SessionState::Closed;
                let _ = ports.release_session.push(self.close_pending);
            }
            self.close_wait = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (SessionStateTable, SessionPorts) {
        (SessionStateTable::new(), SessionPorts::new(8))
    }

    #[test]
    fn test_read_write_cycle() {
        let (mut table, mut ports) = setup();
        ports.tx_update_req.push(StateQuery::read(3)).unwrap();
        table.step(&mut ports);
        assert_eq!(ports.tx_update_rsp.pop(), Some(SessionState::Closed));

        ports.tx_update_req.push(StateQuery::write(3, SessionState::SynSent)).unwrap();
        table.step(&mut ports);
        assert_eq!(table.peek(3), SessionState::SynSent);
        assert_eq!(table.active_opens(), 1);
    }

    #[test]
    fn test_rx_defers_while_tx_locked() {
        let (mut table, mut ports) = setup();
        // tx reads session 5 and holds the lock
        ports.tx_update_req.push(StateQuery::read(5)).unwrap();
        table.step(&mut ports);
        assert!(ports.tx_update_rsp.pop().is_some());

        // rx read of the same session must defer
        ports.rx_update_req.push(StateQuery::read(5)).unwrap();
        table.step(&mut ports);
        assert!(ports.rx_update_rsp.is_empty());

        // tx writes back and releases the lock
        ports.tx_update_req.push(StateQuery::write(5, SessionState::Established)).unwrap();
        table.step(&mut ports);

        // deferred rx request completes on the next step, exactly once
        table.step(&mut ports);
        assert_eq!(ports.rx_update_rsp.pop(), Some(SessionState::Established));
        assert!(ports.rx_update_rsp.is_empty());

        // rx now holds the lock; release it
        ports.rx_update_req.push(StateQuery::write(5, SessionState::Established)).unwrap();
        table.step(&mut ports);
    }

    #[test]
    fn test_same_step_contention_serviced_one_at_a_time() {
        let (mut table, mut ports) = setup();
        ports.tx_update_req.push(StateQuery::read(7)).unwrap();
        ports.rx_update_req.push(StateQuery::read(7)).unwrap();

        // tx has priority and locks; rx defers on the following step
        table.step(&mut ports);
        assert!(ports.tx_update_rsp.pop().is_some());
        table.step(&mut ports);
        assert!(ports.rx_update_rsp.is_empty());

        ports.tx_update_req.push(StateQuery::write(7, SessionState::SynReceived)).unwrap();
        table.step(&mut ports);
        table.step(&mut ports);
        assert_eq!(ports.rx_update_rsp.pop(), Some(SessionState::SynReceived));

        // only the rx write path counts a passive open
        assert_eq!(table.passive_opens(), 0);
        ports.rx_update_req.push(StateQuery::write(7, SessionState::SynReceived)).unwrap();
        table.step(&mut ports);
        assert_eq!(table.passive_opens(), 1);
    }

    #[test]
    fn test_close_emits_release_and_clear() {
        let (mut table, mut ports) = setup();
        ports.rx_update_req.push(StateQuery::write(2, SessionState::Closed)).unwrap();
        table.step(&mut ports);
        assert_eq!(ports.release_session.pop(), Some(2));
        assert_eq!(ports.clear_ack_delay.pop(), Some(2));
    }

    #[test]
    fn test_timer_release_defers_under_lock() {
        let (mut table, mut ports) = setup();
        ports.rx_update_req.push(StateQuery::read(9)).unwrap();
        table.step(&mut ports);
        assert!(ports.rx_update_rsp.pop().is_some());

        ports.timer_release.push(9).unwrap();
        table.step(&mut ports);
        assert!(ports.release_session.is_empty());

        // unlock, then the deferred close applies
        ports.rx_update_req.push(StateQuery::write(9, SessionState::Established)).unwrap();
        table.step(&mut ports);
        table.step(&mut ports);
        assert_eq!(table.peek(9), SessionState::Closed);
        assert_eq!(ports.release_session.pop(), Some(9));
    }

    #[test]
    fn test_query_port_out_of_range() {
        let (mut table, mut ports) = setup();
        ports.tx_query_req.push(1000).unwrap();
        table.step(&mut ports);
        assert_eq!(ports.tx_query_rsp.pop(), Some(SessionState::Closed));
    }

    #[test]
    fn test_out_of_range_updates_ignored() {
        let (mut table, mut ports) = setup();

        ports.tx_update_req.push(StateQuery::write(1000, SessionState::Established)).unwrap();
        table.step(&mut ports);
        assert_eq!(table.active_opens(), 0);

        ports.rx_update_req.push(StateQuery::write(1000, SessionState::Closed)).unwrap();
        table.step(&mut ports);
        assert!(ports.release_session.is_empty());
        assert!(ports.clear_ack_delay.is_empty());

        ports.timer_release.push(1000).unwrap();
        table.step(&mut ports);
        assert!(ports.release_session.is_empty());

        // reads answer Closed and the lock releases normally
        ports.rx_update_req.push(StateQuery::read(1000)).unwrap();
        table.step(&mut ports);
        assert_eq!(ports.rx_update_rsp.pop(), Some(SessionState::Closed));
        ports.rx_update_req.push(StateQuery::write(1000, SessionState::Closed)).unwrap();
        table.step(&mut ports);
        assert_eq!(table.peek(1000), SessionState::Closed);
    }
}
