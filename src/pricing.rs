//! Pricing engine: per-symbol market state cache and order-triggering
//! strategies.
//!
//! Four stages mirror the data-path step: `response_pull` unpacks book
//! responses off the wire, `pricing_process` updates the symbol cache
//! and runs the selected strategy, `operation_push` packs triggered
//! operations toward order entry, and `event_handler` drains clock
//! ticks. Strategies are selected per symbol through the strategy
//! registers, or globally when the override bit is set.

use crate::codec::{
    Direction, OrderBookResponse, OrderBookResponsePack, OrderEntryOperation,
    OrderEntryOperationPack, LEVELS, ORDERENTRY_ADD,
};
use crate::config::{CaptureControl, StrategyControl};
use crate::ring_buffer::TimeSeries;
use crate::stream::Stream;

/// Symbols tracked by the cache.
pub const NUM_SYMBOLS: usize = 64;

/// Quantity used by the built-in strategies.
pub const STRATEGY_QUANTITY: u32 = 800;
/// Offset over best bid for the peg strategy.
pub const PEG_OFFSET: u32 = 100;
/// Offset over best bid for the limit strategy.
pub const LIMIT_OFFSET: u32 = 50;

/// Strategy ids as programmed into the select registers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum Strategy {
    #[default]
    None = 0,
    Peg = 1,
    Limit = 2,
}

/// Inferred aggressor side of the last top-of-book change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TradeSide {
    #[default]
    Sell,
    Buy,
}

/// Lifecycle state of a cache slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum SymbolState {
    #[default]
    Idle = 0,
    Running = 1,
    Error = 2,
}

/// Per-symbol strategy programming.
#[derive(Clone, Copy, Debug, Default)]
pub struct StrategyRegisters {
    pub select: u32,
    pub enable: u32,
    pub total_bid: u32,
    pub total_ask: u32,
}

/// Cached market state for one symbol, including the rolling histories
/// the analytics primitives read.
#[derive(Clone, Copy, Debug, Default)]
pub struct CacheEntry {
    pub bid_price: u32,
    pub ask_price: u32,
    /// Mid price, truncating.
    pub trade_price: u32,
    pub bid_size: [u32; LEVELS],
    pub ask_size: [u32; LEVELS],
    pub bid_size_delta: [i32; LEVELS],
    pub ask_size_delta: [i32; LEVELS],
    pub position_size: i64,
    pub pnl_estimate: i64,

    pub bid_price_history: TimeSeries,
    pub ask_price_history: TimeSeries,
    pub trade_price_history: TimeSeries,
    pub bid_size_history: [TimeSeries; LEVELS],
    pub ask_size_history: [TimeSeries; LEVELS],
    pub position_history: TimeSeries,
    pub pnl_history: TimeSeries,

    pub valid: bool,
    pub last_update_bid: [u64; LEVELS],
    pub last_update_ask: [u64; LEVELS],
    pub last_trade_side: TradeSide,
    pub tick_index: u32,
    pub clock_us: u32,
    pub last_order_id: u32,
    pub system_state: SymbolState,
}

/// Counters exposed in the register map.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PricingStatus {
    pub rx_responses: u32,
    pub processed: u32,
    pub tx_operations: u32,
    pub strategy_none: u32,
    pub strategy_peg: u32,
    pub strategy_limit: u32,
    pub strategy_unknown: u32,
    pub rx_events: u32,
}

/// Streams attached to the pricing engine.
pub struct PricingStreams {
    /// Packed book responses from the arbitrated feed.
    pub response_in: Stream<OrderBookResponsePack>,
    /// Packed operations toward order entry.
    pub operation_out: Stream<OrderEntryOperationPack>,
    /// Clock tick generator notifications.
    pub events: Stream<u32>,

    response: Stream<OrderBookResponse>,
    operation: Stream<OrderEntryOperation>,
}

impl PricingStreams {
    pub fn new(depth: usize) -> Self {
        Self {
            response_in: Stream::with_capacity(depth),
            operation_out: Stream::with_capacity(depth),
            events: Stream::with_capacity(depth),
            response: Stream::with_capacity(depth),
            operation: Stream::with_capacity(depth),
        }
    }
}

/// The engine proper.
pub struct PricingEngine {
    pub strategy_control: StrategyControl,
    pub capture_control: CaptureControl,
    pub strategies: Box<[StrategyRegisters]>,

    cache: Box<[CacheEntry]>,
    order_id: u32,
    status: PricingStatus,
    capture: OrderEntryOperationPack,
    /// State register backing the stateful-if primitive.
    pub(crate) primitive_state: u8,
}

impl Default for PricingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PricingEngine {
    pub fn new() -> Self {
        Self {
            strategy_control: StrategyControl::empty(),
            capture_control: CaptureControl::empty(),
            strategies: vec![StrategyRegisters::default(); NUM_SYMBOLS].into_boxed_slice(),
            cache: vec![CacheEntry::default(); NUM_SYMBOLS].into_boxed_slice(),
            order_id: 0,
            status: PricingStatus::default(),
            capture: OrderEntryOperationPack::default(),
            primitive_state: 0,
        }
    }

    #[inline]
    pub fn status(&self) -> PricingStatus {
        self.status
    }

    /// Last packed operation, for host readout.
    #[inline]
    pub fn capture(&self) -> &OrderEntryOperationPack {
        &self.capture
    }

    #[inline]
    pub fn cache_entry(&self, symbol: usize) -> &CacheEntry {
        &self.cache[symbol]
    }

    /// Pre-fault every cache page before the hot loop starts.
    pub fn warm_up(&mut self) {
        for entry in self.cache.iter_mut() {
            // Volatile write to prevent optimization
            unsafe {
                std::ptr::write_volatile(&mut entry.tick_index, 0);
            }
        }
    }

    #[inline]
    pub(crate) fn cache_entry_mut(&mut self, symbol: usize) -> &mut CacheEntry {
        &mut self.cache[symbol]
    }

    /// Unpack one wire response.
    pub fn response_pull(&mut self, streams: &mut PricingStreams) {
        if let Some(pack) = streams.response_in.pop() {
            let response = OrderBookResponse::unpack(&pack);
            let _ = streams.response.push(response);
            self.status.rx_responses += 1;
        }
    }

    /// Update the cache from one response and run the selected strategy.
    pub fn pricing_process(&mut self, streams: &mut PricingStreams) {
        let Some(response) = streams.response.pop() else { return };
        self.status.processed += 1;

        let symbol = response.symbol_index as usize & (NUM_SYMBOLS - 1);
        let select = if self.strategy_control.contains(StrategyControl::GLOBAL_STRATEGY) {
            self.strategy_control.global_id()
        } else {
            self.strategies[symbol].select as u8
        };

        let bid_changed = self.update_cache(symbol, &response);

        let operation = match select {
            s if s == Strategy::None as u8 => {
                self.status.strategy_none += 1;
                None
            }
            s if s == Strategy::Peg as u8 => {
                self.status.strategy_peg += 1;
                bid_changed.then(|| Self::bid_add(&response, symbol, PEG_OFFSET))
            }
            s if s == Strategy::Limit as u8 => {
                self.status.strategy_limit += 1;
                bid_changed.then(|| Self::bid_add(&response, symbol, LIMIT_OFFSET))
            }
            _ => {
                self.status.strategy_unknown += 1;
                None
            }
        };

        if let Some(mut operation) = operation {
            self.order_id += 1;
            operation.order_id = self.order_id;

            let entry = &mut self.cache[symbol];
            entry.last_order_id = self.order_id;
            if operation.direction == Direction::Bid {
                entry.position_size += i64::from(operation.quantity);
            } else {
                entry.position_size -= i64::from(operation.quantity);
            }
            entry.pnl_estimate = entry.position_size
                * (i64::from(entry.trade_price) - i64::from(entry.bid_price));
            entry.position_history.insert(entry.position_size as u32, response.timestamp);
            entry.pnl_history.insert(entry.pnl_estimate as u32, response.timestamp);

            let _ = streams.operation.push(operation);
        }
    }

    /// Pack one triggered operation and update the capture register.
    pub fn operation_push(&mut self, streams: &mut PricingStreams) {
        if let Some(operation) = streams.operation.pop() {
            let pack = operation.pack();
            let _ = streams.operation_out.push(pack);
            self.status.tx_operations += 1;
            if !self.capture_control.contains(CaptureControl::CAPTURE_FREEZE) {
                self.capture = pack;
            }
        }
    }

    /// Count one clock tick notification.
    pub fn event_handler(&mut self, streams: &mut PricingStreams) {
        if streams.events.pop().is_some() {
            self.status.rx_events += 1;
        }
    }

    /// Advance every stage once.
    pub fn step(&mut self, streams: &mut PricingStreams) {
        self.response_pull(streams);
        self.pricing_process(streams);
        self.operation_push(streams);
        self.event_handler(streams);
    }

    /// Fold one response into the symbol cache. Returns whether the
    /// best bid moved, which is what the built-in strategies key on.
    fn update_cache(&mut self, symbol: usize, response: &OrderBookResponse) -> bool {
        let entry = &mut self.cache[symbol];
        let ts = response.timestamp;

        entry.tick_index = entry.tick_index.wrapping_add(1);
        entry.clock_us = ts as u32;
        entry.valid = true;

        let new_bid = response.bid_price;
        let new_ask = response.ask_price;
        let bid_changed = entry.bid_price != new_bid;

        if bid_changed {
            entry.last_trade_side = TradeSide::Buy;
        } else if entry.ask_price != new_ask {
            entry.last_trade_side = TradeSide::Sell;
        }

        for i in 0..LEVELS {
            let nb = response.bid_quantity[i];
            let na = response.ask_quantity[i];
            entry.bid_size_delta[i] = nb.wrapping_sub(entry.bid_size[i]) as i32;
            entry.ask_size_delta[i] = na.wrapping_sub(entry.ask_size[i]) as i32;
            if nb != entry.bid_size[i] {
                entry.last_update_bid[i] = ts;
            }
            if na != entry.ask_size[i] {
                entry.last_update_ask[i] = ts;
            }
            entry.bid_size[i] = nb;
            entry.ask_size[i] = na;
            entry.bid_size_history[i].insert(nb, ts);
            entry.ask_size_history[i].insert(na, ts);
        }

        entry.bid_price = new_bid;
        entry.ask_price = new_ask;
        entry.trade_price = new_bid.wrapping_add(new_ask) / 2;
        entry.system_state = SymbolState::Running;

        entry.bid_price_history.insert(new_bid, ts);
        entry.ask_price_history.insert(new_ask, ts);
        entry.trade_price_history.insert(entry.trade_price, ts);

        bid_changed
    }

    fn bid_add(response: &OrderBookResponse, symbol: usize, offset: u32) -> OrderEntryOperation {
        OrderEntryOperation {
            timestamp: response.timestamp,
            op_code: ORDERENTRY_ADD,
            symbol_index: symbol as u8,
            order_id: 0,
            quantity: STRATEGY_QUANTITY,
            price: response.bid_price.wrapping_add(offset),
            direction: Direction::Bid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(symbol: u8, ts: u64, bid: u32, ask: u32) -> OrderBookResponse {
        OrderBookResponse {
            symbol_index: symbol,
            timestamp: ts,
            bid_price: bid,
            ask_price: ask,
            bid_quantity: [100, 80, 60, 40, 20],
            ask_quantity: [90, 70, 50, 30, 10],
        }
    }

    fn feed(engine: &mut PricingEngine, streams: &mut PricingStreams, r: OrderBookResponse) {
        streams.response_in.push(r.pack()).unwrap();
        // pull, process, push each need a step
        engine.step(streams);
        engine.step(streams);
        engine.step(streams);
    }

    fn setup_peg(symbol: usize) -> (PricingEngine, PricingStreams) {
        let mut engine = PricingEngine::new();
        engine.strategies[symbol].select = Strategy::Peg as u32;
        (engine, PricingStreams::new(16))
    }

    #[test]
    fn test_peg_emits_add_on_bid_change() {
        let (mut engine, mut streams) = setup_peg(3);
        feed(&mut engine, &mut streams, response(3, 1000, 25_000, 25_010));

        let op = OrderEntryOperation::unpack(&streams.operation_out.pop().unwrap());
        assert_eq!(op.op_code, ORDERENTRY_ADD);
        assert_eq!(op.symbol_index, 3);
        assert_eq!(op.price, 25_100);
        assert_eq!(op.quantity, STRATEGY_QUANTITY);
        assert_eq!(op.direction, Direction::Bid);
        assert_eq!(op.order_id, 1);
        assert_eq!(engine.status().strategy_peg, 1);
    }

    #[test]
    fn test_unchanged_bid_triggers_nothing() {
        let (mut engine, mut streams) = setup_peg(3);
        feed(&mut engine, &mut streams, response(3, 1000, 25_000, 25_010));
        streams.operation_out.pop().unwrap();

        // same bid, moved ask
        feed(&mut engine, &mut streams, response(3, 1001, 25_000, 25_020));
        assert!(streams.operation_out.is_empty());
        assert_eq!(engine.status().strategy_peg, 2);
        assert_eq!(engine.cache_entry(3).last_trade_side, TradeSide::Sell);
    }

    #[test]
    fn test_limit_prices_at_bid_plus_fifty() {
        let mut engine = PricingEngine::new();
        engine.strategies[7].select = Strategy::Limit as u32;
        let mut streams = PricingStreams::new(16);
        feed(&mut engine, &mut streams, response(7, 5, 1_000, 1_004));

        let op = OrderEntryOperation::unpack(&streams.operation_out.pop().unwrap());
        assert_eq!(op.price, 1_050);
        assert_eq!(engine.status().strategy_limit, 1);
    }

    #[test]
    fn test_global_override_ignores_symbol_select() {
        let mut engine = PricingEngine::new();
        engine.strategies[2].select = Strategy::Limit as u32;
        engine.strategy_control =
            StrategyControl::GLOBAL_STRATEGY | StrategyControl(Strategy::Peg as u32);
        let mut streams = PricingStreams::new(16);
        feed(&mut engine, &mut streams, response(2, 9, 500, 504));

        let op = OrderEntryOperation::unpack(&streams.operation_out.pop().unwrap());
        assert_eq!(op.price, 600);
        assert_eq!(engine.status().strategy_peg, 1);
        assert_eq!(engine.status().strategy_limit, 0);
    }

    #[test]
    fn test_unknown_strategy_counted() {
        let mut engine = PricingEngine::new();
        engine.strategies[0].select = 99;
        let mut streams = PricingStreams::new(16);
        feed(&mut engine, &mut streams, response(0, 1, 10, 12));
        assert!(streams.operation_out.is_empty());
        assert_eq!(engine.status().strategy_unknown, 1);
    }

    #[test]
    fn test_cache_update_and_mid_price() {
        let (mut engine, mut streams) = setup_peg(1);
        feed(&mut engine, &mut streams, response(1, 77, 101, 104));

        let entry = engine.cache_entry(1);
        assert!(entry.valid);
        assert_eq!(entry.tick_index, 1);
        assert_eq!(entry.clock_us, 77);
        assert_eq!(entry.bid_price, 101);
        assert_eq!(entry.ask_price, 104);
        // truncating mid
        assert_eq!(entry.trade_price, 102);
        assert_eq!(entry.bid_size[0], 100);
        assert_eq!(entry.ask_size[4], 10);
        assert_eq!(entry.last_trade_side, TradeSide::Buy);
        assert_eq!(entry.system_state, SymbolState::Running);
        assert_eq!(entry.bid_price_history.latest(), 101);
    }

    #[test]
    fn test_position_and_pnl_update() {
        let (mut engine, mut streams) = setup_peg(4);
        feed(&mut engine, &mut streams, response(4, 1, 1_000, 1_010));
        // one bid-side fill of the strategy quantity
        let entry = engine.cache_entry(4);
        assert_eq!(entry.position_size, i64::from(STRATEGY_QUANTITY));
        // pnl = position * (mid - bid)
        assert_eq!(entry.pnl_estimate, i64::from(STRATEGY_QUANTITY) * 5);
        assert_eq!(entry.last_order_id, 1);
    }

    #[test]
    fn test_order_ids_monotonic_across_symbols() {
        let mut engine = PricingEngine::new();
        engine.strategies[0].select = Strategy::Peg as u32;
        engine.strategies[1].select = Strategy::Peg as u32;
        let mut streams = PricingStreams::new(16);
        feed(&mut engine, &mut streams, response(0, 1, 100, 104));
        feed(&mut engine, &mut streams, response(1, 2, 200, 204));
        feed(&mut engine, &mut streams, response(0, 3, 101, 104));

        let ids: Vec<u32> = std::iter::from_fn(|| streams.operation_out.pop())
            .map(|p| OrderEntryOperation::unpack(&p).order_id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_capture_freeze_holds_last_operation() {
        let (mut engine, mut streams) = setup_peg(0);
        feed(&mut engine, &mut streams, response(0, 1, 100, 104));
        let first = *engine.capture();

        engine.capture_control = CaptureControl::CAPTURE_FREEZE;
        feed(&mut engine, &mut streams, response(0, 2, 110, 114));
        assert_eq!(engine.capture().beats, first.beats);
        assert_eq!(engine.status().tx_operations, 2);
    }

    #[test]
    fn test_event_handler_counts_ticks() {
        let mut engine = PricingEngine::new();
        let mut streams = PricingStreams::new(16);
        streams.events.push(1).unwrap();
        streams.events.push(2).unwrap();
        engine.step(&mut streams);
        engine.step(&mut streams);
        assert_eq!(engine.status().rx_events, 2);
    }
}
