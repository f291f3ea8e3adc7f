//! Analytics primitives over the pricing cache.
//!
//! Building blocks for strategy logic: snapshots and deltas of the
//! cached book, windowed statistics over the per-field histories, and
//! a handful of signal detectors. Everything is integer or fixed-point
//! arithmetic so results are bit-reproducible across runs.

use crate::codec::LEVELS;
use crate::pricing::{CacheEntry, PricingEngine, NUM_SYMBOLS};
use crate::ring_buffer::TimeSeries;

/// Fractional bits of the fixed-point imbalance ratio.
pub const IMBALANCE_FRAC_BITS: u32 = 14;

/// One level of a book snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BookLevel {
    pub bid_price: u32,
    pub bid_size: u32,
    pub ask_price: u32,
    pub ask_size: u32,
}

/// Fixed-depth snapshot of one symbol's cached book.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BookSnapshot {
    pub levels: [BookLevel; LEVELS],
}

/// Selects which per-symbol history a windowed query reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    BidPrice,
    AskPrice,
    TradePrice,
    BidSize,
    AskSize,
    PositionSize,
    PnlEstimate,
}

fn series_of(entry: &CacheEntry, field: Field, level: usize) -> &TimeSeries {
    match field {
        Field::BidPrice => &entry.bid_price_history,
        Field::AskPrice => &entry.ask_price_history,
        Field::TradePrice => &entry.trade_price_history,
        Field::BidSize => &entry.bid_size_history[level.min(LEVELS - 1)],
        Field::AskSize => &entry.ask_size_history[level.min(LEVELS - 1)],
        Field::PositionSize => &entry.position_history,
        Field::PnlEstimate => &entry.pnl_history,
    }
}

impl PricingEngine {
    /// Cached book down to `depth` levels; deeper levels are zeroed.
    /// Level 0 prices are best bid/ask; the cache keeps sizes per level
    /// but only top-of-book prices.
    pub fn book_snapshot(&self, symbol: usize, depth: usize) -> BookSnapshot {
        let entry = self.cache_entry(symbol & (NUM_SYMBOLS - 1));
        let depth = depth.min(LEVELS);
        let mut snapshot = BookSnapshot::default();
        for (i, level) in snapshot.levels.iter_mut().take(depth).enumerate() {
            level.bid_price = if i == 0 { entry.bid_price } else { 0 };
            level.ask_price = if i == 0 { entry.ask_price } else { 0 };
            level.bid_size = entry.bid_size[i];
            level.ask_size = entry.ask_size[i];
        }
        snapshot
    }

    /// Size change at one book level in the last update.
    pub fn order_delta(&self, symbol: usize, level: usize, bid_side: bool) -> i32 {
        if level >= LEVELS {
            return 0;
        }
        let entry = self.cache_entry(symbol & (NUM_SYMBOLS - 1));
        if bid_side {
            entry.bid_size_delta[level]
        } else {
            entry.ask_size_delta[level]
        }
    }

    /// Time since the size at one level last changed.
    pub fn time_since_update(&self, symbol: usize, level: usize, bid_side: bool, now: u64) -> u64 {
        if level >= LEVELS {
            return 0;
        }
        let entry = self.cache_entry(symbol & (NUM_SYMBOLS - 1));
        let last = if bid_side {
            entry.last_update_bid[level]
        } else {
            entry.last_update_ask[level]
        };
        now.wrapping_sub(last)
    }

    pub fn series(&self, symbol: usize, field: Field, level: usize) -> &TimeSeries {
        series_of(self.cache_entry(symbol & (NUM_SYMBOLS - 1)), field, level)
    }

    pub fn moving_avg(&self, symbol: usize, field: Field, window: usize, level: usize) -> u32 {
        self.series(symbol, field, level).moving_avg(window)
    }

    pub fn moving_sum(&self, symbol: usize, field: Field, window: usize, level: usize) -> u32 {
        self.series(symbol, field, level).moving_sum(window)
    }

    pub fn moving_max(&self, symbol: usize, field: Field, window: usize, level: usize) -> u32 {
        self.series(symbol, field, level).moving_max(window)
    }

    pub fn moving_min(&self, symbol: usize, field: Field, window: usize, level: usize) -> u32 {
        self.series(symbol, field, level).moving_min(window)
    }

    pub fn exp_avg(&self, symbol: usize, field: Field, alpha: u8, window: usize, level: usize) -> u32 {
        self.series(symbol, field, level).exp_avg(alpha, window)
    }

    pub fn derivative(&self, symbol: usize, field: Field, level: usize) -> u32 {
        self.series(symbol, field, level).derivative()
    }

    /// +1 when `fast` crossed above `slow` on the newest sample, -1 when
    /// it crossed below, 0 otherwise or with short history.
    pub fn crossover(fast: &TimeSeries, slow: &TimeSeries) -> i32 {
        if fast.count() < 2 || slow.count() < 2 {
            return 0;
        }
        let (prev_f, curr_f) = (fast.prev(1), fast.latest());
        let (prev_s, curr_s) = (slow.prev(1), slow.latest());
        if prev_f <= prev_s && curr_f > curr_s {
            1
        } else if prev_f >= prev_s && curr_f < curr_s {
            -1
        } else {
            0
        }
    }

    /// `(bid - ask) / (bid + ask)` as a Q2.14 fixed-point ratio in
    /// [-1.0, 1.0]; zero when both volumes are zero.
    pub fn imbalance(bid_volume: u32, ask_volume: u32) -> i32 {
        let total = i64::from(bid_volume) + i64::from(ask_volume);
        if total == 0 {
            return 0;
        }
        let diff = i64::from(bid_volume) - i64::from(ask_volume);
        ((diff << IMBALANCE_FRAC_BITS) / total) as i32
    }

    /// True when the newest mid price moved more than `threshold` from
    /// the previous one.
    pub fn price_jump(&self, symbol: usize, threshold: u32) -> bool {
        let series = &self.cache_entry(symbol & (NUM_SYMBOLS - 1)).trade_price_history;
        let curr = series.latest();
        let prev = series.prev(1);
        curr.abs_diff(prev) > threshold
    }

    /// True when the newest sample deviates from the window mean by
    /// more than `threshold` standard deviations. Compares squares so
    /// no square root is needed: with n samples of sum S,
    /// `(x*n - S)^2 * n > t^2 * sum((v*n - S)^2)`.
    pub fn spike(series: &TimeSeries, threshold: u32) -> bool {
        let n = series.count() as i128;
        if n < 2 {
            return false;
        }
        let mut sum: i128 = 0;
        for i in 0..series.count() {
            sum += i128::from(series.prev(i));
        }
        let mut var_scaled: i128 = 0;
        for i in 0..series.count() {
            let d = i128::from(series.prev(i)) * n - sum;
            var_scaled += d * d;
        }
        let delta = i128::from(series.latest()) * n - sum;
        delta * delta * n > i128::from(threshold).pow(2) * var_scaled
    }

    /// Signed bid-minus-ask size over an arbitrary set of levels.
    /// Out-of-range levels are ignored.
    pub fn book_pressure(&self, symbol: usize, levels: &[usize]) -> i32 {
        let entry = self.cache_entry(symbol & (NUM_SYMBOLS - 1));
        let mut bid_sum: i64 = 0;
        let mut ask_sum: i64 = 0;
        for &level in levels {
            if level < LEVELS {
                bid_sum += i64::from(entry.bid_size[level]);
                ask_sum += i64::from(entry.ask_size[level]);
            }
        }
        (bid_sum - ask_sum) as i32
    }

    /// Latches `state` while `condition` holds; returns the latched
    /// state either way.
    pub fn stateful_if(&mut self, condition: bool, state: u8) -> u8 {
        if condition {
            self.primitive_state = state;
        }
        self.primitive_state
    }

    /// The value `delay` samples back, or 0 until enough history has
    /// accumulated.
    pub fn latency_gate(series: &TimeSeries, delay: usize) -> u32 {
        if series.count() <= delay {
            return 0;
        }
        series.prev(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::OrderBookResponse;
    use crate::pricing::{PricingEngine, PricingStreams};

    fn engine_with(responses: &[OrderBookResponse]) -> PricingEngine {
        let mut engine = PricingEngine::new();
        let mut streams = PricingStreams::new(64);
        for r in responses {
            streams.response_in.push(r.pack()).unwrap();
            engine.step(&mut streams);
        }
        engine
    }

    fn response(ts: u64, bid: u32, ask: u32, bid_qty: [u32; LEVELS], ask_qty: [u32; LEVELS]) -> OrderBookResponse {
        OrderBookResponse {
            symbol_index: 0,
            timestamp: ts,
            bid_price: bid,
            ask_price: ask,
            bid_quantity: bid_qty,
            ask_quantity: ask_qty,
        }
    }

    #[test]
    fn test_snapshot_zero_fills_beyond_depth() {
        let engine = engine_with(&[response(1, 100, 104, [10, 9, 8, 7, 6], [5, 4, 3, 2, 1])]);
        let snap = engine.book_snapshot(0, 2);
        assert_eq!(snap.levels[0].bid_price, 100);
        assert_eq!(snap.levels[0].ask_size, 5);
        assert_eq!(snap.levels[1].bid_size, 9);
        assert_eq!(snap.levels[2], BookLevel::default());
        assert_eq!(snap.levels[4], BookLevel::default());
    }

    #[test]
    fn test_order_delta_tracks_size_changes() {
        let engine = engine_with(&[
            response(1, 100, 104, [10, 9, 8, 7, 6], [5, 4, 3, 2, 1]),
            response(2, 100, 104, [14, 9, 8, 7, 6], [2, 4, 3, 2, 1]),
        ]);
        assert_eq!(engine.order_delta(0, 0, true), 4);
        assert_eq!(engine.order_delta(0, 0, false), -3);
        assert_eq!(engine.order_delta(0, 1, true), 0);
        assert_eq!(engine.order_delta(0, 9, true), 0);
    }

    #[test]
    fn test_time_since_update() {
        let engine = engine_with(&[
            response(100, 100, 104, [10, 9, 8, 7, 6], [5, 4, 3, 2, 1]),
            response(250, 100, 104, [14, 9, 8, 7, 6], [5, 4, 3, 2, 1]),
        ]);
        // level 0 bid changed at ts 250, level 1 bid last changed at 100
        assert_eq!(engine.time_since_update(0, 0, true, 300), 50);
        assert_eq!(engine.time_since_update(0, 1, true, 300), 200);
    }

    #[test]
    fn test_windowed_stats_over_price_history() {
        let engine = engine_with(&[
            response(1, 100, 110, [1; LEVELS], [1; LEVELS]),
            response(2, 104, 110, [1; LEVELS], [1; LEVELS]),
            response(3, 96, 110, [1; LEVELS], [1; LEVELS]),
        ]);
        assert_eq!(engine.moving_avg(0, Field::BidPrice, 8, 0), 100);
        assert_eq!(engine.moving_sum(0, Field::BidPrice, 2, 0), 200);
        assert_eq!(engine.moving_max(0, Field::BidPrice, 8, 0), 104);
        assert_eq!(engine.moving_min(0, Field::BidPrice, 8, 0), 96);
    }

    #[test]
    fn test_crossover_detects_both_directions() {
        let mut fast = TimeSeries::new();
        let mut slow = TimeSeries::new();
        for (f, s) in [(10, 20), (30, 20)] {
            fast.insert(f, 0);
            slow.insert(s, 0);
        }
        assert_eq!(PricingEngine::crossover(&fast, &slow), 1);

        fast.insert(10, 0);
        slow.insert(20, 0);
        assert_eq!(PricingEngine::crossover(&fast, &slow), -1);

        let empty = TimeSeries::new();
        assert_eq!(PricingEngine::crossover(&fast, &empty), 0);
    }

    #[test]
    fn test_imbalance_fixed_point() {
        assert_eq!(PricingEngine::imbalance(0, 0), 0);
        assert_eq!(PricingEngine::imbalance(100, 0), 1 << IMBALANCE_FRAC_BITS);
        assert_eq!(PricingEngine::imbalance(0, 100), -(1 << IMBALANCE_FRAC_BITS));
        // 300 vs 100 -> +0.5
        assert_eq!(PricingEngine::imbalance(300, 100), 1 << (IMBALANCE_FRAC_BITS - 1));
    }

    #[test]
    fn test_price_jump() {
        let engine = engine_with(&[
            response(1, 100, 104, [1; LEVELS], [1; LEVELS]),
            response(2, 160, 164, [1; LEVELS], [1; LEVELS]),
        ]);
        // mid moved 102 -> 162
        assert!(engine.price_jump(0, 50));
        assert!(!engine.price_jump(0, 70));
    }

    #[test]
    fn test_spike_on_outlier() {
        let mut series = TimeSeries::new();
        for v in [100, 101, 99, 100, 100] {
            series.insert(v, 0);
        }
        assert!(!PricingEngine::spike(&series, 2));
        series.insert(200, 0);
        // the outlier sits in its own window, about 2.2 sigma out
        assert!(PricingEngine::spike(&series, 2));
        assert!(!PricingEngine::spike(&series, 3));
    }

    #[test]
    fn test_book_pressure_ignores_bad_levels() {
        let engine = engine_with(&[response(1, 100, 104, [10, 9, 8, 7, 6], [5, 4, 3, 2, 1])]);
        assert_eq!(engine.book_pressure(0, &[0, 1]), (10 + 9) - (5 + 4));
        assert_eq!(engine.book_pressure(0, &[0, 9]), 10 - 5);
    }

    #[test]
    fn test_stateful_if_latches() {
        let mut engine = PricingEngine::new();
        assert_eq!(engine.stateful_if(false, 7), 0);
        assert_eq!(engine.stateful_if(true, 7), 7);
        assert_eq!(engine.stateful_if(false, 3), 7);
    }

    #[test]
    fn test_latency_gate_needs_history() {
        let mut series = TimeSeries::new();
        series.insert(5, 0);
        assert_eq!(PricingEngine::latency_gate(&series, 2), 0);
        series.insert(6, 1);
        series.insert(7, 2);
        assert_eq!(PricingEngine::latency_gate(&series, 2), 5);
    }
}
