//! TimeSeries - Fixed-window ring buffer with derived statistics.
//!
//! Backs the per-symbol analytics in the pricing engine. Capacity is a
//! compile-time window of 8 samples; once full, the oldest sample is
//! overwritten. All queries operate over `min(window, count)` samples
//! so short histories never read uninitialized slots.

/// Number of samples retained per tracked field.
pub const MAX_WINDOW: usize = 8;

/// One sample: a value and the timestamp it was observed at.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sample {
    pub value: u32,
    pub timestamp: u64,
}

/// Circular time-series buffer of the latest `MAX_WINDOW` samples.
///
/// `index` always points at the slot the next insert will overwrite;
/// `count` saturates at `MAX_WINDOW`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TimeSeries {
    buffer: [Sample; MAX_WINDOW],
    index: usize,
    count: usize,
}

impl TimeSeries {
    pub const fn new() -> Self {
        Self {
            buffer: [Sample { value: 0, timestamp: 0 }; MAX_WINDOW],
            index: 0,
            count: 0,
        }
    }

    /// Number of valid samples currently held (saturates at the window).
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Insert a new sample, overwriting the oldest once the window is full.
    #[inline]
    pub fn insert(&mut self, value: u32, timestamp: u64) {
        self.buffer[self.index] = Sample { value, timestamp };
        self.index = (self.index + 1) % MAX_WINDOW;
        if self.count < MAX_WINDOW {
            self.count += 1;
        }
    }

    /// Most recent value, or 0 if the buffer is empty.
    #[inline]
    pub fn latest(&self) -> u32 {
        if self.count == 0 {
            return 0;
        }
        let last = if self.index == 0 { MAX_WINDOW - 1 } else { self.index - 1 };
        self.buffer[last].value
    }

    /// Value `n` samples back (`prev(1)` is the one before the latest).
    /// Returns 0 when the history is too short.
    #[inline]
    pub fn prev(&self, n: usize) -> u32 {
        if n >= self.count {
            return 0;
        }
        let pos = (self.index + MAX_WINDOW - 1 - n) % MAX_WINDOW;
        self.buffer[pos].value
    }

    /// Number of samples a windowed query actually covers.
    #[inline]
    fn effective(&self, window: usize) -> usize {
        window.min(self.count)
    }

    /// Slot index of the sample `i` places back from the newest.
    #[inline]
    fn back(&self, i: usize) -> usize {
        (self.index + MAX_WINDOW - 1 - i) % MAX_WINDOW
    }

    /// Arithmetic mean of the newest `window` samples (integer division).
    pub fn moving_avg(&self, window: usize) -> u32 {
        let actual = self.effective(window);
        if actual == 0 {
            return 0;
        }
        let mut sum: u64 = 0;
        for i in 0..actual {
            sum += u64::from(self.buffer[self.back(i)].value);
        }
        (sum / actual as u64) as u32
    }

    /// Sum of the newest `window` samples, truncated to 32 bits as the
    /// register surface expects.
    pub fn moving_sum(&self, window: usize) -> u32 {
        let actual = self.effective(window);
        let mut sum: u64 = 0;
        for i in 0..actual {
            sum += u64::from(self.buffer[self.back(i)].value);
        }
        sum as u32
    }

    /// Maximum of the newest `window` samples (0 when empty).
    pub fn moving_max(&self, window: usize) -> u32 {
        let actual = self.effective(window);
        let mut max = 0u32;
        for i in 0..actual {
            let v = self.buffer[self.back(i)].value;
            if v > max {
                max = v;
            }
        }
        max
    }

    /// Minimum of the newest `window` samples (u32::MAX when empty).
    pub fn moving_min(&self, window: usize) -> u32 {
        let actual = self.effective(window);
        let mut min = u32::MAX;
        for i in 0..actual {
            let v = self.buffer[self.back(i)].value;
            if v < min {
                min = v;
            }
        }
        min
    }

    /// Exponentially weighted average seeded with the newest sample and
    /// folded towards older samples; `alpha` is a fixed-point weight in
    /// [0, 255] applied as `alpha/256`.
    pub fn exp_avg(&self, alpha: u8, window: usize) -> u32 {
        if self.count == 0 {
            return 0;
        }
        let actual = self.effective(window);
        let mut ema = u64::from(self.buffer[self.back(0)].value);
        for i in 1..actual {
            let v = u64::from(self.buffer[self.back(i)].value);
            ema = (u64::from(alpha) * v + u64::from(255 - alpha) * ema) >> 8;
        }
        ema as u32
    }

    /// First difference of the two newest samples divided by their time
    /// delta. Returns 0 with fewer than two samples or a zero delta.
    /// Wrapping subtraction matches the fixed-width arithmetic of the
    /// register surface when the value decreases.
    pub fn derivative(&self) -> u32 {
        if self.count < 2 {
            return 0;
        }
        let newest = self.buffer[self.back(0)];
        let prev = self.buffer[self.back(1)];
        let dv = newest.value.wrapping_sub(prev.value);
        let dt = newest.timestamp.wrapping_sub(prev.timestamp);
        if dt == 0 {
            0
        } else {
            (u64::from(dv) / dt) as u32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(values: &[u32]) -> TimeSeries {
        let mut ts = TimeSeries::new();
        for (i, &v) in values.iter().enumerate() {
            ts.insert(v, i as u64);
        }
        ts
    }

    #[test]
    fn test_latest_and_prev() {
        let ts = filled(&[10, 20, 30]);
        assert_eq!(ts.latest(), 30);
        assert_eq!(ts.prev(1), 20);
        assert_eq!(ts.prev(2), 10);
        assert_eq!(ts.prev(7), 0); // beyond history
    }

    #[test]
    fn test_moving_avg_short_history() {
        // 3 samples, window of 8: must average only the 3 present
        let ts = filled(&[10, 20, 30]);
        assert_eq!(ts.moving_avg(8), 20);
        assert_eq!(ts.moving_avg(2), 25);
    }

    #[test]
    fn test_saturation_after_full_window() {
        let mut ts = TimeSeries::new();
        for i in 0..MAX_WINDOW as u32 {
            ts.insert(i, u64::from(i));
        }
        assert_eq!(ts.count(), MAX_WINDOW);
        // next insert overwrites slot 0 (the oldest), count stays pinned
        ts.insert(100, 100);
        assert_eq!(ts.count(), MAX_WINDOW);
        assert_eq!(ts.latest(), 100);
        // the oldest surviving sample is now value 1
        assert_eq!(ts.moving_min(MAX_WINDOW), 1);
    }

    #[test]
    fn test_moving_min_max_sum() {
        let ts = filled(&[5, 9, 2, 7]);
        assert_eq!(ts.moving_max(8), 9);
        assert_eq!(ts.moving_min(8), 2);
        assert_eq!(ts.moving_sum(8), 23);
        assert_eq!(ts.moving_max(1), 7);
        assert_eq!(ts.moving_min(2), 2);
    }

    #[test]
    fn test_empty_queries() {
        let ts = TimeSeries::new();
        assert_eq!(ts.latest(), 0);
        assert_eq!(ts.moving_avg(8), 0);
        assert_eq!(ts.moving_sum(8), 0);
        assert_eq!(ts.moving_max(8), 0);
        assert_eq!(ts.moving_min(8), u32::MAX);
        assert_eq!(ts.exp_avg(32, 8), 0);
        assert_eq!(ts.derivative(), 0);
    }

    #[test]
    fn test_exp_avg_single_sample_is_identity() {
        let ts = filled(&[42]);
        assert_eq!(ts.exp_avg(32, 8), 42);
    }

    #[test]
    fn test_derivative() {
        let mut ts = TimeSeries::new();
        ts.insert(100, 10);
        ts.insert(160, 20);
        // (160-100)/(20-10) = 6
        assert_eq!(ts.derivative(), 6);

        // zero time delta short-circuits to 0
        let mut flat = TimeSeries::new();
        flat.insert(1, 5);
        flat.insert(9, 5);
        assert_eq!(flat.derivative(), 0);
    }
}
