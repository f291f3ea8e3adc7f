//! Data path - full feed-to-order pipeline with CPU pinning and warm-up.
//!
//! Composes the two ingress filters, the sequence arbitrator and the
//! pricing engine into one deterministically stepped unit, with I/O
//! handling via rtrb ring buffers when the `runtime` feature is on.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use arrayvec::ArrayVec;

use crate::codec::{OrderBookResponsePack, UdpMeta, Word, RESPONSE_BEATS};
#[cfg(feature = "runtime")]
use crate::codec::OrderEntryOperationPack;
use crate::config::{ArbControl, DataPathConfig, DirectoryError, FilterControl, SecurityDirectory};
use crate::line_arbitrator::{ArbStatus, ArbStreams, LineArbitrator};
use crate::line_filter::{FilterStatus, FilterStreams, LineFilter};
use crate::pricing::{PricingEngine, PricingStatus, PricingStreams, NUM_SYMBOLS};

/// Arbitrated frame length: one sequence header word plus the packed
/// book response beats.
pub const FRAME_WORDS: usize = RESPONSE_BEATS + 1;

/// Default stream depth between stages.
pub const STREAM_DEPTH: usize = 64;

/// One unit of feed input, as the runtime ring buffer carries it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedInput {
    /// Start of a packet on one port.
    Meta { port: u8, meta: UdpMeta },
    /// One payload word on one port.
    Data { port: u8, word: Word },
    /// 100ms clock notification.
    Tick,
}

/// Every inter-stage stream of the data path, owned together so a
/// single `&mut` threads through one step.
pub struct DataPathStreams {
    pub filter: [FilterStreams; 2],
    pub arb: ArbStreams,
    pub pricing: PricingStreams,
}

impl DataPathStreams {
    pub fn new(depth: usize) -> Self {
        Self {
            filter: [FilterStreams::new(depth), FilterStreams::new(depth)],
            arb: ArbStreams::new(depth),
            pricing: PricingStreams::new(depth),
        }
    }
}

/// Merged status snapshot across every stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DataPathStatus {
    pub filters: [FilterStatus; 2],
    pub arbitrator: ArbStatus,
    pub pricing: PricingStatus,
    /// Arbitrated frames whose word count did not match [`FRAME_WORDS`].
    pub malformed_frames: u32,
}

/// The whole feed-to-order pipeline.
pub struct DataPath {
    pub filters: [LineFilter; 2],
    pub arbitrator: LineArbitrator,
    pub pricing: PricingEngine,
    pub directory: SecurityDirectory,
    pub filter_control: FilterControl,
    pub arb_control: ArbControl,
    frame: ArrayVec<u64, FRAME_WORDS>,
    frame_overflow: bool,
    malformed_frames: u32,
}

impl DataPath {
    pub fn new(reset_timer_interval: u32) -> Self {
        Self {
            filters: [LineFilter::new(), LineFilter::new()],
            arbitrator: LineArbitrator::new(reset_timer_interval),
            pricing: PricingEngine::new(),
            directory: SecurityDirectory::new(NUM_SYMBOLS),
            filter_control: FilterControl::empty(),
            arb_control: ArbControl::empty(),
            frame: ArrayVec::new(),
            frame_overflow: false,
            malformed_frames: 0,
        }
    }

    /// Build a data path from a deserialized config file.
    pub fn from_config(config: &DataPathConfig) -> Result<Self, DirectoryError> {
        let mut path = Self::new(config.reset_timer_interval);
        path.filter_control = config.filter_control;
        path.arb_control = config.arb_control;
        path.pricing.strategy_control = config.strategy_control;
        path.pricing.capture_control = config.capture_control;
        for (port, rules) in [&config.port0_rules, &config.port1_rules].into_iter().enumerate() {
            for rule in rules {
                path.filters[port].set_rule(
                    rule.slot,
                    rule.address,
                    u32::from(rule.port),
                    rule.split_id,
                );
            }
        }
        for (index, &security_id) in config.securities.iter().enumerate() {
            path.directory.insert(security_id, index)?;
        }
        Ok(path)
    }

    /// Advance every stage once and move words between them.
    pub fn step(&mut self, streams: &mut DataPathStreams) {
        for (port, filter) in self.filters.iter_mut().enumerate() {
            filter.step(self.filter_control, &mut streams.filter[port]);
        }
        self.couple_filters(streams);
        self.arbitrator.step(self.arb_control, &mut streams.arb);
        self.collect_frames(streams);
        self.pricing.step(&mut streams.pricing);
    }

    /// Move filtered words and split tags to the arbitrator inputs.
    fn couple_filters(&mut self, streams: &mut DataPathStreams) {
        for port in 0..2 {
            let filter = &mut streams.filter[port];
            let (data, split) = if port == 0 {
                (&mut streams.arb.port0, &mut streams.arb.split0)
            } else {
                (&mut streams.arb.port1, &mut streams.arb.split1)
            };
            while !data.is_full() {
                match filter.data_out.pop() {
                    Some(word) => {
                        let _ = data.push(word);
                    }
                    None => break,
                }
            }
            while !split.is_full() {
                match filter.split_out.pop() {
                    Some(id) => {
                        let _ = split.push(id);
                    }
                    None => break,
                }
            }
        }
    }

    /// Reassemble arbitrated words into book responses. The sequence
    /// header word is stripped; anything with the wrong beat count is
    /// dropped and counted.
    fn collect_frames(&mut self, streams: &mut DataPathStreams) {
        while let Some(word) = streams.arb.out.pop() {
            if self.frame.try_push(word.data).is_err() {
                self.frame_overflow = true;
            }
            if !word.last {
                continue;
            }
            if self.frame.len() == FRAME_WORDS && !self.frame_overflow {
                let mut beats = [0u64; RESPONSE_BEATS];
                beats.copy_from_slice(&self.frame[1..]);
                let _ = streams.pricing.response_in.push(OrderBookResponsePack { beats });
            } else {
                self.malformed_frames += 1;
            }
            self.frame.clear();
            self.frame_overflow = false;
        }
    }

    /// Queue a 100ms clock notification for the pricing engine.
    pub fn tick(&mut self, streams: &mut DataPathStreams) {
        let _ = streams.pricing.events.push(0);
    }

    pub fn status(&self) -> DataPathStatus {
        DataPathStatus {
            filters: [self.filters[0].status(), self.filters[1].status()],
            arbitrator: self.arbitrator.status(),
            pricing: self.pricing.status(),
            malformed_frames: self.malformed_frames,
        }
    }

    /// Run the pipeline event loop.
    ///
    /// # Arguments
    /// * `input` - Consumer end of the feed ring buffer
    /// * `output` - Producer end of the order-operation ring buffer
    /// * `pin` - Whether to pin to the last available CPU core
    ///
    /// # Note
    /// This function runs forever (until the program terminates).
    #[cfg(feature = "runtime")]
    pub fn run(
        &mut self,
        input: &mut rtrb::Consumer<FeedInput>,
        output: &mut rtrb::Producer<OrderEntryOperationPack>,
        pin: bool,
    ) {
        if pin {
            self.pin_to_core();
        }
        self.warm_up();

        let mut streams = DataPathStreams::new(STREAM_DEPTH);
        loop {
            while let Ok(item) = input.pop() {
                self.feed(item, &mut streams);
                self.step(&mut streams);
            }
            self.step(&mut streams);
            while let Some(op) = streams.pricing.operation_out.pop() {
                // Best effort - drop if full
                let _ = output.push(op);
            }
            std::hint::spin_loop();
        }
    }

    /// Push one input item into the right stage stream.
    pub fn feed(&mut self, item: FeedInput, streams: &mut DataPathStreams) {
        match item {
            FeedInput::Meta { port, meta } => {
                let _ = streams.filter[usize::from(port & 1)].meta_in.push(meta);
            }
            FeedInput::Data { port, word } => {
                let _ = streams.filter[usize::from(port & 1)].data_in.push(word);
            }
            FeedInput::Tick => self.tick(streams),
        }
    }

    /// Pin the current thread to the last available CPU core.
    ///
    /// The last core is typically isolated from OS interrupts.
    pub fn pin_to_core(&self) {
        if let Some(core_ids) = core_affinity::get_core_ids() {
            if let Some(last_core) = core_ids.last() {
                core_affinity::set_for_current(*last_core);
            }
        }
    }

    /// Warm up the pipeline by pre-faulting the symbol cache.
    pub fn warm_up(&mut self) {
        self.pricing.warm_up();
    }

    /// Compute a hash of the current state (for determinism testing)
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();

        for filter in &self.filters {
            let s = filter.status();
            (s.rx_words, s.rx_meta, s.dropped_words).hash(&mut hasher);
        }

        let arb = self.arbitrator.status();
        (arb.total_sent, arb.total_words_sent, arb.total_missed).hash(&mut hasher);
        (arb.rx_feed, arb.tx_feed, arb.discarded).hash(&mut hasher);
        for split in 0..crate::line_arbitrator::NUM_SPLITS {
            self.arbitrator.expected_seq(split as u8).hash(&mut hasher);
        }

        let pricing = self.pricing.status();
        (pricing.rx_responses, pricing.processed, pricing.tx_operations).hash(&mut hasher);
        for symbol in 0..NUM_SYMBOLS {
            let entry = self.pricing.cache_entry(symbol);
            if entry.valid {
                symbol.hash(&mut hasher);
                (entry.bid_price, entry.ask_price, entry.trade_price).hash(&mut hasher);
                (entry.position_size, entry.pnl_estimate, entry.last_order_id).hash(&mut hasher);
            }
        }

        self.malformed_frames.hash(&mut hasher);
        hasher.finish()
    }
}

impl Default for DataPath {
    fn default() -> Self {
        Self::new(32)
    }
}
