//! # Tickpath
//!
//! A deterministic market-data line handler and pricing pipeline.
//!
//! ## Design Principles
//!
//! - **Single-Writer**: One thread owns the whole data path (no locks)
//! - **Stepped Stages**: Every stage advances one transition per step,
//!   so any input schedule replays to the same state
//! - **Bounded Everything**: Fixed-capacity streams, tables and
//!   histories; no allocation in the hot path after startup
//!
//! ## Architecture
//!
//! ```text
//! [Feed A/B] --> [Line Filters] --> [Arbitrator] --> [Pricing Engine]
//!                                                          |
//!                                                   [Order Operations]
//!
//! [TCP Events] --> [Event Arbitrator] --> [Ack Delay] --> [Session Table]
//! [ARP Frames] --> [ARP Server] <--> [Resolution Table]
//! ```

pub mod ack_delay;
pub mod arp;
pub mod codec;
pub mod config;
pub mod cuckoo;
pub mod engine;
pub mod feed;
pub mod line_arbitrator;
pub mod line_filter;
pub mod pricing;
pub mod primitives;
pub mod ring_buffer;
pub mod session;
pub mod stream;

// Re-exports for convenience
pub use arp::ArpServer;
pub use codec::{OrderBookResponse, OrderEntryOperation, UdpMeta, Word};
pub use config::{ArbControl, CaptureControl, DataPathConfig, FilterControl, StrategyControl};
pub use cuckoo::CuckooTable;
pub use engine::{DataPath, DataPathStreams, FeedInput};
pub use line_arbitrator::LineArbitrator;
pub use line_filter::LineFilter;
pub use pricing::PricingEngine;
pub use ring_buffer::TimeSeries;
pub use stream::Stream;
