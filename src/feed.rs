//! CSV tick rows and their conversion to wire frames.
//!
//! Replay files carry one quote per row. Prices are decimal strings;
//! they are scaled to integer ticks before they touch the data path.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::codec::{OrderBookResponse, Word, LEVELS, RESPONSE_BEATS};
use crate::UdpMeta;

/// One raw CSV row as the replay files carry it.
#[derive(Debug, Deserialize)]
pub struct TickRow {
    pub security_id: u64,
    pub sequence: u32,
    pub bid_price: Option<Decimal>,
    pub ask_price: Option<Decimal>,
    pub bid_size: Option<Decimal>,
    pub ask_size: Option<Decimal>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// One frame ready for a filter port: the packet meta, the sequence
/// header word and the packed response beats.
#[derive(Debug, Clone)]
pub struct FeedFrame {
    pub meta: UdpMeta,
    pub words: Vec<Word>,
}

impl TickRow {
    /// Convert raw row to a framed book response.
    /// Price multiplier: e.g. 100 for cents.
    pub fn to_frame(
        &self,
        symbol_index: u8,
        meta: UdpMeta,
        price_mult: u64,
    ) -> FeedFrame {
        let scale = |d: Option<Decimal>| {
            d.map(|v| (v * Decimal::from(price_mult)).to_u32().unwrap_or(0))
                .unwrap_or(0)
        };
        let size = |d: Option<Decimal>| d.map(|v| v.to_u32().unwrap_or(0)).unwrap_or(0);

        let response = OrderBookResponse {
            symbol_index,
            timestamp: self
                .timestamp
                .map(|t| t.timestamp_micros() as u64)
                .unwrap_or(0),
            bid_price: scale(self.bid_price),
            ask_price: scale(self.ask_price),
            bid_quantity: {
                let mut q = [0u32; LEVELS];
                q[0] = size(self.bid_size);
                q
            },
            ask_quantity: {
                let mut q = [0u32; LEVELS];
                q[0] = size(self.ask_size);
                q
            },
        };

        let mut words = Vec::with_capacity(RESPONSE_BEATS + 1);
        words.push(Word::body(u64::from(self.sequence)));
        let pack = response.pack();
        for (i, &beat) in pack.beats.iter().enumerate() {
            words.push(if i == RESPONSE_BEATS - 1 {
                Word::tail(beat)
            } else {
                Word::body(beat)
            });
        }
        FeedFrame { meta, words }
    }
}
