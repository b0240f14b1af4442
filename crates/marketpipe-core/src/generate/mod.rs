//! Synthetic record generators.
//!
//! One generator per record type, each behind the [`RecordGenerator`] seam so
//! the producer loop can drive any of them uniformly. Generators own their
//! RNG; construct with [`RecordGenerator`] impls directly in tests to seed it.

mod ack;

pub use ack::{AckGenerator, OrderTracker, TrackedOrder};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

use marketpipe_types::{
    AckRecord, MakerTaker, PriceIndexRecord, RecordType, TickerRecord, TradeRecord,
};

/// Epoch seconds with sub-second precision, the timestamp convention of every
/// record type.
pub(crate) fn now_epoch() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// A generated record paired with its partition key.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratedRecord {
    Ticker(TickerRecord),
    Trade(TradeRecord),
    Ack(AckRecord),
    Index(PriceIndexRecord),
}

impl GeneratedRecord {
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Ticker(_) => RecordType::Ticker,
            Self::Trade(_) => RecordType::Trade,
            Self::Ack(_) => RecordType::Ack,
            Self::Index(_) => RecordType::Index,
        }
    }

    /// Partition key: instrument/index name for market data, order identity
    /// for order-flow records so updates for one order stay ordered.
    pub fn key(&self) -> &str {
        match self {
            Self::Ticker(t) => &t.instrument_name,
            Self::Trade(t) => &t.trade_id,
            Self::Ack(a) => &a.order_id,
            Self::Index(i) => &i.index_name,
        }
    }
}

pub trait RecordGenerator: Send {
    fn record_type(&self) -> RecordType;
    fn generate(&mut self) -> GeneratedRecord;
}

/// Build the generator for a record type.
pub fn generator_for(record_type: RecordType) -> Box<dyn RecordGenerator> {
    match record_type {
        RecordType::Ticker => Box::new(TickerGenerator::new()),
        RecordType::Trade => Box::new(TradeGenerator::new()),
        RecordType::Ack => Box::new(AckGenerator::new()),
        RecordType::Index => Box::new(IndexGenerator::new()),
    }
}

// ---------------------------------------------------------------------------
// Ticker
// ---------------------------------------------------------------------------

pub struct TickerGenerator {
    rng: StdRng,
}

impl TickerGenerator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self { rng }
    }
}

impl Default for TickerGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordGenerator for TickerGenerator {
    fn record_type(&self) -> RecordType {
        RecordType::Ticker
    }

    fn generate(&mut self) -> GeneratedRecord {
        let rng = &mut self.rng;
        let base_price = rng.gen_range(95_000.0..97_000.0);
        let bid_price = base_price - rng.gen_range(10.0..30.0);
        let ask_price = base_price + rng.gen_range(10.0..30.0);

        GeneratedRecord::Ticker(TickerRecord {
            instrument_name: "BTC-PERPETUAL".to_string(),
            mark_price: base_price,
            mark_timestamp: now_epoch(),
            best_bid_price: bid_price,
            best_bid_amount: rng.gen_range(0.01..0.1),
            best_ask_price: ask_price,
            best_ask_amount: rng.gen_range(0.01..0.1),
            last_price: base_price + rng.gen_range(-50.0..50.0),
            delta: 1.0,
            volume_24h: rng.gen_range(700.0..800.0),
            value_24h: rng.gen_range(68_000_000.0..69_000_000.0),
            low_price_24h: rng.gen_range(93_000.0..94_000.0),
            high_price_24h: rng.gen_range(97_000.0..98_000.0),
            change_24h: rng.gen_range(2_000.0..3_500.0),
            index_price: base_price - rng.gen_range(-10.0..10.0),
            forward: base_price - rng.gen_range(-10.0..10.0),
            funding_mark: rng.gen_range(0.0..0.001),
            funding_rate: rng.gen_range(0.0..0.001),
            collar_low: base_price * 0.99,
            collar_high: base_price * 1.01,
            realised_funding_24h: rng.gen_range(0.0..0.001),
            average_funding_rate_24h: rng.gen_range(0.0..0.001),
            open_interest: rng.gen_range(3_700.0..3_800.0),
        })
    }
}

// ---------------------------------------------------------------------------
// Trade
// ---------------------------------------------------------------------------

pub struct TradeGenerator {
    rng: StdRng,
}

impl TradeGenerator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self { rng }
    }
}

impl Default for TradeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordGenerator for TradeGenerator {
    fn record_type(&self) -> RecordType {
        RecordType::Trade
    }

    fn generate(&mut self) -> GeneratedRecord {
        let rng = &mut self.rng;
        // Globally unique per call; the uuid prefix keeps the key short.
        let trade_id = format!("TRADE-{}", &Uuid::new_v4().to_string()[..8]);
        let order_id = format!(
            "{:02X}{:06X}00000000",
            rng.gen_range(0u32..=255),
            rng.gen_range(0u32..=16_777_215),
        );
        let client_order_id = if rng.gen_bool(0.7) {
            Some(rng.gen_range(100..=999))
        } else {
            None
        };
        let maker_taker = if rng.gen_bool(0.5) {
            MakerTaker::Maker
        } else {
            MakerTaker::Taker
        };

        GeneratedRecord::Trade(TradeRecord {
            trade_id,
            order_id,
            client_order_id,
            instrument_name: "BTC-PERPETUAL".to_string(),
            price: rng.gen_range(95_000.0..97_000.0),
            amount: rng.gen_range(0.1..1.0),
            maker_taker,
            time: now_epoch(),
        })
    }
}

// ---------------------------------------------------------------------------
// Price index
// ---------------------------------------------------------------------------

pub struct IndexGenerator {
    rng: StdRng,
}

impl IndexGenerator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self { rng }
    }
}

impl Default for IndexGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordGenerator for IndexGenerator {
    fn record_type(&self) -> RecordType {
        RecordType::Index
    }

    fn generate(&mut self) -> GeneratedRecord {
        let rng = &mut self.rng;
        GeneratedRecord::Index(PriceIndexRecord {
            index_name: "BTCUSD".to_string(),
            price: rng.gen_range(95_000.0..97_000.0),
            timestamp: now_epoch(),
            // In-process only, never serialized.
            previous_settlement_price: rng.gen_range(93_000.0..94_000.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn seeded(seed: u64) -> StdRng {
        StdRng::seed_from_u64(seed)
    }

    #[test]
    fn ticker_prices_are_internally_consistent() {
        let mut gen = TickerGenerator::with_rng(seeded(7));
        for _ in 0..200 {
            let GeneratedRecord::Ticker(t) = gen.generate() else {
                panic!("ticker generator produced a non-ticker record");
            };
            assert!(t.best_ask_price > t.mark_price);
            assert!(t.mark_price > t.best_bid_price);
            assert!((95_000.0..97_000.0).contains(&t.mark_price));
            assert_eq!(t.collar_low, t.mark_price * 0.99);
            assert_eq!(t.collar_high, t.mark_price * 1.01);
        }
    }

    #[test]
    fn trade_ids_are_unique_across_calls() {
        let mut gen = TradeGenerator::with_rng(seeded(7));
        let mut seen = HashSet::new();
        for _ in 0..500 {
            let rec = gen.generate();
            let GeneratedRecord::Trade(t) = &rec else {
                panic!("trade generator produced a non-trade record");
            };
            assert!(t.trade_id.starts_with("TRADE-"));
            assert_eq!(rec.key(), t.trade_id);
            assert!(seen.insert(t.trade_id.clone()), "duplicate {}", t.trade_id);
        }
    }

    #[test]
    fn trade_client_order_id_is_sometimes_absent() {
        let mut gen = TradeGenerator::with_rng(seeded(11));
        let mut some = 0usize;
        let mut none = 0usize;
        for _ in 0..500 {
            let GeneratedRecord::Trade(t) = gen.generate() else {
                unreachable!()
            };
            match t.client_order_id {
                Some(id) => {
                    assert!((100..=999).contains(&id));
                    some += 1;
                }
                None => none += 1,
            }
        }
        assert!(some > 0 && none > 0);
        // 70/30 split, loosely bounded
        assert!(some > none);
    }

    #[test]
    fn index_carries_settlement_price_in_range() {
        let mut gen = IndexGenerator::with_rng(seeded(3));
        let rec = gen.generate();
        assert_eq!(rec.key(), "BTCUSD");
        let GeneratedRecord::Index(i) = rec else {
            unreachable!()
        };
        assert!((93_000.0..94_000.0).contains(&i.previous_settlement_price));
        assert!((95_000.0..97_000.0).contains(&i.price));
    }

    #[test]
    fn registry_covers_every_record_type() {
        for rt in RecordType::all() {
            let gen = generator_for(*rt);
            assert_eq!(gen.record_type(), *rt);
        }
    }
}
