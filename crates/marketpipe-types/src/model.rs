use serde::{Deserialize, Serialize};

use crate::enums::{MakerTaker, OrderSide, OrderStatus, OrderType, TimeInForce};

/// The record types the pipeline can generate and deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    Ticker,
    Trade,
    Ack,
    Index,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Trade => "trade",
            Self::Ack => "ack",
            Self::Index => "index",
        }
    }

    /// Wire-schema record name, e.g. "Ticker".
    pub fn record_name(&self) -> &'static str {
        match self {
            Self::Ticker => "Ticker",
            Self::Trade => "Trade",
            Self::Ack => "Ack",
            Self::Index => "Index",
        }
    }

    /// Destination table populated by the sink connector.
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Ticker => "ticker_data",
            Self::Trade => "trade_data",
            Self::Ack => "ack_data",
            Self::Index => "index_data",
        }
    }

    pub fn all() -> &'static [RecordType] {
        &[Self::Ticker, Self::Trade, Self::Ack, Self::Index]
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ticker" => Some(Self::Ticker),
            "trade" => Some(Self::Trade),
            "ack" => Some(Self::Ack),
            "index" => Some(Self::Index),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instrument ticker snapshot. All fields are required on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerRecord {
    pub instrument_name: String,
    pub mark_price: f64,
    pub mark_timestamp: f64,
    pub best_bid_price: f64,
    pub best_bid_amount: f64,
    pub best_ask_price: f64,
    pub best_ask_amount: f64,
    pub last_price: f64,
    pub delta: f64,
    pub volume_24h: f64,
    pub value_24h: f64,
    pub low_price_24h: f64,
    pub high_price_24h: f64,
    pub change_24h: f64,
    pub index_price: f64,
    pub forward: f64,
    pub funding_mark: f64,
    pub funding_rate: f64,
    pub collar_low: f64,
    pub collar_high: f64,
    pub realised_funding_24h: f64,
    pub average_funding_rate_24h: f64,
    pub open_interest: f64,
}

/// Executed trade. Trade identifiers are globally unique per generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: String,
    pub order_id: String,
    pub client_order_id: Option<i64>,
    pub instrument_name: String,
    pub price: f64,
    pub amount: f64,
    pub maker_taker: MakerTaker,
    pub time: f64,
}

/// Order acknowledgment.
///
/// Invariant: `filled_amount + remaining_amount <= amount`, with the exact
/// split dictated by `status` (see the ack generator's transition policy).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckRecord {
    pub order_id: String,
    pub client_order_id: Option<i64>,
    pub instrument_name: String,
    pub direction: OrderSide,
    pub price: Option<f64>,
    pub amount: f64,
    pub filled_amount: f64,
    pub remaining_amount: f64,
    pub status: OrderStatus,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub change_reason: String,
    pub delete_reason: Option<String>,
    pub insert_reason: Option<String>,
    pub create_time: f64,
    pub persistent: bool,
}

/// Price index tick.
///
/// `previous_settlement_price` is in-process bookkeeping only and never
/// appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceIndexRecord {
    pub index_name: String,
    pub price: f64,
    pub timestamp: f64,
    #[serde(skip)]
    pub previous_settlement_price: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_type_names_and_tables() {
        assert_eq!(RecordType::Ticker.as_str(), "ticker");
        assert_eq!(RecordType::Ack.table_name(), "ack_data");
        assert_eq!(RecordType::parse("trade"), Some(RecordType::Trade));
        assert_eq!(RecordType::parse("order"), None);
        assert_eq!(RecordType::all().len(), 4);
    }

    #[test]
    fn index_record_skips_settlement_price_in_json() {
        let rec = PriceIndexRecord {
            index_name: "BTCUSD".into(),
            price: 96000.0,
            timestamp: 1.7e9,
            previous_settlement_price: 93500.0,
        };
        let json = serde_json::to_value(&rec).unwrap();
        assert!(json.get("previous_settlement_price").is_none());
        assert_eq!(json["index_name"], "BTCUSD");
    }
}
