//! Schema-driven record codec.
//!
//! Records are flattened to an ordered field map, then serialized as a
//! schemaless Avro datum against a [`WireSchema`]. The schema is not embedded
//! in the output and must be supplied symmetrically on decode.
//!
//! Null handling follows the wire contract of the sink: a null in a
//! schema-nullable field is kept, a null in a required field is replaced by
//! the type's zero value (empty string / 0 / 0.0 / false) instead of
//! rejecting the message. That substitution is deliberately lossy and logged
//! at debug.

use std::collections::HashMap;

use apache_avro::types::Value as AvroValue;
use apache_avro::{from_avro_datum, to_avro_datum};
use thiserror::Error;

use marketpipe_types::{
    AckRecord, DecodeError, PriceIndexRecord, RecordType, SchemaError, TickerRecord, TradeRecord,
};

use crate::schema::{FieldKind, WireSchema};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("avro encode failed for '{record}': {detail}")]
    Encode { record: String, detail: String },

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Intermediate field value between typed records and the wire encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Str(String),
    Int(i64),
    Double(f64),
    Bool(bool),
}

impl FieldValue {
    fn opt_str(v: &Option<String>) -> FieldValue {
        v.as_ref().map_or(FieldValue::Null, |s| FieldValue::Str(s.clone()))
    }

    fn opt_int(v: Option<i64>) -> FieldValue {
        v.map_or(FieldValue::Null, FieldValue::Int)
    }

    fn opt_double(v: Option<f64>) -> FieldValue {
        v.map_or(FieldValue::Null, FieldValue::Double)
    }
}

/// A typed record that can cross the wire.
pub trait WireRecord: Sized {
    fn record_type() -> RecordType;
    fn to_fields(&self) -> Vec<(String, FieldValue)>;
    fn from_fields(fields: FieldReader) -> Result<Self, DecodeError>;
}

/// Typed access to a decoded field map.
pub struct FieldReader {
    fields: HashMap<String, FieldValue>,
}

impl FieldReader {
    fn take(&mut self, name: &str) -> Result<FieldValue, DecodeError> {
        self.fields
            .remove(name)
            .ok_or_else(|| DecodeError::MissingField(name.to_string()))
    }

    pub fn string(&mut self, name: &str) -> Result<String, DecodeError> {
        match self.take(name)? {
            FieldValue::Str(s) => Ok(s),
            _ => Err(DecodeError::TypeMismatch {
                field: name.to_string(),
                expected: "string",
            }),
        }
    }

    pub fn opt_string(&mut self, name: &str) -> Result<Option<String>, DecodeError> {
        match self.take(name)? {
            FieldValue::Null => Ok(None),
            FieldValue::Str(s) => Ok(Some(s)),
            _ => Err(DecodeError::TypeMismatch {
                field: name.to_string(),
                expected: "nullable string",
            }),
        }
    }

    pub fn double(&mut self, name: &str) -> Result<f64, DecodeError> {
        match self.take(name)? {
            FieldValue::Double(d) => Ok(d),
            FieldValue::Int(i) => Ok(i as f64),
            _ => Err(DecodeError::TypeMismatch {
                field: name.to_string(),
                expected: "double",
            }),
        }
    }

    pub fn opt_double(&mut self, name: &str) -> Result<Option<f64>, DecodeError> {
        match self.take(name)? {
            FieldValue::Null => Ok(None),
            FieldValue::Double(d) => Ok(Some(d)),
            FieldValue::Int(i) => Ok(Some(i as f64)),
            _ => Err(DecodeError::TypeMismatch {
                field: name.to_string(),
                expected: "nullable double",
            }),
        }
    }

    pub fn opt_int(&mut self, name: &str) -> Result<Option<i64>, DecodeError> {
        match self.take(name)? {
            FieldValue::Null => Ok(None),
            FieldValue::Int(i) => Ok(Some(i)),
            _ => Err(DecodeError::TypeMismatch {
                field: name.to_string(),
                expected: "nullable long",
            }),
        }
    }

    pub fn bool(&mut self, name: &str) -> Result<bool, DecodeError> {
        match self.take(name)? {
            FieldValue::Bool(b) => Ok(b),
            _ => Err(DecodeError::TypeMismatch {
                field: name.to_string(),
                expected: "boolean",
            }),
        }
    }

    /// Parse an enum from its symbol or string representation.
    pub fn parse<T>(&mut self, name: &str) -> Result<T, DecodeError>
    where
        T: std::str::FromStr<Err = marketpipe_types::ParseEnumError>,
    {
        let raw = self.string(name)?;
        Ok(raw.parse::<T>()?)
    }
}

// ---------------------------------------------------------------------------
// Encode / decode
// ---------------------------------------------------------------------------

/// Serialize a record against a schema.
pub fn encode<T: WireRecord>(record: &T, schema: &WireSchema) -> Result<Vec<u8>, CodecError> {
    let mut by_name: HashMap<String, FieldValue> = record.to_fields().into_iter().collect();

    let mut avro_fields = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        let value = by_name.remove(&field.name).unwrap_or(FieldValue::Null);
        let avro = to_avro_value(value, field.name.as_str(), &field.kind, field.nullable)?;
        avro_fields.push((field.name.clone(), avro));
    }

    let avro_schema = schema.to_avro()?;
    to_avro_datum(&avro_schema, AvroValue::Record(avro_fields)).map_err(|e| CodecError::Encode {
        record: schema.name.clone(),
        detail: e.to_string(),
    })
}

/// Deserialize a datum back into a typed record. Fails with a decode error on
/// structural mismatch between the bytes and the schema.
pub fn decode<T: WireRecord>(bytes: &[u8], schema: &WireSchema) -> Result<T, CodecError> {
    let avro_schema = schema.to_avro()?;
    let mut reader = bytes;
    let value = from_avro_datum(&avro_schema, &mut reader, None)
        .map_err(|e| DecodeError::Avro(e.to_string()))?;

    let fields = match value {
        AvroValue::Record(fields) => fields,
        _ => return Err(DecodeError::NotARecord.into()),
    };

    let mut map = HashMap::with_capacity(fields.len());
    for (name, value) in fields {
        map.insert(name, from_avro_value(value));
    }
    Ok(T::from_fields(FieldReader { fields: map })?)
}

fn to_avro_value(
    value: FieldValue,
    name: &str,
    kind: &FieldKind,
    nullable: bool,
) -> Result<AvroValue, CodecError> {
    if let FieldValue::Null = value {
        if nullable {
            return Ok(AvroValue::Union(0, Box::new(AvroValue::Null)));
        }
        tracing::debug!(field = name, "Substituting zero value for null in required field");
        let zero = zero_value(kind);
        return Ok(zero);
    }

    let inner = match (kind, value) {
        (FieldKind::Enum { symbols, .. }, FieldValue::Str(s)) => {
            match symbols.iter().position(|sym| sym == &s) {
                Some(idx) => AvroValue::Enum(idx as u32, s),
                // Not a declared symbol: the schema wins, emit as string so
                // the mismatch surfaces at the registry rather than here.
                None => AvroValue::String(s),
            }
        }
        (FieldKind::String, FieldValue::Str(s)) => AvroValue::String(s),
        (FieldKind::String, FieldValue::Double(d)) => AvroValue::String(d.to_string()),
        (FieldKind::String, FieldValue::Int(i)) => AvroValue::String(i.to_string()),
        (FieldKind::String, FieldValue::Bool(b)) => AvroValue::String(b.to_string()),
        (FieldKind::Int, FieldValue::Int(i)) => AvroValue::Int(i as i32),
        (FieldKind::Long, FieldValue::Int(i)) => AvroValue::Long(i),
        (FieldKind::Double, FieldValue::Double(d)) => AvroValue::Double(d),
        (FieldKind::Double, FieldValue::Int(i)) => AvroValue::Double(i as f64),
        (FieldKind::Boolean, FieldValue::Bool(b)) => AvroValue::Boolean(b),
        (kind, value) => {
            return Err(CodecError::Encode {
                record: name.to_string(),
                detail: format!("field value {:?} does not fit wire type {:?}", value, kind),
            })
        }
    };

    if nullable {
        Ok(AvroValue::Union(1, Box::new(inner)))
    } else {
        Ok(inner)
    }
}

fn zero_value(kind: &FieldKind) -> AvroValue {
    match kind {
        FieldKind::String => AvroValue::String(String::new()),
        FieldKind::Int => AvroValue::Int(0),
        FieldKind::Long => AvroValue::Long(0),
        FieldKind::Double => AvroValue::Double(0.0),
        FieldKind::Boolean => AvroValue::Boolean(false),
        FieldKind::Enum { symbols, .. } => AvroValue::Enum(
            0,
            symbols.first().cloned().unwrap_or_default(),
        ),
        FieldKind::Array(_) => AvroValue::Array(Vec::new()),
        FieldKind::Map(_) => AvroValue::Map(HashMap::new()),
        FieldKind::Record(schema) => AvroValue::Record(
            schema
                .fields
                .iter()
                .map(|f| (f.name.clone(), zero_value(&f.kind)))
                .collect(),
        ),
    }
}

fn from_avro_value(value: AvroValue) -> FieldValue {
    match value {
        AvroValue::Null => FieldValue::Null,
        AvroValue::String(s) => FieldValue::Str(s),
        AvroValue::Enum(_, s) => FieldValue::Str(s),
        AvroValue::Int(i) => FieldValue::Int(i as i64),
        AvroValue::Long(l) => FieldValue::Int(l),
        AvroValue::Float(f) => FieldValue::Double(f as f64),
        AvroValue::Double(d) => FieldValue::Double(d),
        AvroValue::Boolean(b) => FieldValue::Bool(b),
        AvroValue::Union(_, inner) => from_avro_value(*inner),
        // Container values have no typed-record counterpart here; surface as
        // a missing value so the reader reports a type mismatch.
        other => {
            tracing::debug!(value = ?other, "Dropping unsupported avro value during decode");
            FieldValue::Null
        }
    }
}

// ---------------------------------------------------------------------------
// WireRecord implementations
// ---------------------------------------------------------------------------

impl WireRecord for TickerRecord {
    fn record_type() -> RecordType {
        RecordType::Ticker
    }

    fn to_fields(&self) -> Vec<(String, FieldValue)> {
        vec![
            ("instrument_name".into(), FieldValue::Str(self.instrument_name.clone())),
            ("mark_price".into(), FieldValue::Double(self.mark_price)),
            ("mark_timestamp".into(), FieldValue::Double(self.mark_timestamp)),
            ("best_bid_price".into(), FieldValue::Double(self.best_bid_price)),
            ("best_bid_amount".into(), FieldValue::Double(self.best_bid_amount)),
            ("best_ask_price".into(), FieldValue::Double(self.best_ask_price)),
            ("best_ask_amount".into(), FieldValue::Double(self.best_ask_amount)),
            ("last_price".into(), FieldValue::Double(self.last_price)),
            ("delta".into(), FieldValue::Double(self.delta)),
            ("volume_24h".into(), FieldValue::Double(self.volume_24h)),
            ("value_24h".into(), FieldValue::Double(self.value_24h)),
            ("low_price_24h".into(), FieldValue::Double(self.low_price_24h)),
            ("high_price_24h".into(), FieldValue::Double(self.high_price_24h)),
            ("change_24h".into(), FieldValue::Double(self.change_24h)),
            ("index_price".into(), FieldValue::Double(self.index_price)),
            ("forward".into(), FieldValue::Double(self.forward)),
            ("funding_mark".into(), FieldValue::Double(self.funding_mark)),
            ("funding_rate".into(), FieldValue::Double(self.funding_rate)),
            ("collar_low".into(), FieldValue::Double(self.collar_low)),
            ("collar_high".into(), FieldValue::Double(self.collar_high)),
            ("realised_funding_24h".into(), FieldValue::Double(self.realised_funding_24h)),
            ("average_funding_rate_24h".into(), FieldValue::Double(self.average_funding_rate_24h)),
            ("open_interest".into(), FieldValue::Double(self.open_interest)),
        ]
    }

    fn from_fields(mut r: FieldReader) -> Result<Self, DecodeError> {
        Ok(Self {
            instrument_name: r.string("instrument_name")?,
            mark_price: r.double("mark_price")?,
            mark_timestamp: r.double("mark_timestamp")?,
            best_bid_price: r.double("best_bid_price")?,
            best_bid_amount: r.double("best_bid_amount")?,
            best_ask_price: r.double("best_ask_price")?,
            best_ask_amount: r.double("best_ask_amount")?,
            last_price: r.double("last_price")?,
            delta: r.double("delta")?,
            volume_24h: r.double("volume_24h")?,
            value_24h: r.double("value_24h")?,
            low_price_24h: r.double("low_price_24h")?,
            high_price_24h: r.double("high_price_24h")?,
            change_24h: r.double("change_24h")?,
            index_price: r.double("index_price")?,
            forward: r.double("forward")?,
            funding_mark: r.double("funding_mark")?,
            funding_rate: r.double("funding_rate")?,
            collar_low: r.double("collar_low")?,
            collar_high: r.double("collar_high")?,
            realised_funding_24h: r.double("realised_funding_24h")?,
            average_funding_rate_24h: r.double("average_funding_rate_24h")?,
            open_interest: r.double("open_interest")?,
        })
    }
}

impl WireRecord for TradeRecord {
    fn record_type() -> RecordType {
        RecordType::Trade
    }

    fn to_fields(&self) -> Vec<(String, FieldValue)> {
        vec![
            ("trade_id".into(), FieldValue::Str(self.trade_id.clone())),
            ("order_id".into(), FieldValue::Str(self.order_id.clone())),
            ("client_order_id".into(), FieldValue::opt_int(self.client_order_id)),
            ("instrument_name".into(), FieldValue::Str(self.instrument_name.clone())),
            ("price".into(), FieldValue::Double(self.price)),
            ("amount".into(), FieldValue::Double(self.amount)),
            ("maker_taker".into(), FieldValue::Str(self.maker_taker.as_wire_str().into())),
            ("time".into(), FieldValue::Double(self.time)),
        ]
    }

    fn from_fields(mut r: FieldReader) -> Result<Self, DecodeError> {
        Ok(Self {
            trade_id: r.string("trade_id")?,
            order_id: r.string("order_id")?,
            client_order_id: r.opt_int("client_order_id")?,
            instrument_name: r.string("instrument_name")?,
            price: r.double("price")?,
            amount: r.double("amount")?,
            maker_taker: r.parse("maker_taker")?,
            time: r.double("time")?,
        })
    }
}

impl WireRecord for AckRecord {
    fn record_type() -> RecordType {
        RecordType::Ack
    }

    fn to_fields(&self) -> Vec<(String, FieldValue)> {
        vec![
            ("order_id".into(), FieldValue::Str(self.order_id.clone())),
            ("client_order_id".into(), FieldValue::opt_int(self.client_order_id)),
            ("instrument_name".into(), FieldValue::Str(self.instrument_name.clone())),
            ("direction".into(), FieldValue::Str(self.direction.as_wire_str().into())),
            ("price".into(), FieldValue::opt_double(self.price)),
            ("amount".into(), FieldValue::Double(self.amount)),
            ("filled_amount".into(), FieldValue::Double(self.filled_amount)),
            ("remaining_amount".into(), FieldValue::Double(self.remaining_amount)),
            ("status".into(), FieldValue::Str(self.status.as_wire_str().into())),
            ("order_type".into(), FieldValue::Str(self.order_type.as_wire_str().into())),
            ("time_in_force".into(), FieldValue::Str(self.time_in_force.as_wire_str().into())),
            ("change_reason".into(), FieldValue::Str(self.change_reason.clone())),
            ("delete_reason".into(), FieldValue::opt_str(&self.delete_reason)),
            ("insert_reason".into(), FieldValue::opt_str(&self.insert_reason)),
            ("create_time".into(), FieldValue::Double(self.create_time)),
            ("persistent".into(), FieldValue::Bool(self.persistent)),
        ]
    }

    fn from_fields(mut r: FieldReader) -> Result<Self, DecodeError> {
        Ok(Self {
            order_id: r.string("order_id")?,
            client_order_id: r.opt_int("client_order_id")?,
            instrument_name: r.string("instrument_name")?,
            direction: r.parse("direction")?,
            price: r.opt_double("price")?,
            amount: r.double("amount")?,
            filled_amount: r.double("filled_amount")?,
            remaining_amount: r.double("remaining_amount")?,
            status: r.parse("status")?,
            order_type: r.parse("order_type")?,
            time_in_force: r.parse("time_in_force")?,
            change_reason: r.string("change_reason")?,
            delete_reason: r.opt_string("delete_reason")?,
            insert_reason: r.opt_string("insert_reason")?,
            create_time: r.double("create_time")?,
            persistent: r.bool("persistent")?,
        })
    }
}

impl WireRecord for PriceIndexRecord {
    fn record_type() -> RecordType {
        RecordType::Index
    }

    fn to_fields(&self) -> Vec<(String, FieldValue)> {
        // previous_settlement_price is in-process only, never on the wire
        vec![
            ("index_name".into(), FieldValue::Str(self.index_name.clone())),
            ("price".into(), FieldValue::Double(self.price)),
            ("timestamp".into(), FieldValue::Double(self.timestamp)),
        ]
    }

    fn from_fields(mut r: FieldReader) -> Result<Self, DecodeError> {
        Ok(Self {
            index_name: r.string("index_name")?,
            price: r.double("price")?,
            timestamp: r.double("timestamp")?,
            previous_settlement_price: 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketpipe_types::{MakerTaker, OrderSide, OrderStatus, OrderType, TimeInForce};

    fn sample_ack() -> AckRecord {
        AckRecord {
            order_id: "a8f3c2d1".into(),
            client_order_id: Some(512),
            instrument_name: "BTC-PERPETUAL".into(),
            direction: OrderSide::Buy,
            price: Some(96250.5),
            amount: 0.75,
            filled_amount: 0.25,
            remaining_amount: 0.5,
            status: OrderStatus::PartiallyFilled,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::GoodTillCancelled,
            change_reason: "fill".into(),
            delete_reason: None,
            insert_reason: None,
            create_time: 1_700_000_000.25,
            persistent: false,
        }
    }

    fn sample_trade() -> TradeRecord {
        TradeRecord {
            trade_id: "TRADE-1b2c3d4e".into(),
            order_id: "FF00AA1100000000".into(),
            client_order_id: None,
            instrument_name: "BTC-PERPETUAL".into(),
            price: 96000.0,
            amount: 0.4,
            maker_taker: MakerTaker::Taker,
            time: 1_700_000_001.5,
        }
    }

    #[test]
    fn ack_round_trips_through_derived_schema() {
        let schema = WireSchema::derive(RecordType::Ack);
        let ack = sample_ack();
        let bytes = encode(&ack, &schema).unwrap();
        let decoded: AckRecord = decode(&bytes, &schema).unwrap();
        assert_eq!(decoded, ack);
    }

    #[test]
    fn trade_round_trips_with_none_client_order_id() {
        let schema = WireSchema::derive(RecordType::Trade);
        let trade = sample_trade();
        let bytes = encode(&trade, &schema).unwrap();
        let decoded: TradeRecord = decode(&bytes, &schema).unwrap();
        assert_eq!(decoded, trade);
        assert_eq!(decoded.client_order_id, None);
    }

    #[test]
    fn ticker_round_trips() {
        let schema = WireSchema::derive(RecordType::Ticker);
        let ticker = TickerRecord {
            instrument_name: "BTC-PERPETUAL".into(),
            mark_price: 96000.0,
            mark_timestamp: 1.7e9,
            best_bid_price: 95980.0,
            best_bid_amount: 0.05,
            best_ask_price: 96020.0,
            best_ask_amount: 0.07,
            last_price: 96010.0,
            delta: 1.0,
            volume_24h: 750.0,
            value_24h: 68_500_000.0,
            low_price_24h: 93500.0,
            high_price_24h: 97500.0,
            change_24h: 2500.0,
            index_price: 95995.0,
            forward: 96005.0,
            funding_mark: 0.0004,
            funding_rate: 0.0003,
            collar_low: 95040.0,
            collar_high: 96960.0,
            realised_funding_24h: 0.0002,
            average_funding_rate_24h: 0.0005,
            open_interest: 3750.0,
        };
        let bytes = encode(&ticker, &schema).unwrap();
        let decoded: TickerRecord = decode(&bytes, &schema).unwrap();
        assert_eq!(decoded, ticker);
    }

    #[test]
    fn index_round_trips_without_settlement_price() {
        let schema = WireSchema::derive(RecordType::Index);
        let index = PriceIndexRecord {
            index_name: "BTCUSD".into(),
            price: 96120.0,
            timestamp: 1.7e9,
            previous_settlement_price: 93500.0,
        };
        let bytes = encode(&index, &schema).unwrap();
        let decoded: PriceIndexRecord = decode(&bytes, &schema).unwrap();
        // the auxiliary field is not serialized
        assert_eq!(decoded.previous_settlement_price, 0.0);
        assert_eq!(decoded.index_name, index.index_name);
        assert_eq!(decoded.price, index.price);
    }

    #[test]
    fn none_in_nullable_field_decodes_to_none_not_empty_string() {
        let schema = WireSchema::derive(RecordType::Ack);
        let mut ack = sample_ack();
        ack.delete_reason = None;
        let bytes = encode(&ack, &schema).unwrap();
        let decoded: AckRecord = decode(&bytes, &schema).unwrap();
        assert_eq!(decoded.delete_reason, None);
    }

    #[test]
    fn null_in_required_string_field_encodes_as_empty_string() {
        // Schema declares change_reason as a required string; feed it a null
        // through a schema whose field the record does not carry.
        let schema = WireSchema {
            name: "Ack".into(),
            namespace: crate::schema::SCHEMA_NAMESPACE.into(),
            fields: {
                let mut fields = WireSchema::derive(RecordType::Ack).fields;
                fields.push(crate::schema::WireField {
                    name: "venue".into(),
                    kind: FieldKind::String,
                    nullable: false,
                    default: None,
                });
                fields
            },
        };
        let ack = sample_ack();
        // encode substitutes "" for the absent required field instead of erroring
        let bytes = encode(&ack, &schema).unwrap();
        let avro_schema = schema.to_avro().unwrap();
        let mut reader = bytes.as_slice();
        let value = from_avro_datum(&avro_schema, &mut reader, None).unwrap();
        match value {
            AvroValue::Record(fields) => {
                let venue = &fields.iter().find(|(n, _)| n == "venue").unwrap().1;
                assert_eq!(*venue, AvroValue::String(String::new()));
            }
            other => panic!("expected record, got {:?}", other),
        }
    }

    #[test]
    fn enum_fields_encode_as_schema_enums() {
        let schema = WireSchema::derive(RecordType::Trade);
        let trade = sample_trade();
        let bytes = encode(&trade, &schema).unwrap();

        let avro_schema = schema.to_avro().unwrap();
        let mut reader = bytes.as_slice();
        let value = from_avro_datum(&avro_schema, &mut reader, None).unwrap();
        match value {
            AvroValue::Record(fields) => {
                let role = &fields.iter().find(|(n, _)| n == "maker_taker").unwrap().1;
                assert_eq!(*role, AvroValue::Enum(1, "taker".into()));
            }
            other => panic!("expected record, got {:?}", other),
        }
    }

    #[test]
    fn enum_stays_a_string_when_schema_says_string() {
        // Same record, but a file-style schema that declares maker_taker as a
        // plain string.
        let mut schema = WireSchema::derive(RecordType::Trade);
        for field in &mut schema.fields {
            if field.name == "maker_taker" {
                field.kind = FieldKind::String;
            }
        }
        let trade = sample_trade();
        let bytes = encode(&trade, &schema).unwrap();
        let decoded: TradeRecord = decode(&bytes, &schema).unwrap();
        assert_eq!(decoded.maker_taker, MakerTaker::Taker);
    }

    #[test]
    fn decode_fails_on_structural_mismatch() {
        let ack_schema = WireSchema::derive(RecordType::Ack);
        let trade_schema = WireSchema::derive(RecordType::Trade);
        let bytes = encode(&sample_trade(), &trade_schema).unwrap();
        let result: Result<AckRecord, _> = decode(&bytes, &ack_schema);
        assert!(result.is_err());
    }
}
