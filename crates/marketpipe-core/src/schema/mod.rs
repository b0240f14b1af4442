//! Wire-schema model.
//!
//! A [`WireSchema`] is the structural description used to serialize records
//! without embedding the schema in each message. Schemas come from one of two
//! places: a versioned `.avsc` file (see [`loader`]) or derivation from the
//! record type's static field descriptors. Either way the schema is immutable
//! once obtained, apart from canonicalizing nullable unions so that null is
//! always the first alternative.

pub mod loader;

use serde_json::{json, Value as JsonValue};

use marketpipe_types::{
    MakerTaker, OrderSide, OrderStatus, OrderType, RecordType, SchemaError, TimeInForce,
};

pub const SCHEMA_NAMESPACE: &str = "com.marketpipe.avro";

/// Wire type of a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    String,
    Int,
    Long,
    Double,
    Boolean,
    Enum {
        name: String,
        symbols: Vec<String>,
    },
    Array(Box<FieldKind>),
    Map(Box<FieldKind>),
    Record(Box<WireSchema>),
}

impl FieldKind {
    fn to_json(&self) -> JsonValue {
        match self {
            Self::String => json!("string"),
            Self::Int => json!("int"),
            Self::Long => json!("long"),
            Self::Double => json!("double"),
            Self::Boolean => json!("boolean"),
            Self::Enum { name, symbols } => json!({
                "type": "enum",
                "name": name,
                "symbols": symbols,
            }),
            Self::Array(items) => json!({
                "type": "array",
                "items": items.to_json(),
            }),
            Self::Map(values) => json!({
                "type": "map",
                "values": values.to_json(),
            }),
            Self::Record(schema) => schema.to_json(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WireField {
    pub name: String,
    pub kind: FieldKind,
    pub nullable: bool,
    pub default: Option<JsonValue>,
}

impl WireField {
    fn required(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            nullable: false,
            default: None,
        }
    }

    /// Nullable fields always carry a JSON null default, matching the
    /// null-first union ordering.
    fn nullable(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            nullable: true,
            default: Some(JsonValue::Null),
        }
    }
}

/// Ordered, immutable structural description of a record type.
#[derive(Debug, Clone, PartialEq)]
pub struct WireSchema {
    pub name: String,
    pub namespace: String,
    pub fields: Vec<WireField>,
}

impl WireSchema {
    /// Render to Avro schema JSON. Nullable fields become `["null", inner]`
    /// unions; required fields omit defaults so missing data fails loudly
    /// downstream.
    pub fn to_json(&self) -> JsonValue {
        let fields: Vec<JsonValue> = self
            .fields
            .iter()
            .map(|f| {
                let ty = if f.nullable {
                    json!(["null", f.kind.to_json()])
                } else {
                    f.kind.to_json()
                };
                let mut field = json!({ "name": f.name, "type": ty });
                if let Some(default) = &f.default {
                    field["default"] = default.clone();
                }
                field
            })
            .collect();

        json!({
            "namespace": self.namespace,
            "type": "record",
            "name": self.name,
            "fields": fields,
        })
    }

    /// Parse into an `apache_avro::Schema` for datum encoding.
    pub fn to_avro(&self) -> Result<apache_avro::Schema, SchemaError> {
        apache_avro::Schema::parse_str(&self.to_json().to_string()).map_err(|e| {
            SchemaError::AvroRejected {
                name: self.name.clone(),
                detail: e.to_string(),
            }
        })
    }

    pub fn field(&self, name: &str) -> Option<&WireField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Derive the schema for a record type from its static field
    /// descriptors. This is the fallback when no schema file is configured
    /// or a configured file fails validation.
    pub fn derive(record_type: RecordType) -> WireSchema {
        let fields = match record_type {
            RecordType::Ticker => ticker_fields(),
            RecordType::Trade => trade_fields(),
            RecordType::Ack => ack_fields(),
            RecordType::Index => index_fields(),
        };
        WireSchema {
            name: record_type.record_name().to_string(),
            namespace: SCHEMA_NAMESPACE.to_string(),
            fields,
        }
    }
}

fn enum_kind(name: &str, symbols: &[&str]) -> FieldKind {
    FieldKind::Enum {
        name: name.to_string(),
        symbols: symbols.iter().map(|s| s.to_string()).collect(),
    }
}

fn ticker_fields() -> Vec<WireField> {
    let mut fields = vec![WireField::required("instrument_name", FieldKind::String)];
    for name in [
        "mark_price",
        "mark_timestamp",
        "best_bid_price",
        "best_bid_amount",
        "best_ask_price",
        "best_ask_amount",
        "last_price",
        "delta",
        "volume_24h",
        "value_24h",
        "low_price_24h",
        "high_price_24h",
        "change_24h",
        "index_price",
        "forward",
        "funding_mark",
        "funding_rate",
        "collar_low",
        "collar_high",
        "realised_funding_24h",
        "average_funding_rate_24h",
        "open_interest",
    ] {
        fields.push(WireField::required(name, FieldKind::Double));
    }
    fields
}

fn trade_fields() -> Vec<WireField> {
    vec![
        WireField::required("trade_id", FieldKind::String),
        WireField::required("order_id", FieldKind::String),
        WireField::nullable("client_order_id", FieldKind::Long),
        WireField::required("instrument_name", FieldKind::String),
        WireField::required("price", FieldKind::Double),
        WireField::required("amount", FieldKind::Double),
        WireField::required("maker_taker", enum_kind("MakerTaker", MakerTaker::symbols())),
        WireField::required("time", FieldKind::Double),
    ]
}

fn ack_fields() -> Vec<WireField> {
    vec![
        WireField::required("order_id", FieldKind::String),
        WireField::nullable("client_order_id", FieldKind::Long),
        WireField::required("instrument_name", FieldKind::String),
        WireField::required("direction", enum_kind("OrderSide", OrderSide::symbols())),
        WireField::nullable("price", FieldKind::Double),
        WireField::required("amount", FieldKind::Double),
        WireField::required("filled_amount", FieldKind::Double),
        WireField::required("remaining_amount", FieldKind::Double),
        WireField::required("status", enum_kind("OrderStatus", OrderStatus::symbols())),
        WireField::required("order_type", enum_kind("OrderType", OrderType::symbols())),
        WireField::required(
            "time_in_force",
            enum_kind("TimeInForce", TimeInForce::symbols()),
        ),
        WireField::required("change_reason", FieldKind::String),
        WireField::nullable("delete_reason", FieldKind::String),
        WireField::nullable("insert_reason", FieldKind::String),
        WireField::required("create_time", FieldKind::Double),
        WireField::required("persistent", FieldKind::Boolean),
    ]
}

fn index_fields() -> Vec<WireField> {
    vec![
        WireField::required("index_name", FieldKind::String),
        WireField::required("price", FieldKind::Double),
        WireField::required("timestamp", FieldKind::Double),
    ]
}

// ---------------------------------------------------------------------------
// Parsing schemas from .avsc JSON
// ---------------------------------------------------------------------------

impl WireSchema {
    /// Parse a `.avsc` JSON document, validating structure: must declare a
    /// record with a non-empty field list. Nullable unions are canonicalized
    /// so null is the first alternative.
    pub fn from_json(doc: &JsonValue, path: &str) -> Result<WireSchema, SchemaError> {
        if doc.get("type").and_then(JsonValue::as_str) != Some("record") {
            return Err(SchemaError::NotARecord {
                path: path.to_string(),
            });
        }
        let fields = doc
            .get("fields")
            .and_then(JsonValue::as_array)
            .filter(|f| !f.is_empty())
            .ok_or_else(|| SchemaError::MissingFields {
                path: path.to_string(),
            })?;

        let name = doc
            .get("name")
            .and_then(JsonValue::as_str)
            .unwrap_or("Record")
            .to_string();
        let namespace = doc
            .get("namespace")
            .and_then(JsonValue::as_str)
            .unwrap_or(SCHEMA_NAMESPACE)
            .to_string();

        let mut parsed = Vec::with_capacity(fields.len());
        for field in fields {
            let field_name = field
                .get("name")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| SchemaError::MissingFields {
                    path: path.to_string(),
                })?
                .to_string();
            let ty = field.get("type").ok_or_else(|| SchemaError::MissingFields {
                path: path.to_string(),
            })?;

            let (kind, nullable) = parse_field_type(ty, &field_name, path)?;
            let default = if nullable {
                Some(field.get("default").cloned().unwrap_or(JsonValue::Null))
            } else {
                field.get("default").cloned()
            };
            parsed.push(WireField {
                name: field_name,
                kind,
                nullable,
                default,
            });
        }

        Ok(WireSchema {
            name,
            namespace,
            fields: parsed,
        })
    }
}

fn parse_field_type(
    ty: &JsonValue,
    field: &str,
    path: &str,
) -> Result<(FieldKind, bool), SchemaError> {
    match ty {
        JsonValue::String(_) | JsonValue::Object(_) => Ok((parse_kind(ty, field, path)?, false)),
        JsonValue::Array(members) => {
            // Union: only ["null", T] (in either order) is supported; the
            // canonical form puts null first.
            let non_null: Vec<&JsonValue> = members
                .iter()
                .filter(|m| m.as_str() != Some("null"))
                .collect();
            if non_null.len() != 1 || non_null.len() == members.len() {
                return Err(SchemaError::UnsupportedType {
                    field: field.to_string(),
                    detail: format!("unsupported union shape: {}", ty),
                });
            }
            Ok((parse_kind(non_null[0], field, path)?, true))
        }
        _ => Err(SchemaError::UnsupportedType {
            field: field.to_string(),
            detail: format!("unexpected type value: {}", ty),
        }),
    }
}

fn parse_kind(ty: &JsonValue, field: &str, path: &str) -> Result<FieldKind, SchemaError> {
    match ty {
        JsonValue::String(s) => Ok(match s.as_str() {
            "string" => FieldKind::String,
            "int" => FieldKind::Int,
            "long" => FieldKind::Long,
            "double" | "float" => FieldKind::Double,
            "boolean" => FieldKind::Boolean,
            // Unknown primitive names fall back to string.
            _ => FieldKind::String,
        }),
        JsonValue::Object(obj) => match obj.get("type").and_then(JsonValue::as_str) {
            Some("enum") => {
                let name = obj
                    .get("name")
                    .and_then(JsonValue::as_str)
                    .unwrap_or(field)
                    .to_string();
                let symbols = obj
                    .get("symbols")
                    .and_then(JsonValue::as_array)
                    .map(|syms| {
                        syms.iter()
                            .filter_map(JsonValue::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(FieldKind::Enum { name, symbols })
            }
            Some("array") => {
                let items = obj.get("items").ok_or_else(|| SchemaError::UnsupportedType {
                    field: field.to_string(),
                    detail: "array without items".to_string(),
                })?;
                Ok(FieldKind::Array(Box::new(parse_kind(items, field, path)?)))
            }
            Some("map") => {
                let values = obj.get("values").ok_or_else(|| SchemaError::UnsupportedType {
                    field: field.to_string(),
                    detail: "map without values".to_string(),
                })?;
                Ok(FieldKind::Map(Box::new(parse_kind(values, field, path)?)))
            }
            Some("record") => {
                let nested = WireSchema::from_json(&JsonValue::Object(obj.clone()), path)?;
                Ok(FieldKind::Record(Box::new(nested)))
            }
            _ => Err(SchemaError::UnsupportedType {
                field: field.to_string(),
                detail: format!("unknown complex type: {}", ty),
            }),
        },
        _ => Err(SchemaError::UnsupportedType {
            field: field.to_string(),
            detail: format!("unexpected type value: {}", ty),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_schemas_are_valid_avro() {
        for rt in RecordType::all() {
            let schema = WireSchema::derive(*rt);
            assert!(!schema.fields.is_empty());
            schema.to_avro().unwrap();
        }
    }

    #[test]
    fn nullable_fields_carry_null_default_and_null_first_union() {
        let schema = WireSchema::derive(RecordType::Ack);
        let price = schema.field("price").unwrap();
        assert!(price.nullable);
        assert_eq!(price.default, Some(JsonValue::Null));

        let json = schema.to_json();
        let price_ty = json["fields"]
            .as_array()
            .unwrap()
            .iter()
            .find(|f| f["name"] == "price")
            .unwrap()["type"]
            .clone();
        assert_eq!(price_ty[0], "null");
        assert_eq!(price_ty[1], "double");
    }

    #[test]
    fn ack_status_is_an_enum_with_wire_symbols() {
        let schema = WireSchema::derive(RecordType::Ack);
        match &schema.field("status").unwrap().kind {
            FieldKind::Enum { name, symbols } => {
                assert_eq!(name, "OrderStatus");
                assert_eq!(symbols[0], "open");
                assert_eq!(symbols.len(), 5);
            }
            other => panic!("expected enum kind, got {:?}", other),
        }
    }

    #[test]
    fn from_json_rejects_non_record() {
        let doc = serde_json::json!({ "type": "enum", "name": "X", "symbols": ["a"] });
        let err = WireSchema::from_json(&doc, "x.avsc").unwrap_err();
        assert!(matches!(err, SchemaError::NotARecord { .. }));
    }

    #[test]
    fn from_json_rejects_empty_fields() {
        let doc = serde_json::json!({ "type": "record", "name": "X", "fields": [] });
        let err = WireSchema::from_json(&doc, "x.avsc").unwrap_err();
        assert!(matches!(err, SchemaError::MissingFields { .. }));
    }

    #[test]
    fn from_json_canonicalizes_union_order() {
        // null second in the file; the parsed schema treats the field as
        // nullable and re-renders with null first.
        let doc = serde_json::json!({
            "type": "record",
            "name": "X",
            "fields": [
                { "name": "reason", "type": ["string", "null"] },
            ],
        });
        let schema = WireSchema::from_json(&doc, "x.avsc").unwrap();
        let field = schema.field("reason").unwrap();
        assert!(field.nullable);
        assert_eq!(field.kind, FieldKind::String);

        let rendered = schema.to_json();
        assert_eq!(rendered["fields"][0]["type"][0], "null");
    }

    #[test]
    fn derived_trade_matches_parsed_round_trip() {
        let derived = WireSchema::derive(RecordType::Trade);
        let parsed = WireSchema::from_json(&derived.to_json(), "trade.avsc").unwrap();
        assert_eq!(derived, parsed);
    }

    #[test]
    fn unknown_primitive_falls_back_to_string() {
        let doc = serde_json::json!({
            "type": "record",
            "name": "X",
            "fields": [{ "name": "blob", "type": "bytes" }],
        });
        let schema = WireSchema::from_json(&doc, "x.avsc").unwrap();
        assert_eq!(schema.field("blob").unwrap().kind, FieldKind::String);
    }
}
