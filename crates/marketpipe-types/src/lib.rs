//! Shared record models, enums, and error types for marketpipe.
//!
//! This crate is intentionally free of I/O dependencies so that the codec,
//! generators, and tests can use the types without pulling in the broker or
//! database stacks.

pub mod enums;
pub mod error;
pub mod model;

pub use enums::{MakerTaker, OrderSide, OrderStatus, OrderType, TimeInForce};
pub use error::{ChannelError, DecodeError, ParseEnumError, SchemaError};
pub use model::{AckRecord, PriceIndexRecord, RecordType, TickerRecord, TradeRecord};
