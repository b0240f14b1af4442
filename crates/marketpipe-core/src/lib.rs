//! marketpipe engine.
//!
//! Synthesizes market-event records (ticker, trade, ack, price index),
//! drives them through Kafka with Avro serialization, provisions JDBC sink
//! connectors, and verifies the data lands in the relational store. The
//! orchestrator in [`engine`] sequences the whole run.

pub mod codec;
pub mod config;
pub mod connect;
pub mod db;
pub mod engine;
pub mod generate;
pub mod health;
pub mod probe;
pub mod produce;
pub mod schema;
pub mod topics;
