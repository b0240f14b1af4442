//! Kafka delivery channel.
//!
//! One channel per record type: it owns the producer, the wire schema and the
//! destination topic. Sends are asynchronous with at-most-once local
//! semantics: a record that cannot be enqueued after one bounded-flush retry
//! is logged and dropped, or rerouted to `<topic>.dlq` when the dead-letter
//! path is enabled. Every fifth record the channel drains its outstanding
//! delivery futures so unacknowledged growth stays bounded.

use std::time::Duration;

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord, Producer};

use marketpipe_types::{ChannelError, RecordType};

use crate::codec::{self, CodecError};
use crate::config::AppConfig;
use crate::generate::GeneratedRecord;
use crate::schema::WireSchema;

const FLUSH_EVERY: u64 = 5;
const PERIODIC_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);
const QUEUE_FULL_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct DeliveryChannel {
    producer: FutureProducer,
    record_type: RecordType,
    topic: String,
    schema: WireSchema,
    pending: Vec<PendingDelivery>,
    produced: u64,
    dead_letter: bool,
}

struct PendingDelivery {
    key: String,
    payload: Vec<u8>,
    future: DeliveryFuture,
}

impl DeliveryChannel {
    pub fn new(
        config: &AppConfig,
        record_type: RecordType,
        schema: WireSchema,
    ) -> Result<Self, ChannelError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.bootstrap_servers())
            .set("linger.ms", "100")
            .set("acks", "all")
            .set("retries", "5")
            .set("retry.backoff.ms", "200")
            .set("socket.timeout.ms", "10000")
            .set("request.timeout.ms", "30000")
            .set("message.timeout.ms", "30000")
            .create()
            .map_err(|e| ChannelError::ProducerCreate(e.to_string()))?;

        Ok(Self {
            producer,
            record_type,
            topic: config.topic_for(record_type).to_string(),
            schema,
            pending: Vec::new(),
            produced: 0,
            dead_letter: config.pipeline.dead_letter,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    /// Create the destination topic if it does not exist yet. Safe to call
    /// on every startup; an existing topic is success.
    pub async fn initialize(&self, config: &AppConfig) -> Result<(), ChannelError> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", config.bootstrap_servers())
            .create()
            .map_err(|e| ChannelError::AdminCreate(e.to_string()))?;

        let new_topic = NewTopic::new(
            &self.topic,
            config.kafka.topic_partitions,
            TopicReplication::Fixed(config.kafka.topic_replicas),
        );
        let results = admin
            .create_topics(&[new_topic], &AdminOptions::new())
            .await
            .map_err(|e| ChannelError::Topic {
                topic: self.topic.clone(),
                detail: e.to_string(),
            })?;

        for result in results {
            match result {
                Ok(topic) => tracing::info!(topic = %topic, "Created topic"),
                Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    tracing::debug!(topic = %topic, "Topic already exists");
                }
                Err((topic, code)) => {
                    return Err(ChannelError::Topic {
                        topic,
                        detail: code.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Serialize and enqueue one record. Serialization errors are returned;
    /// delivery errors are not observable here (see module docs).
    pub async fn produce(&mut self, record: &GeneratedRecord) -> Result<(), ChannelError> {
        let key = record.key().to_string();
        let payload = encode_record(record, &self.schema).map_err(|e| ChannelError::Serialize {
            key: key.clone(),
            detail: e.to_string(),
        })?;

        self.enqueue(key, payload).await;

        self.produced += 1;
        if self.produced % FLUSH_EVERY == 0 {
            self.drain_pending().await;
        }
        Ok(())
    }

    async fn enqueue(&mut self, key: String, payload: Vec<u8>) {
        let record = FutureRecord::to(&self.topic).key(&key).payload(&payload);
        match self.producer.send_result(record) {
            Ok(future) => {
                self.pending.push(PendingDelivery { key, payload, future });
            }
            Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), _)) => {
                // Full local queue: drain in-flight deliveries, then retry
                // the enqueue exactly once.
                tracing::warn!(topic = %self.topic, "Producer queue full, flushing before retry");
                if let Err(e) = self.producer.flush(QUEUE_FULL_FLUSH_TIMEOUT) {
                    tracing::warn!(topic = %self.topic, error = %e, "Flush on full queue failed");
                }
                let retry = FutureRecord::to(&self.topic).key(&key).payload(&payload);
                match self.producer.send_result(retry) {
                    Ok(future) => {
                        self.pending.push(PendingDelivery { key, payload, future });
                    }
                    Err((e, _)) => {
                        tracing::error!(
                            topic = %self.topic,
                            key = %key,
                            error = %e,
                            "Dropping record after enqueue retry"
                        );
                        self.send_dead_letter(&key, &payload, &e.to_string()).await;
                    }
                }
            }
            Err((e, _)) => {
                tracing::error!(topic = %self.topic, key = %key, error = %e, "Enqueue failed");
                self.send_dead_letter(&key, &payload, &e.to_string()).await;
            }
        }
    }

    /// Await outstanding delivery futures, bounded by the periodic flush
    /// timeout. Futures cut off by the timeout are abandoned; the terminal
    /// [`flush`](Self::flush) accounts for anything still in flight.
    async fn drain_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending);
        let count = pending.len();

        let producer = &self.producer;
        let topic = self.topic.as_str();
        let dead_letter = self.dead_letter;
        let drain = async {
            for delivery in pending {
                match delivery.future.await {
                    Ok(Ok((partition, offset))) => {
                        tracing::trace!(topic, partition, offset, "Delivered");
                    }
                    Ok(Err((e, _))) => {
                        tracing::error!(topic, key = %delivery.key, error = %e, "Delivery failed");
                        if dead_letter {
                            publish_dead_letter(producer, topic, &delivery.key, &delivery.payload, &e.to_string())
                                .await;
                        }
                    }
                    Err(_) => {
                        tracing::warn!(topic, key = %delivery.key, "Delivery future cancelled");
                    }
                }
            }
        };
        if tokio::time::timeout(PERIODIC_FLUSH_TIMEOUT, drain).await.is_err() {
            tracing::warn!(topic = %self.topic, count, "Periodic drain timed out with deliveries in flight");
        }
    }

    async fn send_dead_letter(&self, key: &str, payload: &[u8], error: &str) {
        if self.dead_letter {
            publish_dead_letter(&self.producer, &self.topic, key, payload, error).await;
        }
    }

    /// Drain everything and report the number of messages still
    /// unacknowledged. Zero means fully flushed; anything else is logged as
    /// a warning by the caller, not treated as an error.
    pub async fn flush(&mut self, timeout: Duration) -> usize {
        self.drain_pending().await;
        if let Err(e) = self.producer.flush(timeout) {
            tracing::warn!(topic = %self.topic, error = %e, "Terminal flush failed");
        }
        let remaining = self.producer.in_flight_count().max(0) as usize;
        if remaining > 0 {
            tracing::warn!(topic = %self.topic, remaining, "Messages still unacknowledged after flush");
        }
        remaining
    }
}

/// Reroute a failed record to the topic's dead-letter companion, carrying the
/// original destination and the failure in headers.
async fn publish_dead_letter(
    producer: &FutureProducer,
    topic: &str,
    key: &str,
    payload: &[u8],
    error: &str,
) {
    let dlq_topic = format!("{topic}.dlq");
    let headers = OwnedHeaders::new()
        .insert(Header {
            key: "original.topic",
            value: Some(topic),
        })
        .insert(Header {
            key: "error",
            value: Some(error),
        });
    let record = FutureRecord::to(&dlq_topic)
        .key(key)
        .payload(payload)
        .headers(headers);
    match producer.send(record, Duration::from_secs(5)).await {
        Ok(_) => tracing::info!(topic = %dlq_topic, key, "Rerouted failed record to dead letter topic"),
        Err((e, _)) => {
            tracing::error!(topic = %dlq_topic, key, error = %e, "Dead letter publish failed, record lost");
        }
    }
}

fn encode_record(record: &GeneratedRecord, schema: &WireSchema) -> Result<Vec<u8>, CodecError> {
    match record {
        GeneratedRecord::Ticker(r) => codec::encode(r, schema),
        GeneratedRecord::Trade(r) => codec::encode(r, schema),
        GeneratedRecord::Ack(r) => codec::encode(r, schema),
        GeneratedRecord::Index(r) => codec::encode(r, schema),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::{RecordGenerator, TradeGenerator};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn encode_record_matches_direct_codec_output() {
        let schema = WireSchema::derive(RecordType::Trade);
        let mut gen = TradeGenerator::with_rng(StdRng::seed_from_u64(1));
        let record = gen.generate();
        let via_channel = encode_record(&record, &schema).unwrap();
        let GeneratedRecord::Trade(trade) = &record else {
            unreachable!()
        };
        let direct = codec::encode(trade, &schema).unwrap();
        assert_eq!(via_channel, direct);
    }
}
