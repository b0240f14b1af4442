//! Topic data verification.
//!
//! After the producer phase the orchestrator confirms every produced topic
//! actually holds data, using a short-lived consumer that reads from the
//! earliest offset and stops at the first message.

use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::Message;

use crate::config::AppConfig;

const VERIFICATION_GROUP: &str = "pipeline-verification-consumer";
pub const VERIFICATION_TIMEOUT: Duration = Duration::from_secs(10);

/// True when at least one message is observable on the topic within the
/// timeout. Consumer errors count as "no data".
pub async fn topic_has_data(config: &AppConfig, topic: &str, timeout: Duration) -> bool {
    let consumer: StreamConsumer = match ClientConfig::new()
        .set("bootstrap.servers", config.bootstrap_servers())
        .set("group.id", VERIFICATION_GROUP)
        .set("auto.offset.reset", "earliest")
        .set("enable.auto.commit", "false")
        .create()
    {
        Ok(consumer) => consumer,
        Err(e) => {
            tracing::error!(topic, error = %e, "Failed to create verification consumer");
            return false;
        }
    };

    if let Err(e) = consumer.subscribe(&[topic]) {
        tracing::error!(topic, error = %e, "Failed to subscribe verification consumer");
        return false;
    }

    match tokio::time::timeout(timeout, consumer.recv()).await {
        Ok(Ok(message)) => {
            tracing::info!(
                topic,
                partition = message.partition(),
                offset = message.offset(),
                "Topic has data"
            );
            true
        }
        Ok(Err(e)) => {
            tracing::error!(topic, error = %e, "Verification consumer error");
            false
        }
        Err(_) => {
            tracing::warn!(topic, "No data observed on topic within timeout");
            false
        }
    }
}
