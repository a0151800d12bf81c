//! Kafka sink (spec §4.J): pushes each event as UTF-8 JSON to a configured
//! topic via `rdkafka`'s async producer, batching client-side.

use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;
use crate::event::Event;

/// Runs the Kafka sink: builds the producer off the main scheduler (its
/// constructor can block on DNS/broker metadata fetch), then registers a
/// Dispatcher consumer only once the producer is ready, per spec §4.J.
pub async fn run(
    brokers: Vec<String>,
    topic: String,
    buffer_maxsize: usize,
    send_every_n_messages: usize,
    send_every_t_seconds: u64,
    dispatcher: Dispatcher,
) {
    let broker_list = brokers.join(",");
    let producer = tokio::task::spawn_blocking(move || {
        ClientConfig::new()
            .set("bootstrap.servers", &broker_list)
            .set("queue.buffering.max.messages", buffer_maxsize.to_string())
            .set("batch.num.messages", send_every_n_messages.to_string())
            .set(
                "queue.buffering.max.ms",
                (send_every_t_seconds * 1000).to_string(),
            )
            .create::<FutureProducer>()
    })
    .await;

    let producer = match producer {
        Ok(Ok(producer)) => producer,
        Ok(Err(error)) => {
            warn!(%error, "failed to build kafka producer; kafka sink disabled");
            return;
        }
        Err(error) => {
            warn!(%error, "kafka producer construction task panicked; kafka sink disabled");
            return;
        }
    };

    info!(brokers = %brokers.join(","), %topic, "kafka sink ready");

    let topic = std::rc::Rc::new(topic);
    dispatcher.register(std::rc::Rc::new(move |event: &Event| {
        let producer = producer.clone();
        let topic = topic.clone();
        let body = serde_json::to_vec(&event.to_json()).unwrap_or_else(|_| b"{}".to_vec());
        tokio::task::spawn_local(async move {
            let record: FutureRecord<'_, (), [u8]> = FutureRecord::to(&topic).payload(body.as_slice());
            if let Err((error, _)) = producer.send(record, Timeout::After(Duration::from_secs(5))).await {
                warn!(%error, "kafka send failed; event dropped");
            }
        });
    }));
}
