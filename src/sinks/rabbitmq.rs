//! RabbitMQ sink (spec §4.H): publishes events to a durable topic exchange
//! over an AMQP channel, routed through a [`BoundedQueue`] for backpressure.

use std::rc::Rc;

use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Connection, ConnectionProperties, ExchangeKind};
use serde_json::Value;
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;
use crate::event::Event;
use crate::queue::BoundedQueue;
use crate::session::Backoff;

pub const EXCHANGE_NAME: &str = "logs";

/// Runs the RabbitMQ sink's reconnect loop until the process shuts down.
pub async fn run(
    uri: String,
    vhost: String,
    queue_size: usize,
    routing_key: String,
    dispatcher: Dispatcher,
) {
    let mut backoff = Backoff::default();

    loop {
        match connect_and_serve(&uri, &vhost, queue_size, &routing_key, &dispatcher).await {
            Ok(()) => backoff.reset(),
            Err(error) => warn!(%error, "rabbitmq connection lost"),
        }
        tokio::time::sleep(backoff.next_delay()).await;
    }
}

async fn connect_and_serve(
    uri: &str,
    vhost: &str,
    queue_size: usize,
    routing_key: &str,
    dispatcher: &Dispatcher,
) -> anyhow::Result<()> {
    let full_uri = format!("{uri}/{}", vhost.trim_start_matches('/'));
    let connection = Connection::connect(&full_uri, ConnectionProperties::default()).await?;
    let channel = connection.create_channel().await?;

    channel
        .exchange_declare(
            EXCHANGE_NAME,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                auto_delete: false,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    info!("rabbitmq sink connected, exchange {EXCHANGE_NAME} declared");

    let channel = Rc::new(channel);
    let routing_key = Rc::new(routing_key.to_string());
    let queue: BoundedQueue<Vec<u8>> = BoundedQueue::new(Some(queue_size), {
        let channel = channel.clone();
        let routing_key = routing_key.clone();
        Rc::new(move |body: Vec<u8>| {
            let channel = channel.clone();
            let routing_key = routing_key.clone();
            Box::pin(async move {
                channel
                    .basic_publish(
                        EXCHANGE_NAME,
                        &routing_key,
                        BasicPublishOptions::default(),
                        &body,
                        lapin::BasicProperties::default(),
                    )
                    .await?
                    .await?;
                Ok(())
            })
        })
    });

    let consumer = queue.put_fn(|event: &Event| encode_for_publish(event));
    let token = dispatcher.register(consumer);

    // Hold the registration open until the underlying connection reports
    // an error, at which point we unregister and let the caller retry.
    let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
    let closed_tx = std::cell::RefCell::new(Some(closed_tx));
    connection.on_error(move |error| {
        if let Some(tx) = closed_tx.borrow_mut().take() {
            let _ = tx.send(error);
        }
    });

    let close_reason = closed_rx.await;
    dispatcher.unregister(token);
    queue.stop();
    anyhow::bail!("rabbitmq connection closed: {close_reason:?}")
}

/// Stringifies `timestamp` and coerces `isError` to a boolean on a private
/// copy, per spec §4.H, before serializing to the publish body.
fn encode_for_publish(event: &Event) -> Vec<u8> {
    let mut event = event.clone();
    if let Some(timestamp) = event.get("timestamp").cloned() {
        let stringified = match &timestamp {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        event.insert("timestamp", Value::String(stringified));
    }
    if let Some(is_error) = event.get("isError").cloned() {
        let truthy = is_truthy(&is_error);
        event.insert("isError", Value::Bool(truthy));
    }
    serde_json::to_vec(&event.to_json()).unwrap_or_else(|_| b"{}".to_vec())
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Null => false,
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stringifies_numeric_timestamp() {
        let mut event = Event::new();
        event.insert("timestamp", 1421337566.0);
        let body = encode_for_publish(&event);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["timestamp"], Value::String("1421337566.0".to_string()));
    }

    #[test]
    fn coerces_truthy_is_error_values() {
        let mut event = Event::new();
        event.insert("isError", "yes");
        let body = encode_for_publish(&event);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["isError"], Value::Bool(true));
    }

    #[test]
    fn coerces_falsy_is_error_values() {
        let mut event = Event::new();
        event.insert("isError", "");
        let body = encode_for_publish(&event);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["isError"], Value::Bool(false));
    }
}
