//! DataDog events sink (supplemented from `original_source/udplog/datadog.py`
//! — see `SPEC_FULL.md` §7). Posts each event to the DataDog Events API,
//! routed through a [`BoundedQueue`] since an HTTP endpoint can stall
//! exactly as a TCP one can.

use std::rc::Rc;

use reqwest::Client;
use serde_json::{Map, Value};
use tracing::warn;
use url::Url;

use crate::dispatcher::Dispatcher;
use crate::event::Event;
use crate::queue::BoundedQueue;

pub struct DatadogConfig {
    pub api_key: String,
    pub application_key: Option<String>,
    pub site: String,
    pub queue_size: usize,
}

/// Registers the DataDog sink's Dispatcher consumer. Unlike the TCP-backed
/// sinks, there is no persistent connection to lose, so there's no
/// reconnect loop — the sink is simply always registered once its primary
/// credential (`api-key`) is configured, per spec §6's "any sink whose
/// primary host/broker option is unset is not started" rule.
pub fn run(config: DatadogConfig, dispatcher: &Dispatcher) {
    let client = Rc::new(Client::new());
    let endpoint = Rc::new(build_endpoint(&config.site, &config.api_key, config.application_key.as_deref()));

    let queue: BoundedQueue<Value> = BoundedQueue::new(Some(config.queue_size), {
        let client = client.clone();
        let endpoint = endpoint.clone();
        Rc::new(move |body: Value| {
            let client = client.clone();
            let endpoint = (*endpoint).clone();
            Box::pin(async move { post_event(&client, endpoint, &body).await })
        })
    });

    let consumer = queue.put_fn(|event: &Event| build_event_payload(event));
    dispatcher.register(consumer);
}

async fn post_event(client: &Client, endpoint: Url, body: &Value) -> anyhow::Result<()> {
    let response = client.post(endpoint).json(body).send().await?;
    if !response.status().is_success() {
        anyhow::bail!("datadog events api returned {}", response.status());
    }
    Ok(())
}

fn build_endpoint(site: &str, api_key: &str, application_key: Option<&str>) -> Url {
    let mut url = Url::parse(&format!("https://app.{site}/api/v1/events")).unwrap_or_else(|_| {
        Url::parse("https://app.datadoghq.com/api/v1/events").expect("fallback url is valid")
    });
    url.query_pairs_mut().append_pair("api_key", api_key);
    if let Some(application_key) = application_key {
        url.query_pairs_mut().append_pair("application_key", application_key);
    }
    url
}

/// Fills in the DataDog event payload defaults described in spec §6:
/// `tags`, `title`, `priority`, `text`.
fn build_event_payload(event: &Event) -> Value {
    let mut map: Map<String, Value> = event
        .fields()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    map.entry("tags").or_insert_with(|| {
        let mut tags: Vec<String> = event
            .fields()
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), "tags" | "title" | "priority" | "text"))
            .map(|(k, v)| format!("{k}:{}", value_to_tag_string(v)))
            .collect();
        tags.push("emitter:udplog".to_string());
        Value::String(tags.join(","))
    });

    map.entry("title")
        .or_insert_with(|| Value::String(event.category().unwrap_or("default").to_string()));

    map.entry("priority")
        .or_insert_with(|| Value::String("normal".to_string()));

    map.entry("text").or_insert_with(|| {
        event
            .message()
            .map(|m| Value::String(m.to_string()))
            .unwrap_or_else(|| event.to_json())
    });

    Value::Object(map)
}

fn value_to_tag_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
