//! Structured-log ingestion and fan-out daemon: the in-process event bus
//! (dispatcher + bounded queues), its two ingress parsers, and its sinks.
//!
//! The binary (`src/main.rs`) is a thin wrapper that parses the CLI and
//! calls [`run`]; the logic lives here so integration tests can drive the
//! dispatcher, queue, and sinks directly.

pub mod cli;
pub mod client;
pub mod dispatcher;
pub mod event;
pub mod queue;
pub mod session;
pub mod sinks;
pub mod sources;

use std::rc::Rc;

use tracing::{info, warn};

use cli::Cli;
use dispatcher::Dispatcher;
use sinks::LogLevel;

/// Wires the Dispatcher, starts whichever sinks are configured per spec §6
/// ("any sink whose primary host/broker option is unset is not started"),
/// and runs the ingress parsers until the native listener exits.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let dispatcher = Dispatcher::new();

    if cli.verbose {
        register_verbose_consumer(&dispatcher);
    }

    let mut started_sinks = 0;

    if let Some(addr) = cli.scribe_addr()? {
        let min_log_level = LogLevel::parse(&cli.scribe_min_log_level).unwrap_or(LogLevel::Info);
        let dispatcher = dispatcher.clone();
        tokio::task::spawn_local(sinks::scribe::run(addr, min_log_level, dispatcher));
        started_sinks += 1;
        info!(%addr, "scribe sink started");
    }

    if let Some(uri) = cli.rabbitmq_uri() {
        let vhost = cli.rabbitmq_vhost.clone();
        let queue_size = cli.rabbitmq_queue_size;
        let routing_key = cli.rabbitmq_exchange.clone();
        let dispatcher = dispatcher.clone();
        tokio::task::spawn_local(sinks::rabbitmq::run(uri, vhost, queue_size, routing_key, dispatcher));
        started_sinks += 1;
        info!("rabbitmq sink started");
    }

    let redis_addrs = cli.redis_addrs();
    if !redis_addrs.is_empty() {
        if let Some(key) = cli.redis_key.clone() {
            sinks::redis::run(redis_addrs, key, &dispatcher);
            started_sinks += 1;
            info!("redis sink started");
        } else {
            warn!("redis-host configured without redis-key; redis sink not started");
        }
    }

    if !cli.kafka_broker.is_empty() {
        let dispatcher = dispatcher.clone();
        tokio::task::spawn_local(sinks::kafka::run(
            cli.kafka_broker.clone(),
            cli.kafka_topic.clone(),
            cli.kafka_buffer_maxsize,
            cli.kafka_send_every_msg,
            cli.kafka_send_every_sec,
            dispatcher,
        ));
        started_sinks += 1;
        info!("kafka sink started");
    }

    if let Some(api_key) = cli.datadog_api_key.clone() {
        let config = sinks::datadog::DatadogConfig {
            api_key,
            application_key: cli.datadog_application_key.clone(),
            site: cli.datadog_site.clone(),
            queue_size: cli.datadog_queue_size,
        };
        sinks::datadog::run(config, &dispatcher);
        started_sinks += 1;
        info!("datadog sink started");
    }

    if started_sinks == 0 {
        warn!("no sinks configured; events will be received and discarded");
    }

    let native_addr = cli.native_addr()?;
    let syslog_addr = cli.syslog_addr()?;
    let syslog_unix_socket = cli.syslog_unix_socket.clone();

    let native_dispatcher = dispatcher.clone();
    let native_task = tokio::task::spawn_local(async move {
        if let Err(error) = sources::native::run(native_addr, native_dispatcher).await {
            warn!(%error, "native ingress exited");
        }
    });

    if let Some(addr) = syslog_addr {
        let dispatcher = dispatcher.clone();
        let timezone = cli.syslog_timezone.clone();
        tokio::task::spawn_local(async move {
            if let Err(error) = run_syslog_udp(addr, timezone, dispatcher).await {
                warn!(%error, "syslog udp ingress exited");
            }
        });
    } else if let Some(path) = syslog_unix_socket {
        let dispatcher = dispatcher.clone();
        let timezone = cli.syslog_timezone.clone();
        tokio::task::spawn_local(async move {
            if let Err(error) = run_syslog_unix(path, timezone, dispatcher).await {
                warn!(%error, "syslog unix datagram ingress exited");
            }
        });
    }

    native_task.await?;
    Ok(())
}

async fn run_syslog_udp(
    addr: std::net::SocketAddr,
    timezone: String,
    dispatcher: Dispatcher,
) -> anyhow::Result<()> {
    use std::collections::HashMap;
    use std::str::FromStr;

    let tz = chrono_tz::Tz::from_str(&timezone).unwrap_or(chrono_tz::UTC);
    let hostname_rewrites: HashMap<String, String> = HashMap::new();

    let socket = tokio::net::UdpSocket::bind(addr).await?;
    info!(%addr, "syslog ingress listening");

    let mut buf = vec![0u8; 65536];
    loop {
        let (len, _peer) = socket.recv_from(&mut buf).await?;
        let text = String::from_utf8_lossy(&buf[..len]);
        let year = chrono::Utc::now().format("%Y").to_string().parse().unwrap_or(1970);
        let event = sources::syslog::parse(text.trim_end(), &tz, year, &hostname_rewrites);
        dispatcher.dispatch(&event);
    }
}

/// Unix datagram counterpart of [`run_syslog_udp`] (spec §4.C: "UDP or Unix
/// datagram sockets"). Binds a fresh socket at `path`, removing any stale
/// socket file left behind by a previous run first.
async fn run_syslog_unix(
    path: String,
    timezone: String,
    dispatcher: Dispatcher,
) -> anyhow::Result<()> {
    use std::collections::HashMap;
    use std::str::FromStr;

    let tz = chrono_tz::Tz::from_str(&timezone).unwrap_or(chrono_tz::UTC);
    let hostname_rewrites: HashMap<String, String> = HashMap::new();

    if std::fs::metadata(&path).is_ok() {
        std::fs::remove_file(&path)?;
    }
    let socket = tokio::net::UnixDatagram::bind(&path)?;
    info!(%path, "syslog unix datagram ingress listening");

    let mut buf = vec![0u8; 65536];
    loop {
        let (len, _peer) = socket.recv_from(&mut buf).await?;
        let text = String::from_utf8_lossy(&buf[..len]);
        let year = chrono::Utc::now().format("%Y").to_string().parse().unwrap_or(1970);
        let event = sources::syslog::parse(text.trim_end(), &tz, year, &hostname_rewrites);
        dispatcher.dispatch(&event);
    }
}

fn register_verbose_consumer(dispatcher: &Dispatcher) {
    dispatcher.register(Rc::new(|event: &event::Event| {
        eprintln!("{}", event.to_json());
    }));
}
