//! Command-line surface (spec §6). Flag names and defaults are reproduced
//! exactly; see `SPEC_FULL.md` §5 for the DataDog flags this adds beyond
//! the distilled spec.

use std::net::SocketAddr;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "udplog", about = "Structured-log ingestion and fan-out daemon")]
pub struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    pub udplog_interface: String,
    #[arg(long, default_value_t = 55647)]
    pub udplog_port: u16,

    #[arg(long)]
    pub scribe_host: Option<String>,
    #[arg(long, default_value_t = 1463)]
    pub scribe_port: u16,
    #[arg(long, default_value = "INFO")]
    pub scribe_min_log_level: String,

    #[arg(long)]
    pub rabbitmq_host: Option<String>,
    #[arg(long, default_value_t = 5672)]
    pub rabbitmq_port: u16,
    #[arg(long, default_value = "/")]
    pub rabbitmq_vhost: String,
    #[arg(long, default_value = "logs")]
    pub rabbitmq_exchange: String,
    #[arg(long, default_value_t = 2500)]
    pub rabbitmq_queue_size: usize,
    #[arg(long, default_value = "guest")]
    pub rabbitmq_user: String,
    #[arg(long, default_value = "guest")]
    pub rabbitmq_password: String,

    #[arg(long)]
    pub redis_host: Vec<String>,
    #[arg(long, default_value_t = 6379)]
    pub redis_port: u16,
    #[arg(long)]
    pub redis_key: Option<String>,

    #[arg(long)]
    pub kafka_broker: Vec<String>,
    #[arg(long, default_value = "udplog")]
    pub kafka_topic: String,
    #[arg(long, default_value_t = 2500)]
    pub kafka_buffer_maxsize: usize,
    #[arg(long, default_value_t = 1000)]
    pub kafka_send_every_msg: usize,
    #[arg(long, default_value_t = 5)]
    pub kafka_send_every_sec: u64,

    #[arg(long)]
    pub syslog_interface: Option<String>,
    #[arg(long)]
    pub syslog_port: Option<u16>,
    #[arg(long)]
    pub syslog_unix_socket: Option<String>,
    #[arg(long, default_value = "UTC")]
    pub syslog_timezone: String,

    /// Supplemented beyond the distilled spec: see SPEC_FULL.md §5.
    #[arg(long, env = "DATADOG_API_KEY")]
    pub datadog_api_key: Option<String>,
    #[arg(long, env = "DATADOG_APPLICATION_KEY")]
    pub datadog_application_key: Option<String>,
    #[arg(long, default_value = "datadoghq.com")]
    pub datadog_site: String,
    #[arg(long, default_value_t = 2500)]
    pub datadog_queue_size: usize,

    #[arg(long)]
    pub verbose: bool,
}

impl Cli {
    pub fn native_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.udplog_interface, self.udplog_port).parse()?)
    }

    pub fn syslog_addr(&self) -> anyhow::Result<Option<SocketAddr>> {
        match (&self.syslog_interface, self.syslog_port) {
            (Some(interface), Some(port)) => Ok(Some(format!("{interface}:{port}").parse()?)),
            _ => Ok(None),
        }
    }

    pub fn scribe_addr(&self) -> anyhow::Result<Option<SocketAddr>> {
        match &self.scribe_host {
            Some(host) => Ok(Some(format!("{host}:{}", self.scribe_port).parse()?)),
            None => Ok(None),
        }
    }

    /// Base URI without the vhost path segment; `sinks::rabbitmq::run`
    /// appends the (URL-encoded) vhost itself.
    pub fn rabbitmq_uri(&self) -> Option<String> {
        self.rabbitmq_host.as_ref().map(|host| {
            format!(
                "amqp://{}:{}@{}:{}",
                self.rabbitmq_user, self.rabbitmq_password, host, self.rabbitmq_port
            )
        })
    }

    pub fn redis_addrs(&self) -> Vec<String> {
        self.redis_host
            .iter()
            .map(|host| format!("redis://{host}:{}", self.redis_port))
            .collect()
    }
}
