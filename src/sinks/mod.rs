//! Outbound delivery paths. Each sink owns a reconnect loop (built on
//! [`crate::session::Backoff`]) that registers/unregisters a Dispatcher
//! consumer as its transport comes up and down.

pub mod datadog;
pub mod kafka;
pub mod rabbitmq;
pub mod redis;
pub mod scribe;

/// The eight `logLevel` values an event may carry, ordered from least to
/// most severe so the Scribe sink can filter on a configured minimum
/// (spec §4.G).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl LogLevel {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "DEBUG" => LogLevel::Debug,
            "INFO" => LogLevel::Info,
            "NOTICE" => LogLevel::Notice,
            "WARNING" => LogLevel::Warning,
            "ERROR" => LogLevel::Error,
            "CRITICAL" => LogLevel::Critical,
            "ALERT" => LogLevel::Alert,
            "EMERGENCY" => LogLevel::Emergency,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_levels_order_from_debug_to_emergency() {
        assert!(LogLevel::Debug < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Emergency);
    }
}
