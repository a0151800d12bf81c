//! RFC 3164 syslog ingress parser (spec §4.C).
//!
//! Deliberately hand-rolled rather than built on the `syslog_loose` crate:
//! that crate's field semantics (RFC 5424-first, different facility/severity
//! naming, no `@cee:` extension) don't line up with the exact grammar and
//! normalization rules this spec requires, and getting that wrong is worse
//! than writing forty lines of regex.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::event::Event;

const FACILITIES: &[&str] = &[
    "kern", "user", "mail", "daemon", "auth", "syslog", "lpr", "news", "uucp", "cron", "authpriv",
    "ftp", "ntp", "audit", "alert", "at", "local0", "local1", "local2", "local3", "local4",
    "local5", "local6", "local7",
];

const SEVERITIES: &[&str] = &[
    "emerg", "alert", "crit", "err", "warn", "notice", "info", "debug",
];

/// Fixed severity → `logLevel` mapping applied during normalization
/// (spec §3 invariants).
fn severity_to_log_level(severity: &str) -> Option<&'static str> {
    Some(match severity {
        "emerg" => "EMERGENCY",
        "alert" => "ALERT",
        "crit" => "CRITICAL",
        "err" => "ERROR",
        "warn" => "WARNING",
        "notice" => "NOTICE",
        "info" => "INFO",
        "debug" => "DEBUG",
        _ => return None,
    })
}

// <PRI>MMM [ D]D HH:MM:SS HOST TAG(\[PID\])?: CONTENT(\s@cee:\s<json>)?
static SYSLOG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        ^<(?P<pri>\d{1,3})>
        (?P<month>[A-Za-z]{3})\s+
        (?P<day>\d{1,2})\s
        (?P<hour>\d{2}):(?P<minute>\d{2}):(?P<second>\d{2})\s
        (?P<host>\S+)\s
        (?P<tag>[^:\[\s]+)(?:\[(?P<pid>\d+)\])?:\s?
        (?P<content>.*)$
        ",
    )
    .expect("static syslog regex is valid")
});

static CEE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<message>.*?)\s*@cee:\s*(?P<json>\{.*\})\s*$")
        .expect("static cee regex is valid")
});

/// A parsed-but-not-yet-normalized syslog record, matching the raw
/// extraction step of spec §4.C before `tag`→`appname`/`severity`→
/// `logLevel` renaming.
#[derive(Debug, Default, PartialEq)]
struct RawSyslogRecord {
    facility: Option<&'static str>,
    severity: Option<&'static str>,
    hostname: Option<String>,
    tag: Option<String>,
    pid: Option<String>,
    message: String,
    timestamp: Option<DateTime<Utc>>,
}

fn decode_priority(priority: u32) -> (Option<&'static str>, Option<&'static str>) {
    // Priorities > 191 leave both fields absent (spec §4.C); this also
    // protects against the facility index going out of bounds, which the
    // Python original did not guard and would otherwise panic equivalently.
    if priority > 191 {
        return (None, None);
    }
    let facility_index = (priority / 8) as usize;
    let severity_index = (priority % 8) as usize;
    (
        FACILITIES.get(facility_index).copied(),
        SEVERITIES.get(severity_index).copied(),
    )
}

fn parse_raw(input: &str, tz: &chrono_tz::Tz, reference_year: i32) -> RawSyslogRecord {
    let Some(captures) = SYSLOG_RE.captures(input) else {
        // "If the regex does not match at all, the entire input becomes
        // `message`" (spec §4.C).
        return RawSyslogRecord {
            message: input.to_string(),
            ..Default::default()
        };
    };

    let priority: u32 = captures["pri"].parse().unwrap_or(9999);
    let (facility, severity) = decode_priority(priority);

    let timestamp = parse_timestamp(&captures, tz, reference_year);

    RawSyslogRecord {
        facility,
        severity,
        hostname: Some(captures["host"].to_string()),
        tag: Some(captures["tag"].to_string()),
        pid: captures.name("pid").map(|m| m.as_str().to_string()),
        message: captures["content"].to_string(),
        timestamp,
    }
}

fn parse_timestamp(
    captures: &regex::Captures,
    tz: &chrono_tz::Tz,
    reference_year: i32,
) -> Option<DateTime<Utc>> {
    let month = month_number(&captures["month"])?;
    let day: u32 = captures["day"].parse().ok()?;
    let hour: u32 = captures["hour"].parse().ok()?;
    let minute: u32 = captures["minute"].parse().ok()?;
    let second: u32 = captures["second"].parse().ok()?;

    let naive = NaiveDateTime::parse_from_str(
        &format!("{reference_year}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"),
        "%Y-%m-%d %H:%M:%S",
    )
    .ok()?;

    let local = tz.from_local_datetime(&naive).single()?;
    Some(local.with_timezone(&Utc))
}

fn month_number(month: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    MONTHS.iter().position(|m| m.eq_ignore_ascii_case(month)).map(|i| i as u32 + 1)
}

/// Parses one RFC 3164 line and normalizes it into the common [`Event`]
/// shape per spec §3's invariants and §4.C's normalization rules.
///
/// `reference_year` is needed because RFC 3164 timestamps carry no year;
/// callers pass the wall-clock year at receipt time.
pub fn parse(
    input: &str,
    tz: &chrono_tz::Tz,
    reference_year: i32,
    hostname_rewrites: &HashMap<String, String>,
) -> Event {
    let raw = parse_raw(input, tz, reference_year);
    let mut fields = IndexMap::new();

    // `facility`/`severity` are intermediate RawSyslogRecord fields only;
    // spec §3 removes both after normalization, leaving just the mapped
    // `logLevel` below.
    let log_level = raw.severity.and_then(severity_to_log_level);
    if let Some(log_level) = log_level {
        fields.insert("logLevel".to_string(), Value::String(log_level.to_string()));
    }

    if let Some(hostname) = raw.hostname {
        let hostname = hostname_rewrites
            .get(&hostname)
            .cloned()
            .unwrap_or(hostname);
        fields.insert("hostname".to_string(), Value::String(hostname));
    }

    if let Some(tag) = raw.tag {
        fields.insert("appname".to_string(), Value::String(tag));
    }

    if let Some(pid) = raw.pid {
        // Kept as a string per spec §9 open question (c); not coerced to
        // an integer.
        fields.insert("pid".to_string(), Value::String(pid));
    }

    fields.insert("category".to_string(), Value::String("syslog".to_string()));

    if let Some(timestamp) = raw.timestamp {
        fields.insert(
            "timestamp".to_string(),
            serde_json::json!(timestamp.timestamp() as f64),
        );
    }

    apply_message_and_cee(&mut fields, &raw.message);

    Event::from_map(fields)
}

/// Splits the message on the `@cee:` structured-data marker and merges the
/// trailing JSON object into the event, per spec §4.C.
fn apply_message_and_cee(fields: &mut IndexMap<String, Value>, content: &str) {
    if let Some(captures) = CEE_RE.captures(content) {
        let message = captures["message"].to_string();
        match serde_json::from_str::<Value>(&captures["json"]) {
            Ok(Value::Object(map)) => {
                fields.insert("message".to_string(), Value::String(message));
                for (k, v) in map {
                    fields.insert(k, v);
                }
                return;
            }
            Ok(_) | Err(_) => {
                warn!("@cee: structured-data tail was not a JSON object; keeping full message");
            }
        }
    }
    fields.insert("message".to_string(), Value::String(content.to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Amsterdam;

    #[test]
    fn decodes_documented_priority_example() {
        // 13 = facility 1 (user) * 8 + severity 5 (notice)
        let (facility, severity) = decode_priority(13);
        assert_eq!(facility, Some("user"));
        assert_eq!(severity, Some("notice"));
    }

    #[test]
    fn priorities_above_191_have_absent_facility_and_severity() {
        let (facility, severity) = decode_priority(192);
        assert_eq!(facility, None);
        assert_eq!(severity, None);
    }

    #[test]
    fn parses_and_normalizes_documented_example() {
        let tz = Amsterdam;
        let hostnames = HashMap::new();
        let event = parse(
            "<13>Jan 15 16:59:26 myhost test: hello",
            &tz,
            2015,
            &hostnames,
        );
        assert_eq!(event.get_str("appname"), Some("test"));
        assert_eq!(event.log_level(), Some("NOTICE"));
        assert_eq!(event.category(), Some("syslog"));
        assert_eq!(event.get_str("hostname"), Some("myhost"));
        assert_eq!(event.message(), Some("hello"));
        assert_eq!(event.timestamp(), Some(1421337566.0));
    }

    #[test]
    fn merges_cee_structured_data_tail() {
        let tz = Amsterdam;
        let hostnames = HashMap::new();
        let event = parse(
            "<13>Jan 16 21:00:00 waar ralphm: blah @cee: {\"event\":\"started\"}",
            &tz,
            2015,
            &hostnames,
        );
        assert_eq!(event.message(), Some("blah"));
        assert_eq!(event.get_str("event"), Some("started"));
    }

    #[test]
    fn unparseable_input_becomes_the_whole_message() {
        let tz = Amsterdam;
        let hostnames = HashMap::new();
        let event = parse("this is not syslog at all", &tz, 2015, &hostnames);
        assert_eq!(event.message(), Some("this is not syslog at all"));
        assert_eq!(event.get_str("facility"), None);
    }
}
