//! Oversize-aware UDP sender (spec §4.A) — the Rust counterpart of
//! `original_source/udplog/udplog.py`'s `UDPLogger.log`.
//!
//! This is the piece applications would link against to emit native-format
//! datagrams to a udplog daemon; the daemon itself never calls it in normal
//! operation, but it lives in this crate because the size-cap and
//! meta-event-on-failure behavior are part of the event model's contract
//! (spec §4.A), not of any particular host application's logging
//! integration (which spec §1 explicitly puts out of scope).
//!
//! Synchronous by design, like the Python original: the socket it wraps is
//! a plain connected `std::net::UdpSocket`, so a single `log()` call never
//! needs an async runtime to be present.

use std::net::UdpSocket;

use crate::event::{self, Event, DEFAULT_MAX_DATAGRAM_SIZE};

/// Sends events to a udplog daemon, enforcing the datagram size cap and
/// falling back to a meta-event on oversize or transport failure.
pub struct Logger {
    socket: UdpSocket,
    max_datagram_size: usize,
}

impl Logger {
    /// Connects to `addr` (e.g. `"127.0.0.1:55647"`), the daemon's native
    /// ingress address.
    pub fn connect(addr: &str) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(addr)?;
        Ok(Logger {
            socket,
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
        })
    }

    pub fn with_max_datagram_size(mut self, max_datagram_size: usize) -> Self {
        self.max_datagram_size = max_datagram_size;
        self
    }

    /// Encodes and sends `event`. If the encoded frame exceeds the size
    /// cap, or the send itself fails, a self-describing meta-event is sent
    /// in its place (spec §4.A); if even that fails, the failure is
    /// written to stderr exactly once and discarded.
    pub fn log(&self, event: &Event) {
        let frame = event::encode(event);

        if frame.len() <= self.max_datagram_size {
            match self.socket.send(&frame) {
                Ok(_) => return,
                Err(_) => {
                    self.send_meta_event_or_give_up(
                        event,
                        frame.len(),
                        "failed to send udplog message",
                    );
                    return;
                }
            }
        }

        self.send_meta_event_or_give_up(
            event,
            frame.len(),
            "udplog message exceeds max datagram size",
        );
    }

    fn send_meta_event_or_give_up(&self, original: &Event, original_size: usize, reason: &str) {
        let meta = event::build_meta_event(original, original_size, reason);
        let frame = event::encode(&meta);
        if self.socket.send(&frame).is_err() {
            eprintln!("{reason}: failed to send udplog meta-event too, discarding event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket as StdUdpSocket;

    #[test]
    fn well_sized_event_is_sent_as_is() {
        let receiver = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        let receiver_addr = receiver.local_addr().unwrap();
        receiver
            .set_read_timeout(Some(std::time::Duration::from_millis(200)))
            .unwrap();

        let logger = Logger::connect(&receiver_addr.to_string()).unwrap();
        let mut sent = Event::new();
        sent.set_category("app");
        sent.insert("message", "hello");
        logger.log(&sent);

        let mut buf = [0u8; 65536];
        let (len, _) = receiver.recv_from(&mut buf).unwrap();
        let received = event::decode(&buf[..len]).unwrap();
        assert_eq!(received.category(), Some("app"));
        assert_eq!(received.get_str("message"), Some("hello"));
    }

    #[test]
    fn oversize_event_is_replaced_by_a_meta_event() {
        let receiver = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        let receiver_addr = receiver.local_addr().unwrap();
        receiver
            .set_read_timeout(Some(std::time::Duration::from_millis(200)))
            .unwrap();

        let logger = Logger::connect(&receiver_addr.to_string()).unwrap();
        let mut sent = Event::new();
        sent.set_category("app");
        sent.insert("message", "x".repeat(9000));
        let expected_size = event::encode(&sent).len();
        assert!(expected_size > DEFAULT_MAX_DATAGRAM_SIZE);
        logger.log(&sent);

        let mut buf = [0u8; 65536];
        let (len, _) = receiver.recv_from(&mut buf).unwrap();
        let received = event::decode(&buf[..len]).unwrap();

        assert_eq!(received.category(), Some(event::META_EVENT_CATEGORY));
        assert_eq!(received.log_level(), Some("WARNING"));
        assert_eq!(
            received.get("original_size").and_then(|v| v.as_u64()),
            Some(expected_size as u64)
        );
        let original = received.get("original").unwrap();
        let message = original.get("message").unwrap().as_str().unwrap();
        assert!(message.ends_with("[..]"));
        assert_eq!(
            message.chars().count(),
            event::MAX_TRIMMED_MESSAGE_SIZE + 4
        );
    }
}
