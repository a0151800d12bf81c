//! Reconnecting session support (spec §4.F).
//!
//! There's no single generic "session" type here — each sink's connect loop
//! is hand-written, because each transport's connect/send/disconnect shape
//! differs too much to abstract profitably (Scribe's request/reply table,
//! RabbitMQ's channel, Redis's pool-of-endpoints, Kafka's producer handle
//! all need different things held across a reconnect). What *is* shared is
//! the backoff delay sequence, so it's pulled out as [`Backoff`] and reused
//! by every sink's reconnect loop in `sinks/`.

use std::time::Duration;

/// Exponential backoff capped at 30s, reset to the initial delay on success,
/// per spec §4.F ("exponentially growing delay capped at `maxDelay = 30s`").
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub const DEFAULT_INITIAL: Duration = Duration::from_millis(500);
    pub const DEFAULT_MAX: Duration = Duration::from_secs(30);

    pub fn new(initial: Duration, max: Duration) -> Self {
        Backoff {
            initial,
            max,
            current: initial,
        }
    }

    /// Returns the delay to wait before the next connect attempt, then
    /// doubles it (capped) for the attempt after that.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = std::cmp::min(self.current * 2, self.max);
        delay
    }

    /// Resets the delay sequence back to its initial value; call this after
    /// a successful connection.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new(Self::DEFAULT_INITIAL, Self::DEFAULT_MAX)
    }
}

/// Tracks whether a session's Dispatcher registration is currently live;
/// used by sink connect loops to assert "the consumer registered by a
/// session is in the Dispatcher iff the session's connection is up"
/// (spec §8 property 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn reset_returns_to_initial_delay() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(500));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }
}
