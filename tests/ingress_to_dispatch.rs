//! End-to-end check that a native-format datagram reaches every registered
//! consumer exactly once, and that the bounded queue honors drop-oldest
//! semantics across a pause/resume cycle — the two concrete properties
//! called out together in spec §8.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use udplog::dispatcher::Dispatcher;
use udplog::event::Event;
use udplog::queue::BoundedQueue;

#[tokio::test]
async fn dispatch_reaches_every_consumer_once_per_event() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let dispatcher = Dispatcher::new();
            let first: Rc<RefCell<u32>> = Rc::new(RefCell::new(0));
            let second: Rc<RefCell<u32>> = Rc::new(RefCell::new(0));

            let first_clone = first.clone();
            dispatcher.register(Rc::new(move |_: &Event| *first_clone.borrow_mut() += 1));
            let second_clone = second.clone();
            dispatcher.register(Rc::new(move |_: &Event| *second_clone.borrow_mut() += 1));

            let mut event = Event::new();
            event.set_category("app");
            dispatcher.dispatch(&event);

            assert_eq!(*first.borrow(), 1);
            assert_eq!(*second.borrow(), 1);
        })
        .await;
}

#[tokio::test]
async fn bounded_queue_keeps_last_n_items_after_paused_overflow() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let delivered = Rc::new(RefCell::new(Vec::new()));
            let delivered_clone = delivered.clone();
            let queue: BoundedQueue<u32> = BoundedQueue::new(
                Some(3),
                Rc::new(move |item: u32| {
                    let delivered = delivered_clone.clone();
                    Box::pin(async move {
                        delivered.borrow_mut().push(item);
                        Ok(())
                    })
                }),
            );

            queue.pause();
            for item in 1..=5u32 {
                queue.put(item);
            }
            assert_eq!(queue.len(), 3);

            queue.resume();
            tokio::time::sleep(Duration::from_millis(30)).await;

            assert_eq!(*delivered.borrow(), vec![3, 4, 5]);
        })
        .await;
}
