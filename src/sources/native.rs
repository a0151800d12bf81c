//! Native ingress parser (spec §4.B): reads `CATEGORY:\t<json>` datagrams
//! off a UDP socket and hands each decoded event to the Dispatcher.

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tracing::warn;

use crate::dispatcher::Dispatcher;
use crate::event;

/// Maximum datagram size accepted on the native ingress socket.
pub const MAX_DATAGRAM_SIZE: usize = 65536;

fn current_timestamp() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Binds the native ingress UDP socket and runs its receive loop until the
/// socket errors. Each well-formed datagram is decoded and dispatched; a
/// malformed datagram is logged and dropped (spec §7).
pub async fn run(addr: SocketAddr, dispatcher: Dispatcher) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(addr).await?;
    tracing::info!(%addr, "native ingress listening");

    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, peer) = socket.recv_from(&mut buf).await?;
        match event::decode(&buf[..len]) {
            Ok(mut event) => {
                if event.timestamp().is_none() {
                    event.set_timestamp(current_timestamp());
                }
                dispatcher.dispatch(&event)
            }
            Err(error) => warn!(%peer, %error, "dropping malformed native datagram"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn decodes_documented_example_datagram() {
        let event = event::decode(b"test_category:\t{\"key\":\"value\"}").unwrap();
        assert_eq!(event.category(), Some("test_category"));
        assert_eq!(event.get_str("key"), Some("value"));
    }

    #[tokio::test]
    async fn one_datagram_dispatches_exactly_once() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let dispatcher = Dispatcher::new();
                let received: Rc<RefCell<Vec<Event>>> = Rc::new(RefCell::new(Vec::new()));
                let received_clone = received.clone();
                dispatcher.register(Rc::new(move |e: &Event| {
                    received_clone.borrow_mut().push(e.clone());
                }));

                let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
                let server_addr = server.local_addr().unwrap();
                drop(server);

                let dispatcher_clone = dispatcher.clone();
                let handle = tokio::task::spawn_local(async move {
                    let _ = run(server_addr, dispatcher_clone).await;
                });

                // Give the listener a moment to bind before sending.
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
                client
                    .send_to(b"test_category:\t{\"key\":\"value\"}", server_addr)
                    .await
                    .unwrap();

                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                handle.abort();

                let received = received.borrow();
                assert_eq!(received.len(), 1);
                assert_eq!(received[0].category(), Some("test_category"));
                assert_eq!(received[0].get_str("key"), Some("value"));
            })
            .await;
    }
}
