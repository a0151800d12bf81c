//! Redis round-robin pool sink (spec §4.I): pushes each event onto one of a
//! dynamic set of live Redis endpoints, removing an endpoint from the live
//! set on failure and re-adding it once its own reconnect loop succeeds.

use std::cell::RefCell;
use std::rc::Rc;

use rand::Rng;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use snafu::Snafu;
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;
use crate::event::Event;
use crate::session::Backoff;

#[derive(Debug, Snafu)]
pub enum RedisSinkError {
    #[snafu(display("no redis endpoint is currently connected"))]
    NoClient,
    #[snafu(display("redis push failed: {source}"))]
    Push { source: redis::RedisError },
}

struct Endpoint {
    addr: String,
    connection: RefCell<Option<MultiplexedConnection>>,
}

/// Holds the live set of connected endpoints and round-robins `lpush`
/// across them.
#[derive(Clone)]
pub struct RedisPool {
    endpoints: Rc<Vec<Rc<Endpoint>>>,
    live: Rc<RefCell<Vec<usize>>>,
}

impl RedisPool {
    pub fn new(addrs: Vec<String>) -> Self {
        let endpoints = addrs
            .into_iter()
            .map(|addr| {
                Rc::new(Endpoint {
                    addr,
                    connection: RefCell::new(None),
                })
            })
            .collect();
        RedisPool {
            endpoints: Rc::new(endpoints),
            live: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Spawns one independent reconnect loop per configured endpoint; each
    /// loop adds/removes its own index from the shared live set as its
    /// connection comes up and down.
    pub fn spawn_reconnect_loops(&self) {
        for (index, endpoint) in self.endpoints.iter().enumerate() {
            let pool = self.clone();
            let endpoint = endpoint.clone();
            tokio::task::spawn_local(async move {
                let mut backoff = Backoff::default();
                loop {
                    match redis::Client::open(endpoint.addr.clone())
                        .ok()
                        .map(|c| c.get_multiplexed_tokio_connection())
                    {
                        Some(future) => match future.await {
                            Ok(connection) => {
                                info!(addr = %endpoint.addr, "redis endpoint connected");
                                *endpoint.connection.borrow_mut() = Some(connection);
                                pool.mark_live(index);
                                backoff.reset();
                                // Stay "connected" until a push against this
                                // endpoint observes a failure; `lpush` below
                                // removes it from `live` and clears the slot
                                // itself, so we just poll for that here.
                                loop {
                                    tokio::time::sleep(std::time::Duration::from_millis(500))
                                        .await;
                                    if endpoint.connection.borrow().is_none() {
                                        break;
                                    }
                                }
                            }
                            Err(error) => {
                                warn!(addr = %endpoint.addr, %error, "redis connect failed");
                            }
                        },
                        None => warn!(addr = %endpoint.addr, "invalid redis endpoint address"),
                    }
                    tokio::time::sleep(backoff.next_delay()).await;
                }
            });
        }
    }

    fn mark_live(&self, index: usize) {
        let mut live = self.live.borrow_mut();
        if !live.contains(&index) {
            live.push(index);
        }
    }

    fn mark_dead(&self, index: usize) {
        self.live.borrow_mut().retain(|&i| i != index);
    }

    /// `LPUSH key value` against a uniformly random live endpoint, bounded
    /// to `2 * endpoints.len()` attempts total (resolving spec §9 open
    /// question (a): bound retries per call instead of recursing
    /// unboundedly across a thundering-herd disconnect).
    pub async fn lpush(&self, key: &str, value: &[u8]) -> Result<(), RedisSinkError> {
        let max_attempts = self.endpoints.len().max(1) * 2;

        for _ in 0..max_attempts {
            let index = {
                let live = self.live.borrow();
                if live.is_empty() {
                    return Err(RedisSinkError::NoClient);
                }
                live[rand::rng().random_range(0..live.len())]
            };

            let endpoint = &self.endpoints[index];
            let connection = endpoint.connection.borrow().clone();
            let Some(mut connection) = connection else {
                self.mark_dead(index);
                continue;
            };

            match connection.lpush::<_, _, ()>(key, value).await {
                Ok(()) => return Ok(()),
                Err(error) if error.is_connection_dropped() || error.is_io_error() => {
                    warn!(addr = %endpoint.addr, %error, "redis push failed, endpoint marked dead");
                    *endpoint.connection.borrow_mut() = None;
                    self.mark_dead(index);
                    continue;
                }
                Err(error) => {
                    warn!(%error, "redis push failed with a non-connection error");
                    return Err(RedisSinkError::Push { source: error });
                }
            }
        }

        Err(RedisSinkError::NoClient)
    }
}

/// Runs the Redis sink: spawns the pool's reconnect loops and registers a
/// Dispatcher consumer that serializes and pushes each event.
pub fn run(addrs: Vec<String>, key: String, dispatcher: &Dispatcher) {
    let pool = RedisPool::new(addrs);
    pool.spawn_reconnect_loops();

    let pool_for_consumer = pool.clone();
    let key = Rc::new(key);
    dispatcher.register(Rc::new(move |event: &Event| {
        let pool = pool_for_consumer.clone();
        let key = key.clone();
        let body = serde_json::to_vec(&event.to_json()).unwrap_or_else(|_| b"{}".to_vec());
        tokio::task::spawn_local(async move {
            match pool.lpush(&key, &body).await {
                Ok(()) => {}
                Err(RedisSinkError::NoClient) => {
                    warn!("redis pool has no live endpoints; dropping event");
                }
                Err(error @ RedisSinkError::Push { .. }) => {
                    warn!(%error, "redis push failed; event dropped");
                }
            }
        });
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lpush_fails_fast_with_no_live_endpoints() {
        let local = tokio::task::LocalSet::new();
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        local.block_on(&rt, async {
            let pool = RedisPool::new(vec!["redis://127.0.0.1:1".to_string()]);
            let result = pool.lpush("key", b"value").await;
            assert!(matches!(result, Err(RedisSinkError::NoClient)));
        });
    }

    #[test]
    fn mark_live_is_idempotent() {
        let pool = RedisPool::new(vec!["a".to_string(), "b".to_string()]);
        pool.mark_live(0);
        pool.mark_live(0);
        assert_eq!(pool.live.borrow().len(), 1);
    }
}
