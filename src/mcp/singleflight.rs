//! Per-key in-flight operation registry.
//!
//! The first caller for a key becomes the leader and performs the work;
//! callers arriving before the leader finishes subscribe to its result
//! instead of duplicating the work. Used to coalesce concurrent
//! reconnect attempts for the same server, but generic over any
//! cloneable result.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use tokio::sync::broadcast;

/// Coalesces concurrent operations that share a key.
pub struct Singleflight<V: Clone + Send + 'static> {
    inflight: Mutex<HashMap<String, broadcast::Sender<V>>>,
}

impl<V: Clone + Send + 'static> Default for Singleflight<V> {
    fn default() -> Self {
        Self { inflight: Mutex::new(HashMap::new()) }
    }
}

impl<V: Clone + Send + 'static> Singleflight<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key`, or wait for an already-running call.
    ///
    /// Returns the shared value and whether this caller was the leader.
    /// If a leader is dropped before publishing (cancellation), a waiter
    /// promotes itself and runs the work.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> (V, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        // Consumed at most once: the leader branch returns immediately.
        let mut work = Some(work);
        loop {
            let waiter = {
                let mut map = self.inflight.lock().expect("singleflight lock poisoned");
                match map.get(key) {
                    Some(tx) => Some(tx.subscribe()),
                    None => {
                        let (tx, _) = broadcast::channel(1);
                        map.insert(key.to_string(), tx);
                        None
                    }
                }
            };

            match waiter {
                Some(mut rx) => match rx.recv().await {
                    Ok(value) => return (value, false),
                    // Leader vanished without publishing; try to take over.
                    Err(_) => continue,
                },
                None => {
                    let guard = LeaderGuard { registry: self, key };
                    let work = work.take().expect("leader selected twice");
                    let value = work().await;
                    guard.publish(value.clone());
                    return (value, true);
                }
            }
        }
    }
}

/// Removes the in-flight entry even if the leader's future is dropped
/// mid-work, so waiters see a closed channel and can promote themselves.
struct LeaderGuard<'a, V: Clone + Send + 'static> {
    registry: &'a Singleflight<V>,
    key: &'a str,
}

impl<V: Clone + Send + 'static> LeaderGuard<'_, V> {
    fn publish(self, value: V) {
        if let Some(tx) = self.take() {
            let _ = tx.send(value);
        }
        std::mem::forget(self);
    }

    fn take(&self) -> Option<broadcast::Sender<V>> {
        self.registry
            .inflight
            .lock()
            .expect("singleflight lock poisoned")
            .remove(self.key)
    }
}

impl<V: Clone + Send + 'static> Drop for LeaderGuard<'_, V> {
    fn drop(&mut self) {
        self.take();
    }
}
