//! Response correlation table
//!
//! Each connection keeps one table mapping an outstanding correlation id to the
//! single-use rendezvous of the call waiting on it. The read loop resolves or
//! fails entries; the caller waits on its [`Waiter`] until a deadline.
//!
//! Dropping a `Waiter` before it settles removes its entry, so cancelled and
//! timed-out calls leave nothing behind. A response that arrives after that
//! finds no entry and is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use meshrpc_common::protocol::error::{MeshError, Result};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

type Outcome = Result<Vec<u8>>;

struct Slot {
    sender: oneshot::Sender<Outcome>,
    token: u64,
    registered: Instant,
}

/// Correlation id → waiter map for one connection.
#[derive(Default)]
pub struct CorrelationTable {
    slots: Mutex<HashMap<u32, Slot>>,
    tokens: AtomicU64,
}

impl CorrelationTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a waiter for `id`.
    ///
    /// # Errors
    ///
    /// Returns `MeshError::CorrelationInUse` if a waiter already holds `id`.
    pub fn register(self: &Arc<Self>, id: u32) -> Result<Waiter> {
        let mut slots = self.slots.lock();
        if slots.contains_key(&id) {
            return Err(MeshError::CorrelationInUse(id));
        }
        let (sender, receiver) = oneshot::channel();
        let token = self.tokens.fetch_add(1, Ordering::Relaxed);
        slots.insert(
            id,
            Slot {
                sender,
                token,
                registered: Instant::now(),
            },
        );
        Ok(Waiter {
            id,
            token,
            receiver,
            table: Arc::downgrade(self),
            settled: false,
        })
    }

    /// Delivers a response body. Returns false if nobody was waiting.
    pub fn resolve(&self, id: u32, payload: Vec<u8>) -> bool {
        self.settle(id, Ok(payload))
    }

    /// Delivers an error. Returns false if nobody was waiting.
    pub fn fail(&self, id: u32, error: MeshError) -> bool {
        self.settle(id, Err(error))
    }

    /// Removes the entry for `id` without notifying its waiter.
    pub fn forget(&self, id: u32) -> bool {
        self.slots.lock().remove(&id).is_some()
    }

    /// Fails every outstanding waiter, used when the connection goes away.
    pub fn fail_all(&self, error: MeshError) -> usize {
        let drained: Vec<Slot> = self.slots.lock().drain().map(|(_, slot)| slot).collect();
        let count = drained.len();
        for slot in drained {
            let _ = slot.sender.send(Err(error.clone()));
        }
        count
    }

    /// Fails waiters registered more than `max_age` ago with a timeout.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let stale: Vec<Slot> = {
            let mut slots = self.slots.lock();
            let ids: Vec<u32> = slots
                .iter()
                .filter(|(_, slot)| slot.registered.elapsed() >= max_age)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| slots.remove(id)).collect()
        };
        let count = stale.len();
        for slot in stale {
            let _ = slot.sender.send(Err(MeshError::timeout(max_age)));
        }
        if count > 0 {
            debug!("Swept {} stale waiters", count);
        }
        count
    }

    pub fn contains(&self, id: u32) -> bool {
        self.slots.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    fn settle(&self, id: u32, outcome: Outcome) -> bool {
        match self.slots.lock().remove(&id) {
            Some(slot) => slot.sender.send(outcome).is_ok(),
            None => false,
        }
    }

    fn forget_token(&self, id: u32, token: u64) {
        let mut slots = self.slots.lock();
        if slots.get(&id).is_some_and(|slot| slot.token == token) {
            slots.remove(&id);
        }
    }
}

/// Single-use handle on one correlation table entry.
pub struct Waiter {
    id: u32,
    token: u64,
    receiver: oneshot::Receiver<Outcome>,
    table: Weak<CorrelationTable>,
    settled: bool,
}

impl Waiter {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Waits for the response until `deadline`.
    ///
    /// # Errors
    ///
    /// - `MeshError::Timeout` when the deadline passes first; the entry is removed
    /// - `MeshError::Connection` when the connection dropped the entry
    /// - whatever error the read loop delivered, e.g. `MeshError::Remote`
    pub async fn wait_until(mut self, deadline: tokio::time::Instant) -> Result<Vec<u8>> {
        let started = tokio::time::Instant::now();
        match tokio::time::timeout_at(deadline, &mut self.receiver).await {
            Ok(Ok(outcome)) => {
                self.settled = true;
                outcome
            }
            Ok(Err(_)) => {
                self.settled = true;
                Err(MeshError::Connection(format!(
                    "waiter {} dropped without a response",
                    self.id
                )))
            }
            Err(_) => Err(MeshError::timeout(
                deadline.saturating_duration_since(started),
            )),
        }
    }

    /// Waits for the response for at most `timeout`.
    pub async fn wait(self, timeout: Duration) -> Result<Vec<u8>> {
        self.wait_until(tokio::time::Instant::now() + timeout).await
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(table) = self.table.upgrade() {
            table.forget_token(self.id, self.token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_delivers_payload() {
        let table = CorrelationTable::new();
        let waiter = table.register(120).unwrap();
        assert!(table.resolve(120, b"pong".to_vec()));
        assert_eq!(waiter.wait(Duration::from_secs(1)).await.unwrap(), b"pong");
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_fail_delivers_error() {
        let table = CorrelationTable::new();
        let waiter = table.register(121).unwrap();
        assert!(table.fail(121, MeshError::Remote("denied".into())));
        assert_eq!(
            waiter.wait(Duration::from_secs(1)).await.unwrap_err(),
            MeshError::Remote("denied".into())
        );
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_rejected() {
        let table = CorrelationTable::new();
        let _first = table.register(200).unwrap();
        assert!(matches!(table.register(200), Err(MeshError::CorrelationInUse(200))));
    }

    #[tokio::test]
    async fn test_timeout_removes_entry() {
        let table = CorrelationTable::new();
        let waiter = table.register(300).unwrap();
        let err = waiter.wait(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, MeshError::Timeout(_)));
        assert!(table.is_empty());
        // A late response has nobody to go to.
        assert!(!table.resolve(300, b"late".to_vec()));
    }

    #[tokio::test]
    async fn test_dropped_waiter_removes_entry() {
        let table = CorrelationTable::new();
        let waiter = table.register(301).unwrap();
        drop(waiter);
        assert!(!table.contains(301));
    }

    #[tokio::test]
    async fn test_cancelled_wait_removes_entry() {
        let table = CorrelationTable::new();
        let waiter = table.register(302).unwrap();
        let task = tokio::spawn(waiter.wait(Duration::from_secs(30)));
        tokio::task::yield_now().await;
        task.abort();
        let _ = task.await;
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_stale_drop_does_not_remove_reused_id() {
        let table = CorrelationTable::new();
        let old = table.register(400).unwrap();
        table.forget(400);
        let _new = table.register(400).unwrap();
        drop(old);
        assert!(table.contains(400));
    }

    #[tokio::test]
    async fn test_sweep_and_fail_all() {
        let table = CorrelationTable::new();
        let a = table.register(500).unwrap();
        let b = table.register(501).unwrap();
        assert_eq!(table.sweep(Duration::from_secs(60)), 0);
        assert_eq!(table.sweep(Duration::ZERO), 2);
        assert!(matches!(a.wait(Duration::from_secs(1)).await, Err(MeshError::Timeout(_))));
        assert!(matches!(b.wait(Duration::from_secs(1)).await, Err(MeshError::Timeout(_))));

        let c = table.register(502).unwrap();
        assert_eq!(table.fail_all(MeshError::Connection("closed".into())), 1);
        assert!(matches!(c.wait(Duration::from_secs(1)).await, Err(MeshError::Connection(_))));
    }

    #[tokio::test]
    async fn test_concurrent_waiters_are_isolated() {
        let table = CorrelationTable::new();
        let mut set = tokio::task::JoinSet::new();
        for id in 100..1100u32 {
            let waiter = table.register(id).unwrap();
            set.spawn(async move { (id, waiter.wait(Duration::from_secs(5)).await) });
        }
        for id in (100..1100u32).rev() {
            assert!(table.resolve(id, id.to_be_bytes().to_vec()));
        }
        while let Some(joined) = set.join_next().await {
            let (id, result) = joined.unwrap();
            assert_eq!(result.unwrap(), id.to_be_bytes().to_vec());
        }
        assert!(table.is_empty());
    }
}
