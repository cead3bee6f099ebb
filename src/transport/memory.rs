//! In-memory broker connection.
//!
//! A process-local list store with push and blocking-pop primitives,
//! implementing [`Connection`]. It is intended for tests, local execution,
//! and as the reference for connection semantics.
//!
//! ## Reference Semantics
//!
//! - `send` appends to the tail of the named list; `receive` takes from the
//!   head, so each topic is first-in-first-out.
//! - Each element is handed to exactly one `receive` caller.
//! - An elapsed `receive` yields [`RpcError::Timeout`].
//! - A `respond` to a topic whose last `receive` timed out is dropped. Reply
//!   topics are popped once, so nobody would ever collect that answer.
//! - Envelopes are stored in wire form, so framing errors surface exactly as
//!   they would against a networked broker.
//!
//! ## Non-Goals
//!
//! Persistence, network failure simulation, and emulating any particular
//! broker's edge cases.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Notify;
use tokio::time::{self, Instant};

use crate::{
    // ---
    log_debug,
    Connection,
    Envelope,
    Result,
    RpcError,
};

type ListMap = HashMap<String, Arc<List>>;

/// Most topics remembered as timed out; the oldest are forgotten first.
const ABANDONED_CAPACITY: usize = 4096;

/// Stands in for "no deadline" when `now + timeout` overflows.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Topics whose last `receive` timed out, in insertion order.
#[derive(Default)]
struct Abandoned {
    order: VecDeque<String>,
    keys: HashSet<String>,
}

impl Abandoned {
    // ---

    fn insert(&mut self, key: &str) {
        // ---
        if !self.keys.insert(key.to_string()) {
            return;
        }
        self.order.push_back(key.to_string());
        if self.order.len() > ABANDONED_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.keys.remove(&oldest);
            }
        }
    }

    fn take(&mut self, key: &str) -> bool {
        // ---
        if !self.keys.remove(key) {
            return false;
        }
        self.order.retain(|k| k != key);
        true
    }
}

#[derive(Default)]
struct List {
    items: Mutex<VecDeque<Vec<u8>>>,
    ready: Notify,
}

/// Shared in-process broker.
///
/// Cloning is cheap and every clone sees the same lists, exactly as several
/// processes connected to one broker would.
///
/// # Example
///
/// ```
/// # use gogarin_rpc::{Connection, MemoryBroker, RpcError};
/// # use bytes::Bytes;
/// # use std::time::Duration;
/// # async fn example() -> gogarin_rpc::Result<()> {
/// let broker = MemoryBroker::new();
/// broker.send("jobs", "jobs:reply:1", Bytes::from_static(b"work")).await?;
///
/// let env = broker.receive("jobs", Duration::from_millis(10)).await?;
/// assert_eq!(env.reply_topic, "jobs:reply:1");
///
/// let err = broker.receive("jobs", Duration::from_millis(10)).await.unwrap_err();
/// assert!(matches!(err, RpcError::Timeout));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct MemoryBroker {
    lists: Arc<Mutex<ListMap>>,
    abandoned: Arc<Mutex<Abandoned>>,
}

impl MemoryBroker {
    // ---

    /// Create a new, empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of elements waiting on `key`.
    pub fn len(&self, key: &str) -> usize {
        // ---
        let lists = lock_ignore_poison(&self.lists);
        lists
            .get(key)
            .map(|list| lock_ignore_poison(&list.items).len())
            .unwrap_or(0)
    }

    /// True when no list holds an element.
    pub fn is_empty(&self) -> bool {
        // ---
        let lists = lock_ignore_poison(&self.lists);
        lists
            .values()
            .all(|list| lock_ignore_poison(&list.items).is_empty())
    }

    /// Append `value` to the tail of `key`.
    pub fn push(&self, key: &str, value: Vec<u8>) {
        // ---
        let list = self.list(key);
        lock_ignore_poison(&list.items).push_back(value);
        list.ready.notify_one();
    }

    /// Remove and return the head of `key`, waiting up to `timeout`.
    ///
    /// Returns `None` when the timeout elapses with the list still empty.
    pub async fn blocking_pop(&self, key: &str, timeout: Duration) -> Option<Vec<u8>> {
        // ---
        let list = self.list(key);
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);

        let popped = loop {
            // Register interest before checking, so a push between the check
            // and the await is not missed.
            let notified = list.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = lock_ignore_poison(&list.items).pop_front() {
                break Some(value);
            }

            if time::timeout_at(deadline, notified).await.is_err() {
                break lock_ignore_poison(&list.items).pop_front();
            }
        };

        self.release(key, list);
        popped
    }

    fn list(&self, key: &str) -> Arc<List> {
        // ---
        let mut lists = lock_ignore_poison(&self.lists);
        lists.entry(key.to_string()).or_default().clone()
    }

    /// Drop the list entry once it is empty and nobody else holds it.
    ///
    /// Reply topics are used once, so without this the map would grow by one
    /// entry per call.
    fn release(&self, key: &str, list: Arc<List>) {
        // ---
        let mut lists = lock_ignore_poison(&self.lists);
        // One reference in the map, one here.
        if Arc::strong_count(&list) == 2 && lock_ignore_poison(&list.items).is_empty() {
            lists.remove(key);
        }
    }
}

#[async_trait::async_trait]
impl Connection for MemoryBroker {
    // ---

    async fn send(&self, topic: &str, reply_topic: &str, payload: Bytes) -> Result<()> {
        // ---
        let wire = Envelope::request(reply_topic, payload).to_wire()?;
        self.push(topic, wire);
        Ok(())
    }

    async fn receive(&self, topic: &str, timeout: Duration) -> Result<Envelope> {
        // ---
        match self.blocking_pop(topic, timeout).await {
            Some(wire) => Envelope::from_wire(&wire),
            None => {
                log_debug!("memory: no element on {topic} after {timeout:?}");
                lock_ignore_poison(&self.abandoned).insert(topic);
                Err(RpcError::Timeout)
            }
        }
    }

    async fn respond(&self, reply_topic: &str, payload: Bytes) -> Result<()> {
        // ---
        if lock_ignore_poison(&self.abandoned).take(reply_topic) {
            log_debug!("memory: dropping late answer for {reply_topic}");
            return Ok(());
        }
        self.send(reply_topic, "", payload).await
    }
}

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
