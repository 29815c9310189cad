//! Debounce batcher — coalesces bursts of events per key into one flush.
//!
//! ```text
//! Idle ──record──▶ Pending ──quiet period / cap──▶ Flushing ──▶ Idle
//!                   ▲    │
//!                   └────┘ record: append, re-arm timer
//! ```
//!
//! Every arm bumps a generation number under the index lock. A timer only
//! flushes if its generation is still the entry's current one, so cancel and
//! re-arm are a single atomic step even when an old timer already woke up.
//! The entry leaves the index before the sink is called; events arriving
//! during a slow flush start a fresh batch.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use warden_core::error::Result;

/// Receives one flushed batch. Items are in arrival order.
#[async_trait]
pub trait BatchSink<K, V>: Send + Sync {
    async fn flush(&self, key: &K, items: Vec<V>) -> Result<()>;
}

/// What `record` did with the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Batch is waiting for the quiet period; holds the current size.
    Pending(usize),
    /// Cap reached; the batch of this size was handed to the sink.
    Flushing(usize),
}

struct Entry<V> {
    items: Vec<V>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

struct State<K, V> {
    entries: HashMap<K, Entry<V>>,
    generation: u64,
}

struct Inner<K, V> {
    state: Mutex<State<K, V>>,
    gates: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
    sink: Arc<dyn BatchSink<K, V>>,
    quiet_period: Duration,
    max_batch: usize,
}

/// Keyed debounce batcher. Cheap to clone; clones share state.
pub struct DebounceBatcher<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for DebounceBatcher<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> DebounceBatcher<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
    V: Send + 'static,
{
    pub fn new(sink: Arc<dyn BatchSink<K, V>>, quiet_period: Duration, max_batch: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    entries: HashMap::new(),
                    generation: 0,
                }),
                gates: Mutex::new(HashMap::new()),
                sink,
                quiet_period,
                max_batch: max_batch.max(1),
            }),
        }
    }

    /// Add `value` to the batch for `key`. Never waits on the sink.
    ///
    /// Must be called from within a Tokio runtime: timers and cap flushes
    /// are spawned tasks.
    pub fn record(&self, key: K, value: V) -> RecordOutcome {
        let mut state = lock(&self.inner.state);
        state.generation += 1;
        let generation = state.generation;

        let entry = state.entries.entry(key.clone()).or_insert_with(|| Entry {
            items: Vec::new(),
            generation,
            timer: None,
        });
        entry.items.push(value);
        entry.generation = generation;
        if let Some(timer) = entry.timer.take() {
            timer.abort();
        }

        let len = entry.items.len();
        if len >= self.inner.max_batch {
            let items = state
                .entries
                .remove(&key)
                .map(|e| e.items)
                .unwrap_or_default();
            drop(state);
            tracing::debug!("📦 Batch {:?} hit cap ({}), flushing now", key, len);
            tokio::spawn(Inner::flush(Arc::clone(&self.inner), key, items));
            return RecordOutcome::Flushing(len);
        }

        let inner = Arc::clone(&self.inner);
        let timer_key = key.clone();
        entry.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.quiet_period).await;
            Inner::fire(inner, timer_key, generation).await;
        }));
        RecordOutcome::Pending(len)
    }

    /// Flush every pending batch now and wait for the sinks. Returns batches flushed.
    pub async fn flush_all(&self) -> usize {
        let drained: Vec<(K, Vec<V>)> = {
            let mut state = lock(&self.inner.state);
            state
                .entries
                .drain()
                .map(|(key, entry)| {
                    if let Some(timer) = entry.timer {
                        timer.abort();
                    }
                    (key, entry.items)
                })
                .collect()
        };
        let count = drained.len();
        for (key, items) in drained {
            Inner::flush(Arc::clone(&self.inner), key, items).await;
        }
        count
    }

    /// Items waiting for `key`.
    pub fn pending_len(&self, key: &K) -> usize {
        lock(&self.inner.state)
            .entries
            .get(key)
            .map(|e| e.items.len())
            .unwrap_or(0)
    }

    /// Keys with a pending batch.
    pub fn pending_keys(&self) -> usize {
        lock(&self.inner.state).entries.len()
    }
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
    V: Send + 'static,
{
    /// Timer expiry: flush only if no newer event re-armed the entry.
    async fn fire(inner: Arc<Self>, key: K, generation: u64) {
        let items = {
            let mut state = lock(&inner.state);
            match state.entries.get(&key) {
                Some(entry) if entry.generation == generation => {
                    state.entries.remove(&key).map(|e| e.items)
                }
                _ => None,
            }
        };
        if let Some(items) = items {
            Self::flush(inner, key, items).await;
        }
    }

    /// Hand a detached batch to the sink, one flush per key at a time.
    async fn flush(inner: Arc<Self>, key: K, items: Vec<V>) {
        if items.is_empty() {
            return;
        }
        let gate = {
            let mut gates = lock(&inner.gates);
            Arc::clone(gates.entry(key.clone()).or_default())
        };
        let flushing = gate.lock().await;

        let count = items.len();
        match inner.sink.flush(&key, items).await {
            Ok(()) => tracing::info!("📤 Flushed batch {:?} ({} item(s))", key, count),
            Err(e) => tracing::error!("❌ Batch {:?} ({} item(s)) flush failed: {e}", key, count),
        }
        drop(flushing);

        // Clones are only taken under the `gates` lock, so with it held a
        // count of two (map + ours) means no flush is waiting on this key.
        let mut gates = lock(&inner.gates);
        if gates
            .get(&key)
            .is_some_and(|g| Arc::ptr_eq(g, &gate) && Arc::strong_count(&gate) == 2)
        {
            gates.remove(&key);
        }
    }
}

/// Lock a std mutex, recovering the data if a panicking holder poisoned it.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
