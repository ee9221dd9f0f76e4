//! Request batching and memoization.
//!
//! [`Batcher`] collects the keys requested during one scheduling window and
//! hands them to a [`BatchLoad`] implementation in a single call. Results
//! are memoized per cache key for the lifetime of the batcher, so a batcher
//! is meant to be scoped to one unit of work (typically one GraphQL
//! request).
//!
//! ```text
//! load(a) ─┐
//! load(b) ─┼─► pending ──(yield / delay)──► load_batch([a, b, c]) ──► fan out
//! load(c) ─┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared, join_all};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::error::{LoaderError, LoaderResult};
use crate::metrics;

/// A batch function: resolves many keys in one go.
#[async_trait]
pub trait BatchLoad: Send + Sync + 'static {
    type Key: Send + Sync + 'static;
    type Value: Clone + Send + Sync + 'static;

    /// Memoization identity of a key.
    fn cache_key(&self, key: &Self::Key) -> String;

    /// Resolve `keys`, returning exactly one result per key, in key order.
    async fn load_batch(&self, keys: &[Self::Key]) -> Vec<LoaderResult<Self::Value>>;
}

/// Scheduling and caching options.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Memoize results per cache key.
    pub cache: bool,
    /// How long to collect keys before dispatching. Zero dispatches after
    /// the current task yields.
    pub delay: Duration,
    /// Split larger batches into chunks of this size.
    pub max_batch_size: Option<usize>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            cache: true,
            delay: Duration::ZERO,
            max_batch_size: None,
        }
    }
}

type SharedResult<V> = Shared<BoxFuture<'static, LoaderResult<V>>>;

struct Pending<L: BatchLoad> {
    key: L::Key,
    cache_key: Option<String>,
    reply: oneshot::Sender<LoaderResult<L::Value>>,
}

struct State<L: BatchLoad> {
    pending: Vec<Pending<L>>,
    scheduled: bool,
    cache: HashMap<String, SharedResult<L::Value>>,
}

struct Inner<L: BatchLoad> {
    loader: L,
    options: BatchOptions,
    state: Mutex<State<L>>,
}

/// Coalesces individual loads into batches.
///
/// Cloning is cheap and shares the pending queue and the cache.
pub struct Batcher<L: BatchLoad> {
    inner: Arc<Inner<L>>,
}

impl<L: BatchLoad> Clone for Batcher<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: BatchLoad> Batcher<L> {
    pub fn new(loader: L, options: BatchOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                loader,
                options,
                state: Mutex::new(State {
                    pending: Vec::new(),
                    scheduled: false,
                    cache: HashMap::new(),
                }),
            }),
        }
    }

    pub fn loader(&self) -> &L {
        &self.inner.loader
    }

    pub fn options(&self) -> &BatchOptions {
        &self.inner.options
    }

    /// Load one key. Must be called within a tokio runtime.
    pub async fn load(&self, key: L::Key) -> LoaderResult<L::Value> {
        self.enqueue(key).await
    }

    /// Load many keys; all of them join the same batch window.
    pub async fn load_many(&self, keys: Vec<L::Key>) -> Vec<LoaderResult<L::Value>> {
        let futures: Vec<_> = keys.into_iter().map(|key| self.enqueue(key)).collect();
        join_all(futures).await
    }

    /// Forget the memoized result for `key`.
    pub fn clear(&self, key: &L::Key) {
        let cache_key = self.inner.loader.cache_key(key);
        self.inner.state.lock().cache.remove(&cache_key);
    }

    /// Forget every memoized result.
    pub fn clear_all(&self) {
        self.inner.state.lock().cache.clear();
    }

    fn enqueue(&self, key: L::Key) -> BoxFuture<'static, LoaderResult<L::Value>> {
        let cache_key = self
            .inner
            .options
            .cache
            .then(|| self.inner.loader.cache_key(&key));

        let mut state = self.inner.state.lock();

        if let Some(cached) = cache_key.as_ref().and_then(|k| state.cache.get(k)) {
            trace!("Cache hit");
            metrics::record_cache_hit();
            return cached.clone().boxed();
        }

        let (reply, receiver) = oneshot::channel();
        let result = async move { receiver.await.unwrap_or(Err(LoaderError::Dropped)) }.boxed();
        let result = match &cache_key {
            Some(cache_key) => {
                let shared = result.shared();
                state.cache.insert(cache_key.clone(), shared.clone());
                shared.boxed()
            }
            None => result,
        };

        state.pending.push(Pending {
            key,
            cache_key,
            reply,
        });

        if !state.scheduled {
            state.scheduled = true;
            let inner = Arc::clone(&self.inner);
            tokio::spawn(inner.dispatch());
        }

        result
    }
}

impl<L: BatchLoad> Inner<L> {
    async fn dispatch(self: Arc<Self>) {
        if self.options.delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.options.delay).await;
        }

        let pending = {
            let mut state = self.state.lock();
            state.scheduled = false;
            std::mem::take(&mut state.pending)
        };
        if pending.is_empty() {
            return;
        }

        let chunk_size = self
            .options
            .max_batch_size
            .unwrap_or(pending.len())
            .max(1);
        let mut batches: Vec<Vec<Pending<L>>> = Vec::new();
        for item in pending {
            match batches.last_mut() {
                Some(batch) if batch.len() < chunk_size => batch.push(item),
                _ => batches.push(vec![item]),
            }
        }

        debug!(batches = batches.len(), chunk_size, "Dispatching batches");
        join_all(batches.into_iter().map(|batch| self.run_batch(batch))).await;
    }

    async fn run_batch(&self, batch: Vec<Pending<L>>) {
        let mut keys = Vec::with_capacity(batch.len());
        let mut waiters = Vec::with_capacity(batch.len());
        for pending in batch {
            keys.push(pending.key);
            waiters.push((pending.cache_key, pending.reply));
        }

        metrics::record_batch_dispatched(keys.len());
        let mut results = self.loader.load_batch(&keys).await;

        if results.len() != keys.len() {
            warn!(
                expected = keys.len(),
                returned = results.len(),
                "Batch function broke its contract"
            );
            let err = LoaderError::BatchSizeMismatch {
                expected: keys.len(),
                returned: results.len(),
            };
            results = vec![Err(err); keys.len()];
        }

        // Failures are not memoized: evict before anyone can observe them.
        {
            let mut state = self.state.lock();
            for ((cache_key, _), result) in waiters.iter().zip(&results) {
                if let (Some(cache_key), Err(_)) = (cache_key, result) {
                    state.cache.remove(cache_key);
                }
            }
        }

        for ((_, reply), result) in waiters.into_iter().zip(results) {
            let _ = reply.send(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;

    /// Doubles numbers, fails on negatives, records every batch it sees.
    #[derive(Default)]
    struct Doubler {
        batches: Mutex<Vec<Vec<i64>>>,
        short: bool,
    }

    #[async_trait]
    impl BatchLoad for Doubler {
        type Key = i64;
        type Value = i64;

        fn cache_key(&self, key: &i64) -> String {
            key.to_string()
        }

        async fn load_batch(&self, keys: &[i64]) -> Vec<LoaderResult<i64>> {
            self.batches.lock().push(keys.to_vec());
            let mut results: Vec<_> = keys
                .iter()
                .map(|k| {
                    if *k < 0 {
                        Err(LoaderError::from(StorageError::QueryError(format!(
                            "negative {k}"
                        ))))
                    } else {
                        Ok(k * 2)
                    }
                })
                .collect();
            if self.short {
                results.pop();
            }
            results
        }
    }

    fn batches(batcher: &Batcher<Doubler>) -> Vec<Vec<i64>> {
        batcher.loader().batches.lock().clone()
    }

    // Test critique: les chargements concurrents partagent un seul lot
    #[tokio::test]
    async fn test_concurrent_loads_share_one_batch() {
        let batcher = Batcher::new(Doubler::default(), BatchOptions::default());

        let (a, b, c) = tokio::join!(batcher.load(1), batcher.load(2), batcher.load(3));

        assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), (2, 4, 6));
        assert_eq!(batches(&batcher), vec![vec![1, 2, 3]]);
    }

    #[tokio::test]
    async fn test_results_are_memoized() {
        let batcher = Batcher::new(Doubler::default(), BatchOptions::default());

        assert_eq!(batcher.load(5).await.unwrap(), 10);
        assert_eq!(batcher.load(5).await.unwrap(), 10);
        let (a, b) = tokio::join!(batcher.load(7), batcher.load(7));
        assert_eq!((a.unwrap(), b.unwrap()), (14, 14));

        assert_eq!(batches(&batcher), vec![vec![5], vec![7]]);

        batcher.clear(&5);
        batcher.load(5).await.unwrap();
        assert_eq!(batches(&batcher).len(), 3);
    }

    #[tokio::test]
    async fn test_cache_disabled_loads_duplicates() {
        let options = BatchOptions {
            cache: false,
            ..Default::default()
        };
        let batcher = Batcher::new(Doubler::default(), options);

        let (a, b) = tokio::join!(batcher.load(4), batcher.load(4));
        assert_eq!((a.unwrap(), b.unwrap()), (8, 8));
        assert_eq!(batches(&batcher), vec![vec![4, 4]]);
    }

    // Test critique: une erreur n'est pas mise en cache
    #[tokio::test]
    async fn test_failures_are_not_memoized() {
        let batcher = Batcher::new(Doubler::default(), BatchOptions::default());

        let (bad, good) = tokio::join!(batcher.load(-1), batcher.load(1));
        assert!(matches!(bad, Err(LoaderError::Storage(_))));
        assert_eq!(good.unwrap(), 2);

        assert!(batcher.load(-1).await.is_err());
        batcher.load(1).await.unwrap();
        assert_eq!(batches(&batcher), vec![vec![-1, 1], vec![-1]]);
    }

    #[tokio::test]
    async fn test_max_batch_size_splits_batches() {
        let options = BatchOptions {
            max_batch_size: Some(2),
            ..Default::default()
        };
        let batcher = Batcher::new(Doubler::default(), options);

        let results = batcher.load_many(vec![1, 2, 3, 4, 5]).await;
        assert_eq!(
            results.into_iter().map(Result::unwrap).collect::<Vec<_>>(),
            vec![2, 4, 6, 8, 10]
        );
        assert_eq!(batches(&batcher), vec![vec![1, 2], vec![3, 4], vec![5]]);
    }

    #[tokio::test]
    async fn test_short_batch_result_fails_every_key() {
        let loader = Doubler {
            short: true,
            ..Default::default()
        };
        let batcher = Batcher::new(loader, BatchOptions::default());

        let results = batcher.load_many(vec![1, 2]).await;
        for result in results {
            assert_eq!(
                result.unwrap_err(),
                LoaderError::BatchSizeMismatch {
                    expected: 2,
                    returned: 1
                }
            );
        }
    }

    #[tokio::test]
    async fn test_delay_collects_sequentially_spawned_loads() {
        let options = BatchOptions {
            delay: Duration::from_millis(20),
            ..Default::default()
        };
        let batcher = Batcher::new(Doubler::default(), options);

        let first = {
            let batcher = batcher.clone();
            tokio::spawn(async move { batcher.load(1).await })
        };
        // let the spawned task enqueue first
        tokio::task::yield_now().await;
        let second = batcher.load(2).await;

        assert_eq!(first.await.unwrap().unwrap(), 2);
        assert_eq!(second.unwrap(), 4);
        assert_eq!(batches(&batcher), vec![vec![1, 2]]);
    }
}
