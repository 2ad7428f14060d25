//! De-duplication of identical in-flight requests.
//!
//! Concurrent callers asking for the same key share one in-flight future.
//! The entry is removed as soon as that future settles, success or error, so
//! the next call after settlement issues a fresh request.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use spark_common::{QueueOp, QueueReply, SessionError};
use tracing::trace;

use crate::queue_api::QueueApi;

type InFlight<V> = Shared<BoxFuture<'static, V>>;

pub struct RequestCache<K, V>
where
    V: Clone,
{
    inflight: Arc<Mutex<HashMap<K, InFlight<V>>>>,
}

impl<K, V> RequestCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(
        inflight: &Mutex<HashMap<K, InFlight<V>>>,
    ) -> MutexGuard<'_, HashMap<K, InFlight<V>>> {
        inflight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `request` for `key`, or join the request already in flight for it.
    pub async fn run<F, Fut>(&self, key: K, request: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let shared = {
            let mut inflight = Self::lock(&self.inflight);
            match inflight.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    let registry = Arc::clone(&self.inflight);
                    let settled_key = key.clone();
                    let fut = request();
                    let shared = async move {
                        let value = fut.await;
                        Self::lock(&registry).remove(&settled_key);
                        value
                    }
                    .boxed()
                    .shared();
                    inflight.insert(key, shared.clone());
                    shared
                }
            }
        };
        shared.await
    }

    pub fn in_flight(&self) -> usize {
        Self::lock(&self.inflight).len()
    }
}

impl<K, V> Default for RequestCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// A [`QueueApi`] whose identical concurrent calls collapse into one.
pub struct CachedQueue<Q> {
    inner: Arc<Q>,
    cache: RequestCache<QueueOp, Result<QueueReply, SessionError>>,
}

impl<Q: QueueApi + 'static> CachedQueue<Q> {
    pub fn new(inner: Q) -> Self {
        Self {
            inner: Arc::new(inner),
            cache: RequestCache::new(),
        }
    }

    pub fn inner(&self) -> &Q {
        &self.inner
    }
}

#[async_trait]
impl<Q: QueueApi + 'static> QueueApi for CachedQueue<Q> {
    async fn call(&self, op: QueueOp) -> Result<QueueReply, SessionError> {
        let inner = Arc::clone(&self.inner);
        let request = op.clone();
        trace!(op = op.name(), event_id = %op.event_id(), "Queue request");
        self.cache
            .run(op, move || async move { inner.call(request).await })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use spark_common::{EventId, QueueStatus, StatusResponse};

    use super::*;

    #[tokio::test]
    async fn concurrent_identical_requests_share_one_call() {
        let cache: RequestCache<&'static str, u32> = RequestCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let make = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                7
            }
        };
        let (a, b) = tokio::join!(
            cache.run("status", make(Arc::clone(&calls))),
            cache.run("status", make(Arc::clone(&calls))),
        );

        assert_eq!((a, b), (7, 7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn settled_requests_are_not_reused() {
        let cache: RequestCache<&'static str, u32> = RequestCache::new();
        let first = cache.run("status", || async { 1 }).await;
        let second = cache.run("status", || async { 2 }).await;
        assert_eq!((first, second), (1, 2));
    }

    #[tokio::test]
    async fn errors_clear_the_entry_too() {
        let cache: RequestCache<u8, Result<u8, SessionError>> = RequestCache::new();
        let failed = cache
            .run(1, || async { Err(SessionError::Timeout("status".into())) })
            .await;
        assert!(failed.is_err());
        assert_eq!(cache.in_flight(), 0);
        assert_eq!(cache.run(1, || async { Ok(5) }).await, Ok(5));
    }

    #[tokio::test]
    async fn different_keys_do_not_collapse() {
        let cache: RequestCache<u8, u8> = RequestCache::new();
        let (a, b) = tokio::join!(cache.run(1, || async { 1 }), cache.run(2, || async { 2 }));
        assert_eq!((a, b), (1, 2));
    }

    struct CountingQueue(AtomicUsize);

    #[async_trait]
    impl QueueApi for CountingQueue {
        async fn call(&self, _op: QueueOp) -> Result<QueueReply, SessionError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(QueueReply::Status(StatusResponse::not_in_queue()))
        }
    }

    #[tokio::test]
    async fn cached_queue_collapses_duplicate_status_polls() {
        let queue = CachedQueue::new(CountingQueue(AtomicUsize::new(0)));
        let evt = EventId::from("evt1");
        let (a, b) = tokio::join!(queue.status(&evt), queue.status(&evt));
        assert_eq!(a.unwrap().status, QueueStatus::NotInQueue);
        assert_eq!(b.unwrap().status, QueueStatus::NotInQueue);
        assert_eq!(queue.inner().0.load(Ordering::SeqCst), 1);
    }
}
