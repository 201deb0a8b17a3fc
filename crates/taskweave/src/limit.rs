//! Keyed concurrency limiter
//!
//! [`Limited`] wraps a task so that at most `limit` invocations per partition
//! key run at once. Calls over the limit wait in a FIFO queue for their
//! partition; a finishing call hands its slot straight to the oldest waiter.
//! Partition state lives as long as the limiter and is shared by all clones,
//! see [`LimitRegistry`] for inspecting and evicting it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::trace;

use crate::task::{Args, Outcome, Task};
use crate::types::{LimitConfig, PartitionFn};
use crate::BoxFuture;

/// Partition used when no partition function is configured
pub const GLOBAL_PARTITION: &str = "";

#[derive(Default)]
struct Partition {
    running: usize,
    queue: VecDeque<oneshot::Sender<()>>,
}

impl Partition {
    fn is_idle(&self) -> bool {
        self.running == 0 && self.queue.is_empty()
    }
}

/// Snapshot of one partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionStats {
    pub running: usize,
    pub queued: usize,
}

/// Shared per-key state of a limiter
///
/// Each partition is created on first use and kept until evicted.
pub struct LimitRegistry {
    limit: Option<usize>,
    partitions: DashMap<String, Partition>,
}

impl fmt::Debug for LimitRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimitRegistry")
            .field("limit", &self.limit)
            .field("partitions", &self.partitions.len())
            .finish()
    }
}

enum Admission {
    Granted(Slot),
    Queued(Waiter),
}

impl LimitRegistry {
    fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            partitions: DashMap::new(),
        }
    }

    /// Effective per-partition bound, None when unbounded
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Current load of a partition, if it exists
    pub fn stats(&self, key: &str) -> Option<PartitionStats> {
        self.partitions.get(key).map(|partition| PartitionStats {
            running: partition.running,
            queued: partition.queue.len(),
        })
    }

    /// Keys of all partitions created so far
    pub fn keys(&self) -> Vec<String> {
        self.partitions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Get the number of partitions
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Forget a partition. Busy partitions are kept; returns whether it was removed.
    pub fn evict(&self, key: &str) -> bool {
        self.partitions
            .remove_if(key, |_, partition| partition.is_idle())
            .is_some()
    }

    /// Forget every idle partition, returning how many were removed
    pub fn evict_idle(&self) -> usize {
        let before = self.partitions.len();
        self.partitions.retain(|_, partition| !partition.is_idle());
        before - self.partitions.len()
    }

    fn admit(self: &Arc<Self>, key: String) -> Admission {
        let mut partition = self.partitions.entry(key.clone()).or_default();
        if self.limit.map_or(true, |limit| partition.running < limit) {
            partition.running += 1;
            trace!(key, running = partition.running, "Call admitted");
            drop(partition);
            Admission::Granted(Slot {
                registry: self.clone(),
                key,
            })
        } else {
            let (tx, rx) = oneshot::channel();
            partition.queue.push_back(tx);
            trace!(key, queued = partition.queue.len(), "Call queued");
            drop(partition);
            Admission::Queued(Waiter {
                registry: self.clone(),
                key,
                rx: Some(rx),
            })
        }
    }

    fn release(&self, key: &str) {
        let Some(mut partition) = self.partitions.get_mut(key) else {
            return;
        };
        while let Some(waiter) = partition.queue.pop_front() {
            if waiter.send(()).is_ok() {
                trace!(key, queued = partition.queue.len(), "Slot handed to queued call");
                return;
            }
        }
        partition.running = partition.running.saturating_sub(1);
        trace!(key, running = partition.running, "Slot released");
    }
}

/// A running slot in one partition, released on drop
struct Slot {
    registry: Arc<LimitRegistry>,
    key: String,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}

/// A queued call waiting for a slot
struct Waiter {
    registry: Arc<LimitRegistry>,
    key: String,
    rx: Option<oneshot::Receiver<()>>,
}

impl Waiter {
    async fn granted(mut self) -> Slot {
        loop {
            let handed_over = match self.rx.as_mut() {
                Some(rx) => rx.await.is_ok(),
                None => false,
            };
            self.rx = None;
            if handed_over {
                return Slot {
                    registry: self.registry.clone(),
                    key: self.key.clone(),
                };
            }

            // The sender went away without handing over a slot; queue again.
            match self.registry.admit(self.key.clone()) {
                Admission::Granted(slot) => return slot,
                Admission::Queued(next) => self = next,
            }
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        // A slot may have been handed over after the caller stopped waiting.
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if rx.try_recv().is_ok() {
                self.registry.release(&self.key);
            }
        }
    }
}

/// A task wrapped by [`limit`]
pub struct Limited<T> {
    task: Arc<T>,
    by: Option<PartitionFn>,
    registry: Arc<LimitRegistry>,
}

impl<T> Clone for Limited<T> {
    fn clone(&self) -> Self {
        Self {
            task: self.task.clone(),
            by: self.by.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl<T> fmt::Debug for Limited<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limited")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl<T: Task> Limited<T> {
    pub fn new(config: impl Into<LimitConfig>, task: T) -> Self {
        let config = config.into();
        Self {
            task: Arc::new(task),
            by: config.by,
            registry: Arc::new(LimitRegistry::new(config.limit.resolve())),
        }
    }

    /// Partition state shared by every clone of this limiter
    pub fn registry(&self) -> &Arc<LimitRegistry> {
        &self.registry
    }

    fn partition_key(&self, args: &[serde_json::Value]) -> String {
        self.by
            .as_ref()
            .map_or_else(|| GLOBAL_PARTITION.to_string(), |by| by(args))
    }
}

impl<T: Task> Task for Limited<T> {
    fn call(&self, args: Args) -> BoxFuture<Outcome> {
        let key = self.partition_key(&args);
        match self.registry.admit(key) {
            Admission::Granted(slot) => {
                let running = self.task.call(args);
                Box::pin(async move {
                    let outcome = running.await;
                    drop(slot);
                    outcome
                })
            }
            Admission::Queued(waiter) => {
                let task = self.task.clone();
                Box::pin(async move {
                    let slot = waiter.granted().await;
                    let outcome = task.call(args).await;
                    drop(slot);
                    outcome
                })
            }
        }
    }
}

/// Bound how many invocations of `task` run concurrently per partition key
///
/// `config` is a [`LimitConfig`] or a bare number (`0` means unbounded).
pub fn limit<T: Task>(config: impl Into<LimitConfig>, task: T) -> Limited<T> {
    Limited::new(config, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinators::parallel;
    use crate::error::FlowError;
    use crate::task::{task_fn, TaskExt};
    use crate::types::Limit;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Gauge {
        running: AtomicUsize,
        max: AtomicUsize,
    }

    impl Gauge {
        fn enter(&self) {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max.fetch_max(now, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.running.fetch_sub(1, Ordering::SeqCst);
        }

        fn max(&self) -> usize {
            self.max.load(Ordering::SeqCst)
        }
    }

    fn sleeper(gauge: Arc<Gauge>) -> impl Task + Clone {
        task_fn(move |args: Args| {
            let gauge = gauge.clone();
            gauge.enter();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                gauge.exit();
                Ok(args)
            }
        })
    }

    #[tokio::test]
    async fn test_limit() {
        let gauge = Arc::new(Gauge::default());
        let limited = limit(2, sleeper(gauge.clone()));

        parallel(vec![limited.clone().boxed(), limited.clone().boxed(), limited.clone().boxed()])
            .call(vec![])
            .await
            .unwrap();

        assert_eq!(gauge.max(), 2);
        assert_eq!(limited.registry().stats(GLOBAL_PARTITION), Some(PartitionStats { running: 0, queued: 0 }));
    }

    #[tokio::test]
    async fn test_limit_by_partition() {
        let gauge = Arc::new(Gauge::default());
        let limited = limit(
            LimitConfig::new(2).by(|args| args[0].to_string()),
            sleeper(gauge.clone()),
        );

        let calls = [1, 1, 1, 2].map(|key| limited.call(vec![json!(key)]));
        futures::future::join_all(calls).await;

        assert_eq!(gauge.max(), 3);
        let mut keys = limited.registry().keys();
        keys.sort();
        assert_eq!(keys, ["1", "2"]);
    }

    #[tokio::test]
    async fn test_queued_calls_run_in_submission_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let log = order.clone();
        let limited = limit(
            1,
            task_fn(move |args: Args| {
                log.lock().unwrap().push(args[0].as_i64().unwrap());
                async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(args)
                }
            }),
        );

        let calls: Vec<_> = (0..4).map(|i| limited.call(vec![json!(i)])).collect();
        assert_eq!(
            limited.registry().stats(GLOBAL_PARTITION),
            Some(PartitionStats { running: 1, queued: 3 })
        );

        // Await in reverse so completion order cannot mask queue order.
        for call in calls.into_iter().rev() {
            tokio::spawn(call);
        }
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_limit_passes_error() {
        let limited = limit(2, task_fn(|_| async { Err(FlowError::task("an error")) }));
        assert_eq!(limited.call(vec![]).await, Err(FlowError::task("an error")));
        assert_eq!(limited.registry().stats(GLOBAL_PARTITION).unwrap().running, 0);
    }

    #[tokio::test]
    async fn test_limit_preserves_interface() {
        let add = task_fn(|args: Args| async move {
            Ok(vec![json!(args[0].as_i64().unwrap() + args[1].as_i64().unwrap())])
        });
        assert_eq!(limit(2, add).call(vec![json!(1), json!(2)]).await, Ok(vec![json!(3)]));
    }

    #[tokio::test]
    async fn test_unbounded_limit() {
        let gauge = Arc::new(Gauge::default());
        let limited = limit(Limit::None, sleeper(gauge.clone()));
        futures::future::join_all((0..5).map(|_| limited.call(vec![]))).await;
        assert_eq!(gauge.max(), 5);
        assert_eq!(limited.registry().limit(), None);
    }

    #[tokio::test]
    async fn test_dropped_waiter_does_not_leak_slot() {
        let gauge = Arc::new(Gauge::default());
        let limited = limit(1, sleeper(gauge));

        let first = limited.call(vec![]);
        let abandoned = limited.call(vec![]);
        let third = limited.call(vec![]);
        drop(abandoned);

        first.await.unwrap();
        third.await.unwrap();
        assert_eq!(
            limited.registry().stats(GLOBAL_PARTITION),
            Some(PartitionStats { running: 0, queued: 0 })
        );
    }

    #[tokio::test]
    async fn test_evict_only_idle_partitions() {
        let gauge = Arc::new(Gauge::default());
        let limited = limit(LimitConfig::new(1).by(|args| args[0].to_string()), sleeper(gauge));

        limited.call(vec![json!("a")]).await.unwrap();
        let busy = limited.call(vec![json!("b")]);
        assert_eq!(limited.registry().len(), 2);

        assert!(!limited.registry().evict("\"b\""));
        assert_eq!(limited.registry().evict_idle(), 1);
        assert_eq!(limited.registry().keys(), ["\"b\""]);

        busy.await.unwrap();
        assert!(limited.registry().evict("\"b\""));
        assert!(limited.registry().is_empty());
    }
}
