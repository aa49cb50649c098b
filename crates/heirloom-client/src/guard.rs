//! Per-session concurrency control: at most one mutating pipeline at a time,
//! and at most one snapshot refresh per identity.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use crate::error::HeirloomError;

#[derive(Debug, Default)]
pub struct InFlightGuard {
    flag: AtomicBool,
}

impl InFlightGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the flag or fails with `AlreadyInFlight`. The flag is released
    /// when the permit drops, including when the owning future is cancelled.
    pub fn try_acquire(&self) -> Result<InFlightPermit<'_>, HeirloomError> {
        self.flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| InFlightPermit { flag: &self.flag })
            .map_err(|_| HeirloomError::AlreadyInFlight)
    }

    #[must_use]
    pub fn is_held(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct InFlightPermit<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlightPermit<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

type SharedRun<T> = Shared<BoxFuture<'static, T>>;

/// Joins concurrent callers for the same key onto one in-flight future.
pub struct RefreshCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pending: Mutex<HashMap<String, SharedRun<T>>>,
}

impl<T> Default for RefreshCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> RefreshCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Awaits the run already pending for `key`, or starts one with `start`.
    pub async fn run<F>(&self, key: &str, start: F) -> T
    where
        F: FnOnce() -> BoxFuture<'static, T>,
    {
        let shared = {
            let mut pending = self.lock();
            if let Some(existing) = pending.get(key) {
                tracing::debug!(key, "joining pending refresh");
                existing.clone()
            } else {
                let run = start().shared();
                pending.insert(key.to_string(), run.clone());
                run
            }
        };

        let output = shared.clone().await;

        let mut pending = self.lock();
        if pending
            .get(key)
            .is_some_and(|current| Shared::ptr_eq(current, &shared))
        {
            pending.remove(key);
        }
        output
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SharedRun<T>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::FutureExt;
    use tokio::sync::Notify;

    use super::{InFlightGuard, RefreshCoalescer};
    use crate::error::HeirloomError;

    #[test]
    fn second_acquire_fails_until_permit_drops() -> Result<(), HeirloomError> {
        let guard = InFlightGuard::new();
        let permit = guard.try_acquire()?;
        assert!(guard.is_held());
        assert_eq!(
            guard.try_acquire().map(|_| ()),
            Err(HeirloomError::AlreadyInFlight)
        );
        drop(permit);
        assert!(!guard.is_held());
        let _again = guard.try_acquire()?;
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_pipeline_releases_flag() -> anyhow::Result<()> {
        let guard = Arc::new(InFlightGuard::new());
        let release = Arc::new(Notify::new());
        let task = {
            let guard = guard.clone();
            let release = release.clone();
            tokio::spawn(async move {
                let _permit = guard.try_acquire()?;
                release.notified().await;
                Ok::<(), HeirloomError>(())
            })
        };
        while !guard.is_held() {
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;
        assert!(!guard.is_held());
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_runs_share_one_future() -> anyhow::Result<()> {
        let coalescer = Arc::new(RefreshCoalescer::<u32>::new());
        let starts = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let spawn_run = |coalescer: Arc<RefreshCoalescer<u32>>| {
            let starts = starts.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                coalescer
                    .run("owner", move || {
                        starts.fetch_add(1, Ordering::SeqCst);
                        async move {
                            gate.notified().await;
                            7
                        }
                        .boxed()
                    })
                    .await
            })
        };

        let first = spawn_run(coalescer.clone());
        while coalescer.pending_count() == 0 {
            tokio::task::yield_now().await;
        }
        let second = spawn_run(coalescer.clone());
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        assert_eq!(first.await?, 7);
        assert_eq!(second.await?, 7);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(coalescer.pending_count(), 0);

        let third = coalescer.run("owner", || async { 9 }.boxed()).await;
        assert_eq!(third, 9);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        Ok(())
    }
}
