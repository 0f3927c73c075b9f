use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::in_flight::InFlightGuard;

/// Service-wide executor for hit-count verifications.
///
/// Created once at startup and shared by every scan. At most `size`
/// submitted tasks run at the same time; the rest queue on the semaphore.
#[derive(Clone)]
pub struct HitCountPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl HitCountPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Runs `task` on the pool. `guard` is held until the task finishes or
    /// is abandoned, whichever comes first.
    pub fn submit<F>(&self, guard: InFlightGuard, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let _guard = guard;
            let Ok(_permit) = permits.acquire_owned().await else {
                tracing::warn!("hit count pool closed; dropping verification");
                return;
            };
            task.await;
        });
    }
}

impl std::fmt::Debug for HitCountPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HitCountPool")
            .field("size", &self.size)
            .field("available", &self.permits.available_permits())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_flight::InFlight;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pool_bounds_concurrent_tasks() {
        let pool = HitCountPool::new(2);
        let mut in_flight = InFlight::new();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.submit(in_flight.acquire(), async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }

        tokio::time::timeout(Duration::from_secs(5), in_flight.wait_idle())
            .await
            .expect("pool should drain");
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.size(), 2);
    }

    #[test]
    fn zero_size_is_raised_to_one() {
        assert_eq!(HitCountPool::new(0).size(), 1);
    }
}
