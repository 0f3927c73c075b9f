use std::sync::Arc;

use tokio::sync::watch;

/// Number of verification tasks one scan has submitted that have not yet
/// finished.
///
/// The count only goes up through [`InFlight::acquire`], which hands out an
/// [`InFlightGuard`]; it only goes down when that guard is dropped. A task
/// that owns its guard therefore releases its slot on every exit path,
/// including errors, panics and cancellation.
pub struct InFlight {
    tx: Arc<watch::Sender<usize>>,
    rx: watch::Receiver<usize>,
}

pub struct InFlightGuard {
    tx: Arc<watch::Sender<usize>>,
}

impl InFlight {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(0);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn count(&self) -> usize {
        *self.tx.borrow()
    }

    pub fn acquire(&self) -> InFlightGuard {
        self.tx.send_modify(|n| *n += 1);
        InFlightGuard {
            tx: Arc::clone(&self.tx),
        }
    }

    /// Waits until at least one task that was in flight at call time has
    /// completed. Returns immediately when nothing is in flight.
    pub async fn wait_for_completion(&mut self) {
        let snapshot = self.count();
        if snapshot == 0 {
            return;
        }
        // The sender lives in `self`, so the channel cannot close here.
        let _ = self.rx.wait_for(|n| *n < snapshot).await;
    }

    /// Waits until every submitted task has completed.
    pub async fn wait_idle(&mut self) {
        let _ = self.rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for InFlight {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.tx.send_modify(|n| *n = n.saturating_sub(1));
    }
}
