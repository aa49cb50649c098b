use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// A one-shot latch that parks callers until the test releases it.
#[derive(Debug, Default)]
pub struct Gate {
    entered: Notify,
    release: Notify,
    released: AtomicBool,
}

impl Gate {
    /// Resolves once at least one caller is parked on the gate.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Lets every parked and future caller through.
    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
        self.release.notify_waiters();
    }

    pub(crate) async fn pass(&self) {
        self.entered.notify_one();
        loop {
            let notified = self.release.notified();
            if self.released.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}
