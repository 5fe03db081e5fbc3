//! Cooperative shutdown: SIGINT/SIGTERM set a flag; during the interval
//! sleep the process is in a "safe-to-exit" region and returns
//! immediately, while an in-flight reconcile pass always runs to
//! completion (spec.md §5). Modeled as a cancellation signal threaded
//! from `main` rather than the original's module-level signal-handler
//! singleton (spec.md §9).

use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Installs SIGINT/SIGTERM handlers and returns a handle to observe them.
    pub fn install() -> Self {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            let mut terminate = signal(SignalKind::terminate()).expect("install SIGTERM handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
            let _ = tx.send(true);
        });
        Shutdown { rx }
    }

    pub fn requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// The "safe-to-exit" sleep: returns as soon as either `interval`
    /// elapses or a shutdown signal arrives, whichever is first.
    pub async fn safe_sleep(&self, interval: Duration) {
        let mut rx = self.rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = rx.changed() => {}
        }
    }
}
