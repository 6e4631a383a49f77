//! Cross-platform spawn helper and task stop signals for native and WASM targets

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// Spawn a future to run in the background.
///
/// On native platforms, uses `tokio::spawn` (requires Send).
/// On WASM, uses `wasm_bindgen_futures::spawn_local` (no Send required).
#[cfg(not(target_arch = "wasm32"))]
pub fn spawn<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(future);
}

#[cfg(target_arch = "wasm32")]
pub fn spawn<F>(future: F)
where
    F: Future<Output = ()> + 'static,
{
    wasm_bindgen_futures::spawn_local(future);
}

/// Owner side of a background task. Stopping is idempotent and also
/// happens on drop, so a task never outlives the value that started it.
#[derive(Debug)]
pub struct TaskGuard {
    tx: watch::Sender<bool>,
}

/// Task side: checked at every suspension point.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl TaskGuard {
    pub fn new() -> (Self, StopSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, StopSignal { rx })
    }

    /// Another signal for the same task group.
    pub fn signal(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.stop();
    }
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the guard stops or goes away.
    pub async fn stopped(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Session-wide liveness flag.
#[derive(Debug, Clone, Default)]
pub struct ActiveFlag(Arc<AtomicBool>);

impl ActiveFlag {
    pub fn new(active: bool) -> Self {
        Self(Arc::new(AtomicBool::new(active)))
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, active: bool) {
        self.0.store(active, Ordering::SeqCst);
    }

    /// Clear the flag; true only for the call that actually cleared it.
    pub fn deactivate(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}
