//! Cooperative shutdown signal shared by every long-lived task.
//!
//! Mirrors the service's own shutdown primitive: a broadcast channel carries the
//! "go" signal, an `AtomicBool` makes `trigger` idempotent, and `notified()` gives
//! callers a future they can race in `tokio::select!` without holding a receiver
//! open for the task's whole lifetime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Clone)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Fires the signal. Safe to call more than once; only the first call has effect.
    pub fn trigger(&self) {
        if !self.triggered.swap(true, Ordering::SeqCst) {
            let _ = self.sender.send(());
        }
    }

    /// A future that resolves once, whether shutdown was already triggered or
    /// fires while being awaited.
    pub fn notified(&self) -> ShutdownNotified {
        ShutdownNotified {
            receiver: self.sender.subscribe(),
            triggered: self.triggered.clone(),
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ShutdownNotified {
    receiver: broadcast::Receiver<()>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownNotified {
    pub async fn wait(mut self) {
        if self.triggered.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.receiver.recv().await;
    }
}

#[cfg(unix)]
pub async fn listen_for_shutdown_signals(shutdown: ShutdownSignal) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("failed to install SIGTERM handler: {}", e);
            return;
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            warn!("failed to install SIGINT handler: {}", e);
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }

    shutdown.trigger();
}

#[cfg(not(unix))]
pub async fn listen_for_shutdown_signals(shutdown: ShutdownSignal) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("received Ctrl-C");
    }
    shutdown.trigger();
}

/// Bundles the signal with the deadline policy used to bound shutdown work.
pub struct ShutdownCoordinator {
    signal: ShutdownSignal,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            signal: ShutdownSignal::new(),
            timeout,
        }
    }

    pub fn signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    pub fn start_signal_listener(&self) -> tokio::task::JoinHandle<()> {
        let signal = self.signal.clone();
        tokio::spawn(listen_for_shutdown_signals(signal))
    }

    pub async fn wait_for_shutdown(&self) {
        self.signal.notified().wait().await
    }

    /// Runs `cleanup` once shutdown fires, bounding it by the configured deadline.
    pub async fn shutdown_with_cleanup<F, Fut>(&self, cleanup: F)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        self.wait_for_shutdown().await;
        if tokio::time::timeout(self.timeout, cleanup()).await.is_err() {
            warn!(
                "shutdown cleanup exceeded {:?} deadline; proceeding with exit",
                self.timeout
            );
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_is_idempotent_and_wakes_waiters() {
        let signal = ShutdownSignal::new();
        let notified = signal.notified();
        signal.trigger();
        signal.trigger();
        notified.wait().await;
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn notified_after_trigger_resolves_immediately() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        signal.notified().wait().await;
    }
}
