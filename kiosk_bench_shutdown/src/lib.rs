//! Cooperative shutdown for the ingest loop
//!
//! The ingest side of the benchmark runs a single polling loop that must not be interrupted in
//! the middle of a decode or a bulk insert. Instead of aborting the task, an external
//! termination signal flips a flag held by the [`ShutdownController`]; the loop checks that flag
//! once per iteration and, when set, leaves after the current iteration so it can flush what it
//! has buffered and release its resources.
//!
//! Use [`ShutdownController::listen_for_signals`] to wire `SIGTERM`/`SIGINT` (or `ctrl+c` on
//! Windows) to the controller.
use observability_deps::tracing::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Wait for a `SIGTERM` or `SIGINT` to stop the process on UNIX systems
#[cfg(unix)]
pub async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate()).expect("failed to register signal handler");
    let mut int = signal(SignalKind::interrupt()).expect("failed to register signal handler");

    tokio::select! {
        _ = term.recv() => info!("Received SIGTERM, shutting down"),
        _ = int.recv() => info!("Received SIGINT, shutting down"),
    }
}

/// Wait for a `ctrl+c` to stop the process on Windows systems
#[cfg(windows)]
pub async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received SIGINT, shutting down");
}

/// A cooperative shutdown flag
///
/// Cloning a [`ShutdownController`] yields a handle to the same flag, so the signal listener and
/// the loop that polls the flag can each own a copy. Requesting shutdown is idempotent and never
/// interrupts work in progress.
#[derive(Debug, Clone, Default)]
pub struct ShutdownController {
    token: CancellationToken,
}

impl ShutdownController {
    /// Create a [`ShutdownController`] with shutdown not yet requested
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop owning this controller to stop after its current iteration
    pub fn request_shutdown(&self) {
        self.token.cancel();
    }

    /// `true` once [`request_shutdown`][Self::request_shutdown] has been called on any clone
    pub fn is_shutdown_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Future that completes when shutdown has been requested
    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// Spawn a task that requests shutdown when the process receives a termination signal
    ///
    /// The task also finishes if shutdown is requested by other means, so it never outlives the
    /// controller's useful life.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = wait_for_signal() => controller.request_shutdown(),
                _ = controller.wait_for_shutdown() => {}
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::ShutdownController;

    #[test]
    fn request_is_visible_to_clones() {
        let controller = ShutdownController::new();
        let loop_handle = controller.clone();
        assert!(!loop_handle.is_shutdown_requested());

        controller.request_shutdown();
        assert!(loop_handle.is_shutdown_requested());

        // requesting twice is harmless
        controller.request_shutdown();
        assert!(loop_handle.is_shutdown_requested());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn signal_listener_exits_on_internal_request() {
        let controller = ShutdownController::new();
        let listener = controller.listen_for_signals();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!listener.is_finished());

        controller.request_shutdown();
        tokio::time::timeout(Duration::from_secs(1), listener)
            .await
            .expect("listener did not exit after shutdown request")
            .expect("listener task panicked");
    }

    #[test_log::test(tokio::test)]
    async fn wait_for_shutdown_completes_after_request() {
        let controller = ShutdownController::new();
        let waiter = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.wait_for_shutdown().await })
        };
        controller.request_shutdown();
        waiter.await.expect("waiter task panicked");
    }
}
