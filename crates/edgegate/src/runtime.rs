//! Process-level plumbing: shutdown signalling, the fail-fast task group
//! and the OS signal watcher.
//!
//! ```text
//!          ShutdownController ──shutdown()──┐
//!                 │ subscribe()             ▼
//!    ┌────────────┼─────────────┬──────── watch<bool> ────────┐
//!    ▼            ▼             ▼                             ▼
//! MQTT listener  WS listener  Forwarder              signal watcher
//!    └────────────┴──── TaskGroup::wait() ────────────────────┘
//!        first task to return → shutdown() → everyone else stops
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::GatewayError;

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

/// Owner side of the shutdown signal. Cheap to clone.
#[derive(Clone)]
pub struct ShutdownController {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// A new listener for the signal.
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }

    /// Signals every [`Shutdown`]. Idempotent.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Listener side of the shutdown signal.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Resolves once shutdown has been requested (or the controller is
    /// gone).
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }
}

// ---------------------------------------------------------------------------
// TaskGroup
// ---------------------------------------------------------------------------

/// A set of long-lived tasks that live and die together.
///
/// The first task to finish, for whatever reason, triggers shutdown for
/// the rest. A task that returns `Ok` after shutdown was requested
/// stopped cleanly; one that returns before that, or fails, is reported.
pub struct TaskGroup {
    tasks: JoinSet<(String, Result<(), GatewayError>)>,
    controller: ShutdownController,
    grace: Duration,
}

impl TaskGroup {
    pub fn new(controller: ShutdownController) -> Self {
        Self {
            tasks: JoinSet::new(),
            controller,
            grace: Duration::from_secs(10),
        }
    }

    /// How long to wait for the remaining tasks after shutdown before
    /// aborting them. Default: 10 seconds.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn spawn<F>(&mut self, name: impl Into<String>, task: F)
    where
        F: Future<Output = Result<(), GatewayError>> + Send + 'static,
    {
        let name = name.into();
        self.tasks.spawn(async move { (name, task.await) });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits for every task. Returns the first failure, if any.
    pub async fn wait(mut self) -> Result<(), GatewayError> {
        let mut first_error: Option<GatewayError> = None;

        loop {
            let joined = if self.controller.is_shutdown() {
                match tokio::time::timeout(self.grace, self.tasks.join_next()).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        tracing::warn!(
                            remaining = self.tasks.len(),
                            "tasks did not stop in time, aborting"
                        );
                        self.tasks.abort_all();
                        while self.tasks.join_next().await.is_some() {}
                        break;
                    }
                }
            } else {
                self.tasks.join_next().await
            };
            let Some(joined) = joined else {
                break;
            };

            let outcome = match joined {
                Ok((name, Ok(()))) if self.controller.is_shutdown() => {
                    tracing::debug!(task = %name, "task stopped");
                    None
                }
                Ok((name, Ok(()))) => {
                    tracing::error!(task = %name, "task returned unexpectedly");
                    Some(GatewayError::Shutdown(format!("{name} returned")))
                }
                Ok((name, Err(error))) => {
                    tracing::error!(task = %name, %error, "task failed");
                    Some(error)
                }
                Err(e) if e.is_cancelled() => None,
                Err(e) => {
                    tracing::error!(error = %e, "task panicked");
                    Some(GatewayError::Shutdown(format!("task panicked: {e}")))
                }
            };
            if let Some(error) = outcome {
                first_error.get_or_insert(error);
            }
            self.controller.shutdown();
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Requests shutdown on SIGINT/SIGTERM. Returns `Ok` either way: after a
/// signal, or when something else already requested shutdown.
pub async fn watch_signals(
    controller: ShutdownController,
    mut shutdown: Shutdown,
) -> Result<(), GatewayError> {
    tokio::select! {
        _ = shutdown.wait() => Ok(()),
        signal = wait_for_signal() => {
            let signal = signal?;
            tracing::info!(signal, "shutdown by signal");
            controller.shutdown();
            Ok(())
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<&'static str, GatewayError> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())
        .map_err(|e| GatewayError::Startup(format!("failed to install SIGTERM handler: {e}")))?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.map_err(|e| GatewayError::Startup(format!("failed to listen for SIGINT: {e}")))?;
            Ok("SIGINT")
        }
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<&'static str, GatewayError> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| GatewayError::Startup(format!("failed to listen for ctrl-c: {e}")))?;
    Ok("ctrl-c")
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn until_shutdown(mut shutdown: Shutdown) -> Result<(), GatewayError> {
        shutdown.wait().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_wakes_every_listener() {
        let controller = ShutdownController::new();
        let a = tokio::spawn(until_shutdown(controller.subscribe()));
        let b = tokio::spawn(until_shutdown(controller.subscribe()));

        controller.shutdown();

        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert!(controller.is_shutdown());
    }

    #[tokio::test]
    async fn test_subscribe_after_shutdown_resolves_immediately() {
        let controller = ShutdownController::new();
        controller.shutdown();
        let mut late = controller.subscribe();
        late.wait().await;
        assert!(late.is_shutdown());
    }

    #[tokio::test]
    async fn test_task_group_first_failure_cancels_rest() {
        let controller = ShutdownController::new();
        let mut group = TaskGroup::new(controller.clone());
        group.spawn("waiter", until_shutdown(controller.subscribe()));
        group.spawn("broken", async {
            Err::<(), _>(GatewayError::Startup("bind failed".into()))
        });

        let result = group.wait().await;

        assert!(matches!(result, Err(GatewayError::Startup(_))));
        assert!(controller.is_shutdown());
    }

    #[tokio::test]
    async fn test_task_group_requested_shutdown_is_not_an_error() {
        let controller = ShutdownController::new();
        let mut group = TaskGroup::new(controller.clone());
        group.spawn("a", until_shutdown(controller.subscribe()));
        group.spawn("b", until_shutdown(controller.subscribe()));
        let stopper = controller.clone();
        group.spawn("signal", async move {
            stopper.shutdown();
            Ok(())
        });

        assert!(group.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_task_group_early_return_is_unexpected() {
        let controller = ShutdownController::new();
        let mut group = TaskGroup::new(controller.clone());
        group.spawn("waiter", until_shutdown(controller.subscribe()));
        group.spawn("listener", async { Ok::<(), GatewayError>(()) });

        let result = group.wait().await;

        assert!(matches!(result, Err(GatewayError::Shutdown(ref m)) if m.contains("listener")));
    }

    #[tokio::test]
    async fn test_task_group_panic_is_reported() {
        let controller = ShutdownController::new();
        let mut group = TaskGroup::new(controller.clone());
        group.spawn("waiter", until_shutdown(controller.subscribe()));
        group.spawn("panicky", async {
            if true {
                panic!("boom");
            }
            Ok::<(), GatewayError>(())
        });

        let result = group.wait().await;

        assert!(matches!(result, Err(GatewayError::Shutdown(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_group_aborts_stragglers_after_grace() {
        let controller = ShutdownController::new();
        let mut group = TaskGroup::new(controller.clone()).with_grace(Duration::from_secs(1));
        group.spawn("deaf", async {
            std::future::pending::<()>().await;
            Ok(())
        });
        let stopper = controller.clone();
        group.spawn("signal", async move {
            stopper.shutdown();
            Ok(())
        });

        assert!(group.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_watch_signals_returns_on_shutdown() {
        let controller = ShutdownController::new();
        let watcher = tokio::spawn(watch_signals(controller.clone(), controller.subscribe()));
        controller.shutdown();
        watcher.await.unwrap().unwrap();
    }
}
