//! Background ticker: runs one [`BackgroundTask`] beside the server.
//!
//! The task gets its own cancellation token, so stopping the ticker never
//! touches the request server. A supervisor task observes how the task ended
//! and logs panics instead of propagating them.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use vpnht_config::TickerPolicy;

use crate::collab::BackgroundTask;
use crate::outcome::{BestEffort, panic_message};

/// How the ticker's task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskExit {
    Finished,
    Panicked(String),
    Aborted,
}

/// Handle to a running background task.
pub struct TickerHandle {
    name: String,
    cancel: CancellationToken,
    abort: AbortHandle,
    supervisor: JoinHandle<TaskExit>,
}

/// Start `task` on its own tokio task. Never blocks.
pub fn spawn(task: Arc<dyn BackgroundTask>) -> TickerHandle {
    let name = task.name().to_string();
    let cancel = CancellationToken::new();

    let token = cancel.clone();
    let inner = tokio::spawn(async move { task.run(token).await });
    let abort = inner.abort_handle();

    let task_name = name.clone();
    let supervisor = tokio::spawn(async move {
        let exit = match inner.await {
            Ok(()) => TaskExit::Finished,
            Err(e) if e.is_panic() => TaskExit::Panicked(panic_message(e.into_panic())),
            Err(_) => TaskExit::Aborted,
        };
        match &exit {
            TaskExit::Finished => debug!(task = %task_name, "Background task finished"),
            TaskExit::Panicked(msg) => {
                error!(task = %task_name, panic = %msg, "Background task panicked")
            }
            TaskExit::Aborted => debug!(task = %task_name, "Background task aborted"),
        }
        exit
    });

    info!(task = %name, "Background task started");
    TickerHandle {
        name,
        cancel,
        abort,
        supervisor,
    }
}

impl TickerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The token passed to the task.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the ticker according to `policy`.
    ///
    /// With [`TickerPolicy::Cancel`] the task is cancelled and joined for at
    /// most `join`, then aborted. With [`TickerPolicy::Detach`] it is left
    /// running until the runtime shuts down.
    pub async fn stop(self, policy: TickerPolicy, join: Duration) -> BestEffort {
        match policy {
            TickerPolicy::Detach => {
                debug!(task = %self.name, "Background task left running");
                BestEffort::Done
            }
            TickerPolicy::Cancel => {
                self.cancel.cancel();
                let mut supervisor = self.supervisor;
                match tokio::time::timeout(join, &mut supervisor).await {
                    Ok(Ok(TaskExit::Panicked(msg))) => {
                        BestEffort::recovered(format!("task had panicked: {msg}"))
                    }
                    Ok(Ok(_)) => {
                        debug!(task = %self.name, "Background task stopped");
                        BestEffort::Done
                    }
                    Ok(Err(e)) => BestEffort::recovered(format!("supervisor failed: {e}")),
                    Err(_) => {
                        self.abort.abort();
                        warn!(
                            task = %self.name,
                            join_ms = join.as_millis() as u64,
                            "Background task ignored cancellation, aborted"
                        );
                        BestEffort::recovered("did not stop within join window")
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::BoxFuture;

    struct Cooperative {
        ticks: AtomicUsize,
    }

    impl BackgroundTask for Cooperative {
        fn name(&self) -> &str {
            "cooperative"
        }

        fn run(&self, cancel: CancellationToken) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                let mut interval = tokio::time::interval(Duration::from_millis(5));
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        _ = interval.tick() => {
                            self.ticks.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            })
        }
    }

    struct Stubborn;

    impl BackgroundTask for Stubborn {
        fn name(&self) -> &str {
            "stubborn"
        }

        fn run(&self, _cancel: CancellationToken) -> BoxFuture<'_, ()> {
            Box::pin(std::future::pending())
        }
    }

    struct Panicky;

    impl BackgroundTask for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }

        fn run(&self, _cancel: CancellationToken) -> BoxFuture<'_, ()> {
            Box::pin(async { panic!("ticker exploded") })
        }
    }

    #[tokio::test]
    async fn test_cancel_policy_stops_task() {
        let task = Arc::new(Cooperative {
            ticks: AtomicUsize::new(0),
        });
        let handle = spawn(task.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;

        let outcome = handle
            .stop(TickerPolicy::Cancel, Duration::from_millis(200))
            .await;
        assert!(outcome.is_done());

        let after_stop = task.ticks.load(Ordering::SeqCst);
        assert!(after_stop > 0);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(task.ticks.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn test_detach_policy_leaves_task_running() {
        let task = Arc::new(Cooperative {
            ticks: AtomicUsize::new(0),
        });
        let handle = spawn(task.clone());
        let token = handle.cancel_token();

        let outcome = handle
            .stop(TickerPolicy::Detach, Duration::from_millis(200))
            .await;
        assert!(outcome.is_done());
        assert!(!token.is_cancelled());

        let before = task.ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(task.ticks.load(Ordering::SeqCst) > before);
        token.cancel();
    }

    #[tokio::test]
    async fn test_stubborn_task_is_aborted() {
        let handle = spawn(Arc::new(Stubborn));
        let outcome = handle
            .stop(TickerPolicy::Cancel, Duration::from_millis(20))
            .await;
        assert_eq!(
            outcome,
            BestEffort::recovered("did not stop within join window")
        );
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let handle = spawn(Arc::new(Panicky));
        assert_eq!(handle.name(), "panicky");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let outcome = handle
            .stop(TickerPolicy::Cancel, Duration::from_millis(200))
            .await;
        assert_eq!(
            outcome,
            BestEffort::recovered("task had panicked: ticker exploded")
        );
    }
}
