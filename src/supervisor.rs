//! Task supervision
//!
//! Each process runs its long-lived tasks (workers, producers, the fan-out
//! loop) under one [`Supervisor`]. All of them share a cancellation token:
//!
//! ```text
//!              Supervisor
//!        ┌──────────┼──────────┐
//!        ▼          ▼          ▼
//!   [worker a] [worker b] [producer]
//!        │
//!        └─ Err ──► cancel all ──► await all ──► Err (process exits non-zero)
//! ```
//!
//! A task that returns `Ok` early is logged and its siblings keep running.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;

use tokio::task::{AbortHandle, Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Owns a set of named, cancellable tasks and stops them all on the first failure
pub struct Supervisor {
    token: CancellationToken,
    tasks: JoinSet<Result<()>>,
    names: HashMap<Id, String>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: JoinSet::new(),
            names: HashMap::new(),
        }
    }

    /// Token cancelled when the supervisor shuts down
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Number of tasks still running
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Spawn a task; it receives a token to stop on
    ///
    /// Aborting the returned handle counts as a task failure.
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, task: F) -> AbortHandle
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let handle = self.tasks.spawn(task(self.token.child_token()));

        tracing::debug!(task = %name, id = %handle.id(), "Task spawned");
        self.names.insert(handle.id(), name);
        handle
    }

    /// Wait for `shutdown` or the first failing task, then stop everything
    ///
    /// Returns the first task error, if any.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut first_error = None;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(tasks = self.tasks.len(), "Shutting down tasks");
                    break;
                }
                joined = self.tasks.join_next_with_id() => match joined {
                    None => {
                        tracing::info!("All tasks finished");
                        break;
                    }
                    Some(joined) => {
                        if let Err(e) = self.on_task_done(joined) {
                            first_error = Some(e);
                            break;
                        }
                    }
                }
            }
        }

        self.token.cancel();

        while let Some(joined) = self.tasks.join_next_with_id().await {
            if let Err(e) = self.on_task_done(joined) {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn on_task_done(&mut self, joined: std::result::Result<(Id, Result<()>), JoinError>) -> Result<()> {
        let id = match &joined {
            Ok((id, _)) => *id,
            Err(e) => e.id(),
        };
        let name = self.names.remove(&id).unwrap_or_else(|| format!("task-{}", id));

        match joined {
            Ok((_, Ok(()))) => {
                tracing::info!(task = %name, "Task finished");
                Ok(())
            }
            Ok((_, Err(e))) => {
                tracing::error!(task = %name, error = %e, "Task failed, stopping siblings");
                Err(e)
            }
            Err(e) => {
                let reason = if e.is_panic() {
                    panic_message(e.into_panic().as_ref())
                } else {
                    e.to_string()
                };
                tracing::error!(task = %name, reason = %reason, "Task aborted, stopping siblings");
                Err(Error::TaskFailed { name, reason })
            }
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_first_failure_stops_siblings() {
        let mut supervisor = Supervisor::new();
        let stopped = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&stopped);
        supervisor.spawn("waiter", move |token| async move {
            token.cancelled().await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        supervisor.spawn("failing", |_| async { Err::<(), _>(Error::Inference("model not loaded".into())) });

        let result = supervisor.run_until(std::future::pending()).await;

        assert!(matches!(result, Err(Error::Inference(_))));
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_all() {
        let mut supervisor = Supervisor::new();
        for name in ["a", "b", "c"] {
            supervisor.spawn(name, |token| async move {
                token.cancelled().await;
                Ok(())
            });
        }
        assert_eq!(supervisor.len(), 3);

        supervisor.run_until(async {}).await.unwrap();
    }

    #[tokio::test]
    async fn test_early_success_keeps_siblings() {
        let mut supervisor = Supervisor::new();
        let token = supervisor.token();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        supervisor.spawn("short", |_| async { Ok(()) });
        supervisor.spawn("long", move |token| async move {
            token.cancelled().await;
            Ok(())
        });

        let handle = tokio::spawn(supervisor.run_until(async move {
            let _ = rx.await;
        }));

        tokio::task::yield_now().await;
        assert!(!token.is_cancelled());

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_panic_becomes_task_failure() {
        let mut supervisor = Supervisor::new();
        supervisor.spawn("crashy", |_| async {
            if true {
                panic!("boom");
            }
            Ok(())
        });

        match supervisor.run_until(std::future::pending()).await {
            Err(Error::TaskFailed { name, reason }) => {
                assert_eq!(name, "crashy");
                assert_eq!(reason, "panicked: boom");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_aborted_task_is_named() {
        let mut supervisor = Supervisor::new();
        supervisor.spawn("steady", |token| async move {
            token.cancelled().await;
            Ok(())
        });
        let stuck = supervisor.spawn("stuck", |_| std::future::pending::<Result<()>>());
        stuck.abort();

        match supervisor.run_until(std::future::pending()).await {
            Err(Error::TaskFailed { name, reason }) => {
                assert_eq!(name, "stuck");
                assert!(reason.contains("cancelled"), "reason: {}", reason);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
