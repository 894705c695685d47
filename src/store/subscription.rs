//! Subscription handles
//!
//! A subscription owns the background task that feeds snapshots to a
//! callback. Calling [`Subscription::unsubscribe`] or dropping the handle
//! stops the task.

use std::future::Future;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::types::ListenTarget;
use crate::metrics::ACTIVE_SUBSCRIPTIONS;

/// Cancellation handle for a live snapshot listener
#[derive(Debug)]
pub struct Subscription {
    target: ListenTarget,
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

struct ActiveGuard;

impl ActiveGuard {
    fn new() -> Self {
        ACTIVE_SUBSCRIPTIONS.inc();
        ActiveGuard
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        ACTIVE_SUBSCRIPTIONS.dec();
    }
}

impl Subscription {
    /// Run `listener` on the current Tokio runtime until it returns or the
    /// subscription is cancelled.
    pub fn spawn<F>(target: ListenTarget, listener: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (cancel, cancelled) = oneshot::channel::<()>();
        let path = target.path().to_string();
        let guard = ActiveGuard::new();

        let task = tokio::spawn(async move {
            let _guard = guard;
            tokio::select! {
                _ = cancelled => {
                    tracing::debug!(path = %path, "Subscription cancelled");
                }
                _ = listener => {
                    tracing::debug!(path = %path, "Subscription listener finished");
                }
            }
        });

        Self {
            target,
            cancel: Some(cancel),
            task,
        }
    }

    pub fn target(&self) -> &ListenTarget {
        &self.target
    }

    /// Whether the listener task is still running
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop delivering snapshots and wait for the listener to wind down
    pub async fn unsubscribe(mut self) {
        tracing::info!(path = %self.target.path(), "Unsubscribing");
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}
