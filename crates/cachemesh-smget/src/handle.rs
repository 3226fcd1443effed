//! Handles to in-flight sorted merge gets.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{MergedResult, Result, SmgetError};

/// Observable state of a sorted merge get.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmgetStatus {
    Pending,
    Completed,
    Cancelled,
    /// The handle's own operation deadline elapsed.
    TimedOut,
}

#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    Pending,
    Completed(Arc<MergedResult>),
    Cancelled,
    TimedOut(Duration),
}

impl Outcome {
    fn status(&self) -> SmgetStatus {
        match self {
            Outcome::Pending => SmgetStatus::Pending,
            Outcome::Completed(_) => SmgetStatus::Completed,
            Outcome::Cancelled => SmgetStatus::Cancelled,
            Outcome::TimedOut(_) => SmgetStatus::TimedOut,
        }
    }
}

/// Writes the terminal outcome. Only the first writer wins.
#[derive(Debug, Clone)]
pub(crate) struct Completion {
    outcome: Arc<watch::Sender<Outcome>>,
}

impl Completion {
    pub(crate) fn finish(&self, outcome: Outcome) -> bool {
        self.outcome.send_if_modified(|current| {
            if matches!(current, Outcome::Pending) {
                *current = outcome;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn is_finished(&self) -> bool {
        !matches!(*self.outcome.borrow(), Outcome::Pending)
    }
}

/// Handle to one sorted merge get.
///
/// The request runs in the background from the moment the handle is
/// created. [`SmgetHandle::get`] waits for its outcome,
/// [`SmgetHandle::cancel`] abandons it.
#[derive(Debug)]
pub struct SmgetHandle {
    completion: Completion,
    cancel: CancellationToken,
}

impl SmgetHandle {
    pub(crate) fn new() -> (Self, Completion, CancellationToken) {
        let (outcome, _) = watch::channel(Outcome::Pending);
        let completion = Completion {
            outcome: Arc::new(outcome),
        };
        let cancel = CancellationToken::new();
        let handle = Self {
            completion: completion.clone(),
            cancel: cancel.clone(),
        };
        (handle, completion, cancel)
    }

    #[cfg(test)]
    pub(crate) fn finished(outcome: Outcome) -> Self {
        let (handle, completion, _) = Self::new();
        completion.finish(outcome);
        handle
    }

    /// Waits up to `timeout` for the outcome.
    ///
    /// An elapsed `timeout` fails with [`SmgetError::Timeout`] and leaves
    /// the request running; call [`SmgetHandle::cancel`] to stop it.
    pub async fn get(&self, timeout: Duration) -> Result<Arc<MergedResult>> {
        let mut outcome = self.completion.outcome.subscribe();
        let waited = tokio::time::timeout(
            timeout,
            outcome.wait_for(|outcome| !matches!(outcome, Outcome::Pending)),
        )
        .await;

        match waited {
            Err(_) => Err(SmgetError::Timeout(timeout)),
            // The sender is owned by `self`.
            Ok(Err(_)) => Err(SmgetError::Cancelled),
            Ok(Ok(outcome)) => match &*outcome {
                Outcome::Completed(result) => Ok(Arc::clone(result)),
                Outcome::Cancelled | Outcome::Pending => Err(SmgetError::Cancelled),
                Outcome::TimedOut(after) => Err(SmgetError::Timeout(*after)),
            },
        }
    }

    /// Cancels the request and every outstanding node sub-request.
    ///
    /// Returns `true` if this call moved the handle to the cancelled state;
    /// `false` if it had already completed, timed out or been cancelled.
    pub fn cancel(&self) -> bool {
        let cancelled = self.completion.finish(Outcome::Cancelled);
        self.cancel.cancel();
        if cancelled {
            debug!("Sorted merge get cancelled");
        }
        cancelled
    }

    pub fn status(&self) -> SmgetStatus {
        self.completion.outcome.borrow().status()
    }

    pub fn is_done(&self) -> bool {
        self.completion.is_finished()
    }

    /// Missed keys of a completed request.
    pub fn missed_keys(&self) -> Option<Vec<String>> {
        match &*self.completion.outcome.borrow() {
            Outcome::Completed(result) => Some(result.missed_keys().to_vec()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_terminal_transition_wins() {
        let (handle, completion, cancel) = SmgetHandle::new();
        assert_eq!(handle.status(), SmgetStatus::Pending);

        assert!(completion.finish(Outcome::Completed(Arc::new(MergedResult::default()))));
        assert!(!handle.cancel());
        assert!(cancel.is_cancelled());
        assert_eq!(handle.status(), SmgetStatus::Completed);
        assert!(handle.get(Duration::from_millis(10)).await.is_ok());
        assert_eq!(handle.missed_keys(), Some(Vec::new()));
    }

    #[tokio::test]
    async fn cancel_before_completion() {
        let (handle, completion, _) = SmgetHandle::new();
        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(!completion.finish(Outcome::Completed(Arc::new(MergedResult::default()))));

        assert_eq!(
            handle.get(Duration::from_secs(1)).await,
            Err(SmgetError::Cancelled)
        );
        assert_eq!(handle.missed_keys(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn get_times_out_without_changing_state() {
        let (handle, completion, _) = SmgetHandle::new();

        assert_eq!(
            handle.get(Duration::from_millis(1)).await,
            Err(SmgetError::Timeout(Duration::from_millis(1)))
        );
        assert_eq!(handle.status(), SmgetStatus::Pending);

        assert!(completion.finish(Outcome::Completed(Arc::new(MergedResult::default()))));
        assert!(handle.get(Duration::from_millis(1)).await.is_ok());
    }

    #[tokio::test]
    async fn operation_deadline_reports_timeout() {
        let handle = SmgetHandle::finished(Outcome::TimedOut(Duration::from_millis(700)));
        assert_eq!(handle.status(), SmgetStatus::TimedOut);
        assert_eq!(
            handle.get(Duration::from_secs(1)).await,
            Err(SmgetError::Timeout(Duration::from_millis(700)))
        );
    }
}
