use std::time::Duration;
use tokio::sync::watch;

/// Why a session never became ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessFailure {
    /// The transcoder could not be launched at all
    Spawn(String),
    /// The session was stopped before the transcoder confirmed output
    Aborted(String),
}

impl ReadinessFailure {
    pub fn message(&self) -> &str {
        match self {
            ReadinessFailure::Spawn(msg) | ReadinessFailure::Aborted(msg) => {
                msg
            }
        }
    }
}

pub type ReadinessOutcome = Result<(), ReadinessFailure>;

/// Outcome of a bounded wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitResult {
    Resolved(ReadinessOutcome),
    TimedOut,
}

/// Single-assignment completion signal with any number of waiters.
///
/// The first call to [`Readiness::resolve`] wins; later calls are ignored.
/// Waiters that arrive after resolution observe the stored outcome
/// immediately.
#[derive(Debug)]
pub struct Readiness {
    tx: watch::Sender<Option<ReadinessOutcome>>,
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

impl Readiness {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Store the outcome and wake every waiter. Returns false if the signal
    /// had already been resolved.
    pub fn resolve(&self, outcome: ReadinessOutcome) -> bool {
        let mut outcome = Some(outcome);
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = outcome.take();
            true
        })
    }

    pub fn succeed(&self) -> bool {
        self.resolve(Ok(()))
    }

    pub fn fail(&self, failure: ReadinessFailure) -> bool {
        self.resolve(Err(failure))
    }

    pub fn outcome(&self) -> Option<ReadinessOutcome> {
        self.tx.borrow().clone()
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Wait until resolved. Cancel-safe: dropping the future simply stops
    /// waiting.
    pub async fn wait(&self) -> ReadinessOutcome {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone().unwrap_or(Ok(())),
            // The sender lives as long as `self`, so this cannot happen
            // while we hold a reference.
            Err(_) => Err(ReadinessFailure::Aborted(
                "readiness signal dropped".to_string(),
            )),
        }
    }

    pub async fn wait_timeout(&self, limit: Duration) -> WaitResult {
        match tokio::time::timeout(limit, self.wait()).await {
            Ok(outcome) => WaitResult::Resolved(outcome),
            Err(_) => WaitResult::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn first_resolution_wins() {
        let readiness = Readiness::new();
        assert!(readiness.succeed());
        assert!(!readiness.fail(ReadinessFailure::Aborted("late".into())));
        assert_eq!(readiness.outcome(), Some(Ok(())));
        assert_eq!(readiness.wait().await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn all_waiters_observe_the_same_failure() {
        let readiness = Arc::new(Readiness::new());
        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let readiness = readiness.clone();
                tokio::spawn(async move {
                    readiness.wait_timeout(Duration::from_secs(5)).await
                })
            })
            .collect();

        tokio::task::yield_now().await;
        let failure = ReadinessFailure::Spawn("no such file".into());
        assert!(readiness.fail(failure.clone()));

        for waiter in waiters {
            assert_eq!(
                waiter.await.unwrap(),
                WaitResult::Resolved(Err(failure.clone()))
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unresolved_wait_times_out() {
        let readiness = Readiness::new();
        assert_eq!(
            readiness.wait_timeout(Duration::from_millis(200)).await,
            WaitResult::TimedOut
        );
        assert!(!readiness.is_resolved());
    }
}
