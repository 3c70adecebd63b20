//! Concurrent branches joined on completion or individual timeout

use serde::Serialize;
use std::future::Future;
use std::time::Duration;

/// How one concurrent branch ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum BranchOutcome<T, E> {
    Completed(T),
    Failed(E),
    TimedOut,
}

impl<T, E> BranchOutcome<T, E> {
    fn from_timeout(result: Result<Result<T, E>, tokio::time::error::Elapsed>) -> Self {
        match result {
            Ok(Ok(value)) => BranchOutcome::Completed(value),
            Ok(Err(err)) => BranchOutcome::Failed(err),
            Err(_) => BranchOutcome::TimedOut,
        }
    }

    /// The value, if the branch completed
    pub fn ok(self) -> Option<T> {
        match self {
            BranchOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, BranchOutcome::Completed(_))
    }
}

/// Run one branch under a timeout
pub async fn run_branch<T, E>(
    branch: impl Future<Output = Result<T, E>>,
    timeout: Duration,
) -> BranchOutcome<T, E> {
    BranchOutcome::from_timeout(tokio::time::timeout(timeout, branch).await)
}

/// Run two branches concurrently, each under its own timeout.
///
/// Returns once both have completed, failed or timed out; neither branch
/// cancels the other.
pub async fn join_branches<A, B, EA, EB>(
    a: impl Future<Output = Result<A, EA>>,
    b: impl Future<Output = Result<B, EB>>,
    timeout: Duration,
) -> (BranchOutcome<A, EA>, BranchOutcome<B, EB>) {
    tokio::join!(run_branch(a, timeout), run_branch(b, timeout))
}
