//! Bounded polling and retrying against the vendor.
//!
//! This is the only place that sleeps. Deadlines are absolute instants fixed
//! when the operation starts, so slow polls never extend the bound, and every
//! sleep and in-flight call races the cancellation token.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::classify::{Classify, ErrorClass};
use crate::schema::Phase;

/// Pause between two polls unless the caller overrides it.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Shared bound for every wait and retry of one operation.
#[derive(Clone, Debug)]
pub struct RetryBudget {
    /// Pause between attempts.
    pub retry_interval: Duration,
    /// Absolute instant after which no further attempt is made.
    pub deadline: Instant,
    /// Cooperative cancellation signal plumbed from the engine.
    pub cancellation: CancellationToken,
    /// Lifecycle phase used to classify errors.
    pub phase: Phase,
}

impl RetryBudget {
    /// Starts a budget of `timeout` from now.
    #[must_use]
    pub fn new(phase: Phase, timeout: Duration, cancellation: CancellationToken) -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            deadline: Instant::now() + timeout,
            cancellation,
            phase,
        }
    }

    /// Overrides the retry interval.
    #[must_use]
    pub const fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Same deadline and token, classified under another phase.
    #[must_use]
    pub fn in_phase(&self, phase: Phase) -> Self {
        Self {
            phase,
            ..self.clone()
        }
    }
}

/// What a wait is waiting for.
#[derive(Clone, Debug)]
pub struct WaitSpec<S> {
    /// States that end the wait successfully.
    pub targets: Vec<S>,
    /// Whether "resource absent" is itself a target.
    pub accept_absent: bool,
    /// Interval, deadline and cancellation.
    pub budget: RetryBudget,
}

impl<S> WaitSpec<S> {
    /// Waits for any of `targets`.
    #[must_use]
    pub const fn reach(targets: Vec<S>, budget: RetryBudget) -> Self {
        Self {
            targets,
            accept_absent: false,
            budget,
        }
    }

    /// Waits for the resource to disappear.
    #[must_use]
    pub const fn absent(budget: RetryBudget) -> Self {
        Self {
            targets: Vec::new(),
            accept_absent: true,
            budget,
        }
    }
}

/// Successful end of a wait.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Waited<S> {
    /// A target state was observed.
    Reached(S),
    /// The resource is absent and absence was a target.
    Gone,
}

/// Unsuccessful end of a wait or retry loop.
#[derive(Debug, Error)]
pub enum WaitError<E> {
    /// The resource is absent and absence was not a target.
    #[error("resource not found: {error}")]
    NotFound {
        /// Last vendor error.
        error: E,
    },
    /// A non-retryable vendor error.
    #[error("{class} error: {error}")]
    Failed {
        /// Class of the error.
        class: ErrorClass,
        /// Vendor error.
        error: E,
    },
    /// The deadline passed while the vendor kept failing transiently.
    #[error("retry budget exhausted: {error}")]
    Exhausted {
        /// Last transient error.
        error: E,
    },
    /// The deadline passed before a target state was observed.
    #[error("deadline exceeded; last observed state: {}", .last_state.as_deref().unwrap_or("none"))]
    Timeout {
        /// Debug rendering of the last polled state.
        last_state: Option<String>,
    },
    /// The cancellation signal fired.
    #[error("operation cancelled")]
    Cancelled,
}

enum Last<E> {
    Nothing,
    State(String),
    Error(E),
}

impl<E> Last<E> {
    fn expire(self) -> WaitError<E> {
        match self {
            Self::Nothing => WaitError::Timeout { last_state: None },
            Self::State(state) => WaitError::Timeout {
                last_state: Some(state),
            },
            Self::Error(error) => WaitError::Exhausted { error },
        }
    }
}

async fn pause<E>(budget: &RetryBudget, last: Last<E>) -> Result<Last<E>, WaitError<E>> {
    let wake = (Instant::now() + budget.retry_interval).min(budget.deadline);
    tokio::select! {
        biased;
        () = budget.cancellation.cancelled() => Err(WaitError::Cancelled),
        () = sleep_until(wake) => {
            if Instant::now() >= budget.deadline {
                Err(last.expire())
            } else {
                Ok(last)
            }
        }
    }
}

/// Polls until the resource reaches one of the target states.
///
/// Transient errors are retried after `retry_interval`; an absent resource
/// ends the wait with [`Waited::Gone`] when absence is a target and with
/// [`WaitError::NotFound`] otherwise; any other error ends it immediately.
///
/// # Errors
///
/// Returns [`WaitError`] on a non-retryable error, deadline, or cancellation.
pub async fn wait_until<S, E, F, Fut>(
    spec: &WaitSpec<S>,
    mut poll: F,
) -> Result<Waited<S>, WaitError<E>>
where
    S: PartialEq + fmt::Debug,
    E: Classify + fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<S, E>>,
{
    let budget = &spec.budget;
    let mut last: Last<E> = Last::Nothing;
    let mut attempt: u32 = 0;
    loop {
        if budget.cancellation.is_cancelled() {
            return Err(WaitError::Cancelled);
        }
        if Instant::now() >= budget.deadline {
            return Err(last.expire());
        }
        attempt = attempt.saturating_add(1);
        let outcome = tokio::select! {
            biased;
            () = budget.cancellation.cancelled() => return Err(WaitError::Cancelled),
            () = sleep_until(budget.deadline) => return Err(last.expire()),
            outcome = poll() => outcome,
        };

        last = match outcome {
            Ok(state) if spec.targets.contains(&state) => {
                debug!(attempt, ?state, "wait reached target state");
                return Ok(Waited::Reached(state));
            }
            Ok(state) => {
                debug!(attempt, ?state, "still waiting");
                Last::State(format!("{state:?}"))
            }
            Err(error) => match error.class_in(budget.phase) {
                class if class.is_absent() && spec.accept_absent => {
                    debug!(attempt, "resource is gone");
                    return Ok(Waited::Gone);
                }
                class if class.is_absent() => return Err(WaitError::NotFound { error }),
                ErrorClass::Transient => {
                    debug!(attempt, %error, "transient error while waiting");
                    Last::Error(error)
                }
                class => return Err(WaitError::Failed { class, error }),
            },
        };
        last = pause(budget, last).await?;
    }
}

/// Calls `call` until it succeeds, retrying transient and
/// precondition-pending errors within the budget.
///
/// # Errors
///
/// Returns [`WaitError`] on a non-retryable error, an absent resource, an
/// exhausted budget, or cancellation.
pub async fn retry<T, E, F, Fut>(budget: &RetryBudget, mut call: F) -> Result<T, WaitError<E>>
where
    E: Classify + fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last: Last<E> = Last::Nothing;
    let mut attempt: u32 = 0;
    loop {
        if budget.cancellation.is_cancelled() {
            return Err(WaitError::Cancelled);
        }
        if Instant::now() >= budget.deadline {
            return Err(last.expire());
        }
        attempt = attempt.saturating_add(1);
        let outcome = tokio::select! {
            biased;
            () = budget.cancellation.cancelled() => return Err(WaitError::Cancelled),
            () = sleep_until(budget.deadline) => return Err(last.expire()),
            outcome = call() => outcome,
        };

        let error = match outcome {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        match error.class_in(budget.phase) {
            class if class.is_retryable() => {
                debug!(attempt, %error, %class, "retrying vendor call");
            }
            class if class.is_absent() => return Err(WaitError::NotFound { error }),
            class => return Err(WaitError::Failed { class, error }),
        }
        last = pause(budget, Last::Error(error)).await?;
    }
}
