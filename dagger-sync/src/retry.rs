//! Bounded collaborator calls: per-call deadline, cancellation, and
//! fixed-delay retry with optional symmetric jitter.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::apply::Step;
use crate::error::ApplyError;

/// How many times to try, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub delay: Duration,
    /// Fraction of `delay` by which each wait may be shortened or lengthened.
    pub jitter: f64,
}

impl RetryPolicy {
    pub const fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            delay,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(self, jitter: f64) -> Self {
        Self { jitter, ..self }
    }

    /// The wait before the next attempt.
    pub fn next_delay(&self) -> Duration {
        if self.jitter <= 0.0 {
            return self.delay;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        self.delay.mul_f64(factor.max(0.0))
    }
}

/// Metadata purge after a stop: 5 attempts, 5 s apart.
pub const PURGE_RETRY: RetryPolicy = RetryPolicy::fixed(5, Duration::from_secs(5));

/// Unpause polling after an upload: 5 attempts, 60 s ± 10 % apart.
pub const UNPAUSE_RETRY: RetryPolicy = RetryPolicy {
    attempts: 5,
    delay: Duration::from_secs(60),
    jitter: 0.1,
};

/// Run one collaborator call under a deadline, aborting on cancellation.
///
/// The inner `Result` is the call's own outcome; the outer one reports a
/// timeout or cancellation.
pub async fn bounded<T, E, Fut>(
    step: Step,
    timeout: Duration,
    cancel: &CancellationToken,
    call: Fut,
) -> Result<Result<T, E>, ApplyError>
where
    Fut: Future<Output = Result<T, E>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ApplyError::Cancelled),
        res = tokio::time::timeout(timeout, call) => {
            res.map_err(|_| ApplyError::Timeout { step, after: timeout })
        }
    }
}

/// Retry `op` under `policy`. Each attempt is [`bounded`]; a timeout counts
/// as a failed attempt, cancellation ends the loop at once.
///
/// Returns the successful value and the attempt number that produced it.
pub async fn retry<T, E, F, Fut>(
    step: Step,
    policy: RetryPolicy,
    timeout: Duration,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<(T, u32), ApplyError>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.attempts.max(1);
    let mut last = String::new();
    for attempt in 1..=attempts {
        match bounded(step, timeout, cancel, op()).await {
            Ok(Ok(value)) => return Ok((value, attempt)),
            Ok(Err(err)) => last = err.to_string(),
            Err(ApplyError::Cancelled) => return Err(ApplyError::Cancelled),
            Err(err) => last = err.to_string(),
        }
        if attempt == attempts {
            break;
        }
        let wait = policy.next_delay();
        tracing::warn!(
            %step,
            attempt,
            of = attempts,
            wait_secs = wait.as_secs_f64(),
            error = %last,
            "attempt failed, retrying"
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ApplyError::Cancelled),
            _ = tokio::time::sleep(wait) => {}
        }
    }
    Err(ApplyError::RetriesExhausted {
        step,
        attempts,
        last,
    })
}
