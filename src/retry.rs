// gitmesh - A client-side runtime for decentralized Git collaboration over Nostr
// Copyright (C) 2025 Awiteb <a@4rs.nl>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://gnu.org/licenses/gpl-3.0.html>.

//! Retry and timeout wrappers around every network-bearing call. Retry
//! policy follows the error taxonomy: user-actionable errors surface
//! unchanged, retriable errors back off exponentially, fatal errors get
//! exactly one more chance.

use std::{future::Future, sync::Arc, time::Duration};

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorClass, GitMeshError, GitMeshResult};

/// Default timeout for plain network calls.
pub const NETWORK_TIMEOUT: Duration = Duration::from_secs(60);
/// Default timeout for initial clones.
pub const CLONE_TIMEOUT: Duration = Duration::from_secs(300);
/// Default timeout for fetches.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(120);
/// Default timeout for pushes.
pub const PUSH_TIMEOUT: Duration = Duration::from_secs(120);
/// Default timeout for local commits.
pub const COMMIT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default timeout for relay-hosted Git (GRASP) calls.
pub const GRASP_TIMEOUT: Duration = Duration::from_secs(90);

/// Callback invoked before each retry sleep.
pub type OnRetry = Arc<dyn Fn(u32, &GitMeshError, Duration) + Send + Sync>;
/// Per-call override of the class-based retry decision.
pub type ShouldRetry = Arc<dyn Fn(&GitMeshError) -> bool + Send + Sync>;

/// Options for [`with_retry`].
#[derive(Clone)]
pub struct RetryOptions {
    pub max_attempts:  u32,
    pub initial_delay: Duration,
    pub max_delay:     Duration,
    pub jitter:        bool,
    pub on_retry:      Option<OnRetry>,
    pub should_retry:  Option<ShouldRetry>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts:  3,
            initial_delay: Duration::from_millis(500),
            max_delay:     Duration::from_millis(2000),
            jitter:        true,
            on_retry:      None,
            should_retry:  None,
        }
    }
}

impl RetryOptions {
    /// The GRASP variant: relay-hosted Git endpoints are slower to settle,
    /// so delays run 50% longer.
    pub fn grasp() -> Self {
        let default = Self::default();
        Self {
            initial_delay: default.initial_delay * 3 / 2,
            max_delay: default.max_delay * 3 / 2,
            ..default
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_delay);
        if self.jitter {
            exponential.mul_f64(rand::thread_rng().gen_range(0.75..=1.25))
        } else {
            exponential
        }
    }

    fn wants_retry(&self, error: &GitMeshError, attempt: u32) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        if let Some(should_retry) = &self.should_retry {
            return should_retry(error);
        }
        match error.class() {
            ErrorClass::UserActionable => false,
            ErrorClass::Retriable => true,
            // One more chance, never a second.
            ErrorClass::Fatal => attempt < 2,
        }
    }
}

/// Runs `op` until it succeeds or the retry budget runs out. The operation
/// receives the 1-based attempt number.
pub async fn with_retry<T, F, Fut>(opts: &RetryOptions, op: F) -> GitMeshResult<T>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = GitMeshResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !opts.wants_retry(&error, attempt) {
                    return Err(error);
                }
                let delay = opts.delay_for(attempt);
                tracing::debug!(
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying after error"
                );
                if let Some(on_retry) = &opts.on_retry {
                    on_retry(attempt, &error, delay);
                }
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Options for [`with_timeout`].
#[derive(Debug, Clone)]
pub struct TimeoutOptions {
    /// Operation name carried into `TIMEOUT` errors.
    pub operation: String,
    pub timeout:   Duration,
    /// Caller-provided cancellation, combined with the internal deadline.
    pub cancel:    Option<CancellationToken>,
}

impl TimeoutOptions {
    pub fn new(operation: impl Into<String>, timeout: Duration) -> Self {
        Self {
            operation: operation.into(),
            timeout,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Returns a token that cancels as soon as either input token cancels.
/// Already-cancelled inputs short-circuit without spawning a watcher.
pub fn combine_tokens(first: &CancellationToken, second: &CancellationToken) -> CancellationToken {
    let combined = CancellationToken::new();
    if first.is_cancelled() || second.is_cancelled() {
        combined.cancel();
        return combined;
    }
    let first = first.clone();
    let second = second.clone();
    let inner = combined.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = first.cancelled() => {}
            _ = second.cancelled() => {}
        }
        inner.cancel();
    });
    combined
}

/// Runs `op` under a deadline. The operation receives a combined token
/// (caller cancellation + internal deadline) and must honor it at every
/// suspension point. A deadline abort surfaces `TIMEOUT`; a caller abort
/// surfaces `OPERATION_ABORTED`; other errors pass through unchanged.
pub async fn with_timeout<T, F, Fut>(opts: TimeoutOptions, op: F) -> GitMeshResult<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = GitMeshResult<T>>,
{
    let external = opts.cancel.unwrap_or_default();
    if external.is_cancelled() {
        return Err(GitMeshError::OperationAborted);
    }

    let internal = CancellationToken::new();
    let combined = combine_tokens(&external, &internal);

    tokio::select! {
        biased;
        _ = external.cancelled() => Err(GitMeshError::OperationAborted),
        result = op(combined) => result,
        _ = tokio::time::sleep(opts.timeout) => {
            internal.cancel();
            Err(GitMeshError::Timeout {
                operation:  opts.operation,
                elapsed_ms: opts.timeout.as_millis() as u64,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;

    fn network_error() -> GitMeshError {
        GitMeshError::network("test", "connection reset")
    }

    #[tokio::test]
    async fn retriable_errors_use_the_whole_budget() {
        let calls = AtomicU32::new(0);
        let opts = RetryOptions {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
            jitter: false,
            ..Default::default()
        };
        let result: GitMeshResult<()> = with_retry(&opts, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(network_error()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn user_actionable_errors_run_once() {
        let calls = AtomicU32::new(0);
        let opts = RetryOptions {
            initial_delay: Duration::from_millis(1),
            jitter: false,
            ..Default::default()
        };
        let result: GitMeshResult<()> = with_retry(&opts, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(GitMeshError::AuthRequired {
                    url: "https://example.com".to_owned(),
                })
            }
        })
        .await;

        assert_eq!(result.unwrap_err().code(), "AUTH_REQUIRED");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fatal_errors_retry_exactly_once() {
        let calls = AtomicU32::new(0);
        let opts = RetryOptions {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1),
            jitter: false,
            ..Default::default()
        };
        let result: GitMeshResult<()> = with_retry(&opts, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(GitMeshError::CorruptPack {
                    url: "https://example.com/repo.git".to_owned(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exponential_delays_without_jitter() {
        let delays: Arc<Mutex<Vec<Duration>>> = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&delays);
        let opts = RetryOptions {
            max_attempts: 4,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(2000),
            jitter: false,
            on_retry: Some(Arc::new(move |_attempt, _error, delay| {
                recorded.lock().unwrap().push(delay);
            })),
            ..Default::default()
        };
        let result = with_retry(&opts, |attempt| {
            async move {
                if attempt < 4 {
                    Err(network_error())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 4);
        assert_eq!(
            *delays.lock().unwrap(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
            ]
        );
    }

    #[tokio::test]
    async fn should_retry_override_wins() {
        let calls = AtomicU32::new(0);
        let opts = RetryOptions {
            initial_delay: Duration::from_millis(1),
            jitter: false,
            should_retry: Some(Arc::new(|_| false)),
            ..Default::default()
        };
        let result: GitMeshResult<()> = with_retry(&opts, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(network_error()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn grasp_variant_stretches_delays() {
        let opts = RetryOptions::grasp();
        assert_eq!(opts.initial_delay, Duration::from_millis(750));
        assert_eq!(opts.max_delay, Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn deadline_abort_is_a_timeout() {
        let result: GitMeshResult<()> = with_timeout(
            TimeoutOptions::new("sleepy", Duration::from_millis(50)),
            |_token| {
                async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok(())
                }
            },
        )
        .await;
        assert_eq!(result.unwrap_err().code(), "TIMEOUT");
    }

    #[tokio::test]
    async fn pre_aborted_signal_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        let result: GitMeshResult<()> = with_timeout(
            TimeoutOptions::new("sleepy", Duration::from_millis(50)).with_cancel(token),
            |_token| async { Ok(()) },
        )
        .await;
        assert_eq!(result.unwrap_err().code(), "OPERATION_ABORTED");
    }

    #[tokio::test]
    async fn external_abort_mid_flight() {
        let token = CancellationToken::new();
        let aborter = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            aborter.cancel();
        });
        let result: GitMeshResult<()> = with_timeout(
            TimeoutOptions::new("sleepy", Duration::from_millis(500)).with_cancel(token),
            |_token| {
                async {
                    tokio::time::sleep(Duration::from_millis(400)).await;
                    Ok(())
                }
            },
        )
        .await;
        assert_eq!(result.unwrap_err().code(), "OPERATION_ABORTED");
    }

    #[tokio::test]
    async fn combined_token_fires_on_either_input() {
        let first = CancellationToken::new();
        let second = CancellationToken::new();
        let combined = combine_tokens(&first, &second);
        assert!(!combined.is_cancelled());

        second.cancel();
        tokio::time::timeout(Duration::from_millis(100), combined.cancelled())
            .await
            .expect("combined token cancels when an input cancels");
    }

    #[tokio::test]
    async fn operation_errors_pass_through() {
        let result: GitMeshResult<()> = with_timeout(
            TimeoutOptions::new("failing", Duration::from_millis(100)),
            |_token| async { Err(GitMeshError::not_found("thing")) },
        )
        .await;
        assert_eq!(result.unwrap_err().code(), "NOT_FOUND");
    }
}
