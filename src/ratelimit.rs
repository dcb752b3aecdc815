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

//! Three-layer throttling for vendor REST APIs (GitHub/GitLab/Gitea and
//! friends): proactive request spacing, reactive `X-RateLimit-*`
//! tracking, and a retry policy for limit responses.

use std::{
    collections::HashMap,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use reqwest::{StatusCode, header::HeaderMap};
use tokio::sync::Mutex;

/// Kernel policy knobs.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Minimum spacing between completed requests per provider.
    pub between_requests:    Duration,
    pub max_retries:         u32,
    /// Fixed wait on secondary/abuse limits.
    pub secondary_rate_wait: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            between_requests:    Duration::from_secs(1),
            max_retries:         3,
            secondary_rate_wait: Duration::from_secs(60),
        }
    }
}

/// Last-seen quota of one provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaStatus {
    pub remaining: Option<u64>,
    pub limit:     Option<u64>,
    /// Epoch seconds at which the quota resets.
    pub reset_at:  Option<u64>,
}

/// What to do about a limited response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the given wait.
    After(Duration),
    /// Out of budget or not a limit response.
    GiveUp,
}

#[derive(Debug, Default)]
struct ProviderState {
    last_request: Option<Instant>,
    quota:        QuotaStatus,
}

/// The rate-limit kernel. One instance serves any number of providers,
/// each tracked by name.
pub struct RateLimitKernel {
    config:    RateLimitConfig,
    providers: Mutex<HashMap<String, ProviderState>>,
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

impl RateLimitKernel {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            providers: Mutex::new(HashMap::new()),
        }
    }

    /// Layer one: waits until the per-provider spacing since the last
    /// completed request has elapsed.
    pub async fn before_request(&self, provider: &str) {
        let wait = {
            let providers = self.providers.lock().await;
            providers
                .get(provider)
                .and_then(|state| state.last_request)
                .and_then(|at| self.config.between_requests.checked_sub(at.elapsed()))
        };
        if let Some(wait) = wait {
            tracing::trace!(provider = %provider, wait_ms = wait.as_millis() as u64, "Pacing request");
            tokio::time::sleep(wait).await;
        }
    }

    /// Layer two: records a completed response and its quota headers.
    pub async fn record_response(&self, provider: &str, headers: &HeaderMap) {
        let mut providers = self.providers.lock().await;
        let state = providers.entry(provider.to_owned()).or_default();
        state.last_request = Some(Instant::now());

        let quota = QuotaStatus {
            remaining: header_u64(headers, "x-ratelimit-remaining"),
            limit:     header_u64(headers, "x-ratelimit-limit"),
            reset_at:  header_u64(headers, "x-ratelimit-reset"),
        };
        if quota != QuotaStatus::default() {
            state.quota = quota;
        }
        if let Some(remaining) = quota.remaining
            && remaining == 0
        {
            tracing::warn!(provider = %provider, "Provider quota exhausted");
        }
    }

    /// The last-seen quota of a provider.
    pub async fn quota(&self, provider: &str) -> QuotaStatus {
        self.providers
            .lock()
            .await
            .get(provider)
            .map(|s| s.quota)
            .unwrap_or_default()
    }

    /// Layer three: classifies a response into a retry decision.
    /// `attempt` is 1-based; the budget is `max_retries`.
    pub async fn plan_retry(
        &self,
        provider: &str,
        attempt: u32,
        status: StatusCode,
        headers: &HeaderMap,
        body: &str,
    ) -> RetryDecision {
        if attempt > self.config.max_retries {
            return RetryDecision::GiveUp;
        }

        if status.is_server_error() {
            let wait = Duration::from_secs(2u64.saturating_pow(attempt).min(60));
            return RetryDecision::After(wait);
        }

        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            let lower = body.to_ascii_lowercase();
            if lower.contains("secondary rate limit") || lower.contains("abuse detection") {
                return RetryDecision::After(self.config.secondary_rate_wait);
            }
            if let Some(seconds) = header_u64(headers, "retry-after") {
                return RetryDecision::After(Duration::from_secs(seconds));
            }
            if lower.contains("rate limit exceeded") {
                let reset_at = header_u64(headers, "x-ratelimit-reset")
                    .or(self.quota(provider).await.reset_at)
                    .unwrap_or_else(epoch_secs);
                let wait = reset_at.saturating_sub(epoch_secs()) + 1;
                return RetryDecision::After(Duration::from_secs(wait));
            }
        }

        RetryDecision::GiveUp
    }
}

impl Default for RateLimitKernel {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::{HeaderName, HeaderValue};

    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                name.parse::<HeaderName>().unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    fn fast_kernel() -> RateLimitKernel {
        RateLimitKernel::new(RateLimitConfig {
            between_requests: Duration::from_millis(30),
            max_retries: 2,
            secondary_rate_wait: Duration::from_secs(7),
        })
    }

    #[tokio::test]
    async fn proactive_spacing_paces_requests() {
        let kernel = fast_kernel();
        kernel.before_request("github").await;
        kernel.record_response("github", &HeaderMap::new()).await;

        let start = Instant::now();
        kernel.before_request("github").await;
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn quota_headers_are_tracked_per_provider() {
        let kernel = fast_kernel();
        kernel
            .record_response(
                "github",
                &headers(&[
                    ("x-ratelimit-remaining", "41"),
                    ("x-ratelimit-limit", "60"),
                    ("x-ratelimit-reset", "1900000000"),
                ]),
            )
            .await;

        let quota = kernel.quota("github").await;
        assert_eq!(quota.remaining, Some(41));
        assert_eq!(quota.limit, Some(60));
        assert_eq!(quota.reset_at, Some(1_900_000_000));
        assert_eq!(kernel.quota("gitlab").await, QuotaStatus::default());
    }

    #[tokio::test]
    async fn server_errors_back_off_exponentially() {
        let kernel = fast_kernel();
        let empty = HeaderMap::new();
        assert_eq!(
            kernel
                .plan_retry("github", 1, StatusCode::BAD_GATEWAY, &empty, "")
                .await,
            RetryDecision::After(Duration::from_secs(2))
        );
        assert_eq!(
            kernel
                .plan_retry("github", 2, StatusCode::BAD_GATEWAY, &empty, "")
                .await,
            RetryDecision::After(Duration::from_secs(4))
        );
        assert_eq!(
            kernel
                .plan_retry("github", 3, StatusCode::BAD_GATEWAY, &empty, "")
                .await,
            RetryDecision::GiveUp
        );
    }

    #[tokio::test]
    async fn retry_after_header_is_honored() {
        let kernel = fast_kernel();
        let decision = kernel
            .plan_retry(
                "github",
                1,
                StatusCode::FORBIDDEN,
                &headers(&[("retry-after", "13")]),
                "",
            )
            .await;
        assert_eq!(decision, RetryDecision::After(Duration::from_secs(13)));
    }

    #[tokio::test]
    async fn primary_limit_waits_until_reset_plus_one() {
        let kernel = fast_kernel();
        let reset = epoch_secs() + 9;
        let decision = kernel
            .plan_retry(
                "github",
                1,
                StatusCode::FORBIDDEN,
                &headers(&[("x-ratelimit-reset", &reset.to_string())]),
                "API rate limit exceeded for user",
            )
            .await;
        let RetryDecision::After(wait) = decision else {
            panic!("expected a wait");
        };
        assert!(wait >= Duration::from_secs(9) && wait <= Duration::from_secs(11));
    }

    #[tokio::test]
    async fn secondary_limit_uses_the_fixed_wait() {
        let kernel = fast_kernel();
        let decision = kernel
            .plan_retry(
                "github",
                1,
                StatusCode::FORBIDDEN,
                &HeaderMap::new(),
                "You have exceeded a secondary rate limit",
            )
            .await;
        assert_eq!(decision, RetryDecision::After(Duration::from_secs(7)));
    }

    #[tokio::test]
    async fn plain_failures_are_not_retried() {
        let kernel = fast_kernel();
        assert_eq!(
            kernel
                .plan_retry("github", 1, StatusCode::NOT_FOUND, &HeaderMap::new(), "")
                .await,
            RetryDecision::GiveUp
        );
    }
}
