//! Fixed-window request quotas per user level and model prefix.
//!
//! The limiter resolves the longest-prefix [`QuotaRule`] for the caller's level, derives the
//! current window bucket and atomically increments a counter in a shared [`CounterStore`].
//! Counters are ephemeral: the first increment of a bucket sets an expiry of one window plus
//! a small grace period.
//!
//! Quota enforcement fails open. If the rules cannot be read or the counter store cannot be
//! reached the request is admitted and the failure is logged and counted, so an outage of
//! the metering infrastructure never blocks traffic.

use crate::catalog::Catalog;
use crate::config::QuotaConfig;
use crate::cost::longest_prefix_match;
use crate::db::models::rules::QuotaRule;
use crate::metrics::{QUOTA_DENIED_TOTAL, QUOTA_STORE_ERRORS_TOTAL};
use crate::types::{Level, UserId};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

pub mod in_memory;
pub mod redis_store;

pub use in_memory::InMemoryCounterStore;
pub use redis_store::RedisCounterStore;

/// Windows of at least this length are shifted by the configured timezone offset.
const DAY_SECONDS: i64 = 86_400;

#[derive(Debug, Error)]
pub enum CounterStoreError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("counter store did not answer within {0:?}")]
    Timeout(Duration),
}

/// Shared counter service used for quota windows.
#[async_trait::async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key` and return the new value. When the increment creates the
    /// key, its expiry is set to `ttl` in the same atomic step.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, CounterStoreError>;
}

/// Why a request was refused, returned to the caller in the 429 body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaDenial {
    pub model_pattern: String,
    pub max_requests: i64,
    pub window_seconds: i64,
    /// Counter value after this request's increment
    pub count: i64,
    /// Time until the current window closes
    pub retry_after: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied(QuotaDenial),
}

/// Position of an instant within a fixed window sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindow {
    pub bucket: i64,
    pub remaining: Duration,
}

impl FixedWindow {
    /// Locate `now` (unix seconds) in windows of `window_seconds`. Day-or-longer windows are
    /// shifted by `timezone_offset_seconds` so they begin at local midnight.
    pub fn locate(now: i64, window_seconds: i64, timezone_offset_seconds: i64) -> Self {
        let adjusted = if window_seconds >= DAY_SECONDS {
            now + timezone_offset_seconds
        } else {
            now
        };
        let elapsed = adjusted.rem_euclid(window_seconds);
        Self {
            bucket: adjusted.div_euclid(window_seconds),
            remaining: Duration::from_secs((window_seconds - elapsed) as u64),
        }
    }
}

/// Longest-prefix quota rule among the enforceable rules of one level.
///
/// Rules with a non-positive ceiling or window are skipped as if absent.
pub fn select_quota_rule<'a>(model: &str, rules: &'a [QuotaRule]) -> Option<&'a QuotaRule> {
    let enforceable: Vec<&QuotaRule> = rules.iter().filter(|r| r.is_enforceable()).collect();
    longest_prefix_match(model, &enforceable, |r| r.model_pattern.as_str()).copied()
}

pub fn counter_key(user_id: UserId, level: Level, model_pattern: &str, bucket: i64) -> String {
    format!("quota:{user_id}:{level}:{model_pattern}:{bucket}")
}

pub struct QuotaLimiter {
    catalog: Arc<dyn Catalog>,
    counters: Option<Arc<dyn CounterStore>>,
    timezone_offset_seconds: i64,
    expiry_grace: Duration,
}

impl QuotaLimiter {
    /// Without a counter store every request is admitted.
    pub fn new(catalog: Arc<dyn Catalog>, counters: Option<Arc<dyn CounterStore>>, config: &QuotaConfig) -> Self {
        Self {
            catalog,
            counters,
            timezone_offset_seconds: config.timezone_offset_seconds,
            expiry_grace: config.expiry_grace,
        }
    }

    pub async fn admit(&self, user_id: UserId, level: Level, model: &str) -> Admission {
        self.admit_at(user_id, level, model, Utc::now()).await
    }

    #[instrument(skip(self, now))]
    pub async fn admit_at(&self, user_id: UserId, level: Level, model: &str, now: DateTime<Utc>) -> Admission {
        let Some(counters) = self.counters.as_ref() else {
            return Admission::Allowed;
        };

        let rules = match self.catalog.quota_rules(level).await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(error = %e, "Failed to load quota rules, admitting request");
                metrics::counter!(QUOTA_STORE_ERRORS_TOTAL, "source" => "rules").increment(1);
                return Admission::Allowed;
            }
        };

        let Some(rule) = select_quota_rule(model, &rules) else {
            return Admission::Allowed;
        };

        let window = FixedWindow::locate(now.timestamp(), rule.window_seconds, self.timezone_offset_seconds);
        let key = counter_key(user_id, level, &rule.model_pattern, window.bucket);
        let ttl = Duration::from_secs(rule.window_seconds as u64) + self.expiry_grace;

        let count = match counters.incr_with_expiry(&key, ttl).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, key = %key, "Quota counter store unavailable, admitting request");
                metrics::counter!(QUOTA_STORE_ERRORS_TOTAL, "source" => "counter").increment(1);
                return Admission::Allowed;
            }
        };

        if count > rule.max_requests {
            debug!(count, max_requests = rule.max_requests, pattern = %rule.model_pattern, "Quota exceeded");
            metrics::counter!(QUOTA_DENIED_TOTAL).increment(1);
            return Admission::Denied(QuotaDenial {
                model_pattern: rule.model_pattern.clone(),
                max_requests: rule.max_requests,
                window_seconds: rule.window_seconds,
                count,
                retry_after: window.remaining,
            });
        }

        Admission::Allowed
    }
}
