//! Orchestrator configuration.
//!
//! All tunables live here and are injected into the components that use
//! them; nothing in the crate reads configuration from globals.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::queue::Tier;

/// Configuration for the whole orchestration engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Number of workers pulling jobs from the queue.
    pub worker_count: usize,
    /// Maximum steps running concurrently within one build.
    pub max_concurrency: usize,
    /// Maximum queued-or-active jobs per tenant.
    pub tenant_quota: usize,
    /// Queue-wide dequeue rate limit (dequeues per minute).
    pub dequeues_per_minute: u32,
    /// Retry policy for failed jobs.
    pub retry: RetryConfig,
    /// Artifact cache TTL in seconds.
    pub cache_ttl_seconds: u64,
    /// Per-tier wall-clock budget hint passed to step implementations.
    /// The scheduler itself has no wall-clock budget.
    pub tier_timeout_seconds: u64,
    /// How long terminal jobs and their build records stay queryable
    /// before a purge sweep may drop them.
    pub retention_seconds: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            max_concurrency: 4,
            tenant_quota: 2,
            dequeues_per_minute: 5,
            retry: RetryConfig::default(),
            cache_ttl_seconds: 3600,
            tier_timeout_seconds: 1800,
            retention_seconds: 86_400,
        }
    }
}

impl OrchestratorConfig {
    /// Creates a config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker count.
    #[must_use]
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    /// Sets the intra-build step concurrency bound.
    #[must_use]
    pub fn with_max_concurrency(mut self, bound: usize) -> Self {
        self.max_concurrency = bound.max(1);
        self
    }

    /// Sets the per-tenant quota.
    #[must_use]
    pub fn with_tenant_quota(mut self, quota: usize) -> Self {
        self.tenant_quota = quota;
        self
    }

    /// Sets the dequeue rate limit.
    #[must_use]
    pub fn with_dequeues_per_minute(mut self, rate: u32) -> Self {
        self.dequeues_per_minute = rate;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the artifact cache TTL.
    #[must_use]
    pub fn with_cache_ttl_seconds(mut self, ttl: u64) -> Self {
        self.cache_ttl_seconds = ttl;
        self
    }

    /// Sets the retention window for terminal jobs and build records.
    #[must_use]
    pub fn with_retention_seconds(mut self, retention: u64) -> Self {
        self.retention_seconds = retention;
        self
    }

    /// Wall-clock budget hint for a tier. Premium builds get the full
    /// budget, standard half, free a quarter.
    #[must_use]
    pub fn timeout_for_tier(&self, tier: Tier) -> Duration {
        let secs = match tier {
            Tier::Premium => self.tier_timeout_seconds,
            Tier::Standard => self.tier_timeout_seconds / 2,
            Tier::Free => self.tier_timeout_seconds / 4,
        };
        Duration::from_secs(secs.max(1))
    }
}

/// Retry policy applied by the job queue to failed jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts before a job is dead-lettered.
    pub max_attempts: u32,
    /// Base delay between retries in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds. `None` leaves the exponential
    /// backoff uncapped.
    pub max_delay_ms: Option<u64>,
    /// Whether to apply full jitter to the computed delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 5000,
            max_delay_ms: Some(300_000),
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Creates a retry config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = Some(delay);
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Computes the backoff delay for a given attempt count.
    ///
    /// `delay = base * 2^attempts`, capped at `max_delay_ms` when set.
    /// Full jitter, when enabled, draws uniformly from `0..=delay`.
    #[must_use]
    pub fn backoff_for_attempt(&self, attempts: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempts));
        let capped = match self.max_delay_ms {
            Some(max) => exp.min(max),
            None => exp,
        };

        let delay = if self.jitter && capped > 0 {
            use rand::Rng;
            rand::thread_rng().gen_range(0..=capped)
        } else {
            capped
        };

        Duration::from_millis(delay)
    }
}
