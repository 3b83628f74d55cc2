// ── Engine tuning knobs ──
//
// The embedding application constructs an `EngineConfig` and hands it in.
// The crate never reads config files or the environment.

use chrono::TimeDelta;
use std::time::Duration;

/// Tuning for the claim path and the dispatch pipeline.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Digits in a redemption token.
    pub token_length: usize,
    /// Fresh draws attempted when a token collides within an offer.
    pub token_retry_limit: u32,
    /// How long a reservation stays redeemable.
    pub claim_ttl: TimeDelta,
    /// Push notifications a single user may receive per calendar day.
    pub user_daily_cap: u32,
    /// Daily dispatch quota for free-tier venues.
    pub free_tier_daily: u32,
    /// Daily dispatch quota for basic-tier venues. Premium is unbounded.
    pub basic_tier_daily: u32,
    /// Messages per provider batch (provider hard limit).
    pub batch_size: usize,
    /// Batches in flight at once.
    pub dispatch_parallelism: usize,
    /// Wall-clock budget for one dispatch run.
    pub dispatch_budget: Duration,
    /// Timeout for a single provider call.
    pub provider_timeout: Duration,
    /// Ceiling on an offer's monetary claim value, in cents.
    pub max_value_cents: u64,
    /// Rows fetched per page when scanning the user directory.
    pub page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            token_length: 6,
            token_retry_limit: 5,
            claim_ttl: TimeDelta::hours(24),
            user_daily_cap: 3,
            free_tier_daily: 1,
            basic_tier_daily: 5,
            batch_size: 100,
            dispatch_parallelism: 4,
            dispatch_budget: Duration::from_secs(25),
            provider_timeout: Duration::from_secs(10),
            max_value_cents: 50_000,
            page_size: 500,
        }
    }
}
