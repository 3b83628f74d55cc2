//! Day-keyed send quotas
//!
//! Counters live in their own tree, keyed by `(venue|user, id, day)`, so a
//! new calendar day starts from zero without any reset pass. `check_*` is
//! a read; quota is consumed by `commit_*` only once the corresponding
//! send is actually queued. The commit is a conditional atomic increment,
//! so once a counter reaches its ceiling no later commit within that day
//! can slip past it.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::config::EngineConfig;
use crate::error::LedgerError;
use crate::stores::VenueTier;

pub(crate) const RATE_TREE: &str = "rate";

fn counter_key(scope: &str, id: &str, day: NaiveDate) -> Vec<u8> {
    format!("{scope}:{id}:{}", day.format("%Y-%m-%d")).into_bytes()
}

fn decode_count(raw: Option<&[u8]>) -> u32 {
    raw.and_then(|b| b.try_into().ok())
        .map(u32::from_be_bytes)
        .unwrap_or(0)
}

pub struct RateLimiter {
    counters: sled::Tree,
    user_daily_cap: u32,
    free_tier_daily: u32,
    basic_tier_daily: u32,
}

impl RateLimiter {
    pub fn open(db: &Arc<sled::Db>, config: &EngineConfig) -> Result<Self, LedgerError> {
        Ok(Self {
            counters: db.open_tree(RATE_TREE)?,
            user_daily_cap: config.user_daily_cap,
            free_tier_daily: config.free_tier_daily,
            basic_tier_daily: config.basic_tier_daily,
        })
    }

    fn venue_ceiling(&self, tier: VenueTier) -> Option<u32> {
        match tier {
            VenueTier::Free => Some(self.free_tier_daily),
            VenueTier::Basic => Some(self.basic_tier_daily),
            VenueTier::Premium => None,
        }
    }

    /// Would a venue dispatch be admitted today? Read-only.
    pub fn check_venue(
        &self,
        venue_id: &str,
        tier: VenueTier,
        day: NaiveDate,
    ) -> Result<bool, LedgerError> {
        let Some(ceiling) = self.venue_ceiling(tier) else {
            return Ok(true);
        };
        let raw = self.counters.get(counter_key("venue", venue_id, day))?;
        Ok(decode_count(raw.as_deref()) < ceiling)
    }

    /// Would a user notification be admitted today? Read-only.
    pub fn check_user(&self, user_id: &str, day: NaiveDate) -> Result<bool, LedgerError> {
        let raw = self.counters.get(counter_key("user", user_id, day))?;
        Ok(decode_count(raw.as_deref()) < self.user_daily_cap)
    }

    /// Consume one unit of the venue's daily quota. Returns `false`
    /// without incrementing when the ceiling was already reached.
    pub fn commit_venue(
        &self,
        venue_id: &str,
        tier: VenueTier,
        day: NaiveDate,
    ) -> Result<bool, LedgerError> {
        match self.venue_ceiling(tier) {
            Some(ceiling) => self.conditional_increment(counter_key("venue", venue_id, day), ceiling),
            None => Ok(true),
        }
    }

    /// Consume one unit of the user's daily cap.
    pub fn commit_user(&self, user_id: &str, day: NaiveDate) -> Result<bool, LedgerError> {
        self.conditional_increment(counter_key("user", user_id, day), self.user_daily_cap)
    }

    fn conditional_increment(&self, key: Vec<u8>, ceiling: u32) -> Result<bool, LedgerError> {
        let previous = self.counters.fetch_and_update(key, |old| {
            let current = decode_count(old);
            if current >= ceiling {
                // refuse: leave the stored value untouched
                old.map(<[u8]>::to_vec)
            } else {
                Some((current + 1).to_be_bytes().to_vec())
            }
        })?;

        Ok(decode_count(previous.as_deref()) < ceiling)
    }
}
