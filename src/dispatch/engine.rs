//! Dispatch orchestration for offer-creation triggers
use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{info, warn};

use super::batcher::{DeliverySummary, DispatchBatcher, Recipient};
use super::prefs;
use super::provider::PushProvider;
use super::rate_limit::RateLimiter;
use super::selector;
use crate::config::EngineConfig;
use crate::error::DispatchError;
use crate::ledger::OFFERS_TREE;
use crate::offer::Offer;
use crate::stores::{DeviceTokenStore, PreferenceStore, UserDirectory, VenueDirectory};
use crate::time::TimeStamp;

pub(crate) const DISPATCH_TREE: &str = "dispatch";

/// How a dispatch run ended.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Pushes were sent (possibly partially, see the delivery numbers).
    #[n(0)]
    Completed,
    /// A marker from an earlier run was found; this delivery was a no-op.
    #[n(1)]
    AlreadyDispatched,
    /// The venue's daily quota was already exhausted.
    #[n(2)]
    VenueRateLimited,
    /// Targeting and filtering left nobody to notify.
    #[n(3)]
    NoRecipients,
}

/// Analytics summary returned to the trigger's caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSummary {
    pub offer_id: String,
    pub outcome: DispatchOutcome,
    /// Audience computed by targeting.
    pub candidates: usize,
    /// Left after preference, quiet-hours and user-cap filtering.
    pub eligible: usize,
    /// Candidates dropped by the per-user daily cap pre-check.
    pub user_capped: usize,
    pub delivery: DeliverySummary,
}

impl DispatchSummary {
    fn empty(offer_id: &str, outcome: DispatchOutcome) -> Self {
        Self {
            offer_id: offer_id.to_owned(),
            outcome,
            candidates: 0,
            eligible: 0,
            user_capped: 0,
            delivery: DeliverySummary::default(),
        }
    }
}

/// Persisted "dispatch already completed" marker.
#[derive(minicbor::Encode, minicbor::Decode, Debug)]
struct DispatchMarker {
    #[n(0)]
    offer_id: String,
    #[n(1)]
    completed_at: TimeStamp<Utc>,
    #[n(2)]
    outcome: DispatchOutcome,
    #[n(3)]
    attempted: u32,
    #[n(4)]
    delivered: u32,
}

pub struct NotificationDispatchEngine {
    offers: sled::Tree,
    markers: sled::Tree,
    limiter: RateLimiter,
    users: Arc<dyn UserDirectory>,
    venues: Arc<dyn VenueDirectory>,
    prefs: Arc<dyn PreferenceStore>,
    device_tokens: Arc<dyn DeviceTokenStore>,
    provider: Arc<dyn PushProvider>,
    config: EngineConfig,
}

impl NotificationDispatchEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: &Arc<sled::Db>,
        users: Arc<dyn UserDirectory>,
        venues: Arc<dyn VenueDirectory>,
        prefs: Arc<dyn PreferenceStore>,
        device_tokens: Arc<dyn DeviceTokenStore>,
        provider: Arc<dyn PushProvider>,
        config: EngineConfig,
    ) -> Result<Self, DispatchError> {
        Ok(Self {
            offers: db.open_tree(OFFERS_TREE)?,
            markers: db.open_tree(DISPATCH_TREE)?,
            limiter: RateLimiter::open(db, &config).map_err(codec_to_dispatch)?,
            users,
            venues,
            prefs,
            device_tokens,
            provider,
            config,
        })
    }

    /// Handle an offer-creation trigger. Idempotent per offer id:
    /// re-delivery after a completed run is a no-op.
    pub async fn dispatch_offer(&self, offer_id: &str) -> Result<DispatchSummary, DispatchError> {
        self.dispatch_offer_at(offer_id, TimeStamp::now()).await
    }

    pub async fn dispatch_offer_at(
        &self,
        offer_id: &str,
        now: TimeStamp<Utc>,
    ) -> Result<DispatchSummary, DispatchError> {
        if self.markers.get(offer_id.as_bytes())?.is_some() {
            info!(offer_id, "dispatch trigger re-delivered, marker found, skipping");
            return Ok(DispatchSummary::empty(
                offer_id,
                DispatchOutcome::AlreadyDispatched,
            ));
        }

        let offer = self.load_offer(offer_id)?;
        let venue = self
            .venues
            .venue(&offer.venue_id)
            .map_err(|e| DispatchError::Collaborator(e.to_string()))?
            .ok_or(DispatchError::UnknownVenue)?;

        let day = now.day();

        // venue-level admission, once per trigger, read-only
        if !self
            .limiter
            .check_venue(&venue.id, venue.tier, day)
            .map_err(codec_to_dispatch)?
        {
            info!(offer_id, venue_id = %venue.id, "venue daily quota exhausted, not dispatching");
            let summary = DispatchSummary::empty(offer_id, DispatchOutcome::VenueRateLimited);
            self.write_marker(&summary, now)?;
            return Ok(summary);
        }

        // targeting and filtering
        let candidates = selector::select(self.users.as_ref(), &offer, &venue, self.config.page_size)
            .map_err(|e| DispatchError::Collaborator(e.to_string()))?;
        let candidate_count = candidates.len();

        let after_prefs = prefs::filter(self.prefs.as_ref(), candidates, now);

        let mut user_capped = 0usize;
        let mut recipients = Vec::new();
        for user_id in after_prefs {
            if !self
                .limiter
                .check_user(&user_id, day)
                .map_err(codec_to_dispatch)?
            {
                user_capped += 1;
                continue;
            }
            let device_tokens = match self.device_tokens.active_tokens(&user_id) {
                Ok(tokens) => tokens,
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "device token read failed, skipping user");
                    continue;
                }
            };
            if device_tokens.is_empty() {
                continue;
            }
            recipients.push(Recipient {
                user_id,
                device_tokens,
            });
        }
        let eligible = recipients.len();

        if recipients.is_empty() {
            info!(offer_id, candidates = candidate_count, "nobody to notify");
            let mut summary = DispatchSummary::empty(offer_id, DispatchOutcome::NoRecipients);
            summary.candidates = candidate_count;
            summary.user_capped = user_capped;
            self.write_marker(&summary, now)?;
            return Ok(summary);
        }

        // delivery under the wall-clock budget
        let deadline = Instant::now() + self.config.dispatch_budget;
        let batcher = DispatchBatcher::new(
            self.provider.as_ref(),
            &self.limiter,
            &self.config,
            &offer,
            &venue,
            day,
        );
        let delivery = batcher.dispatch(recipients, deadline).await;

        for device_token in &delivery.invalid_tokens {
            if let Err(e) = self.device_tokens.mark_inactive(device_token) {
                warn!(device_token = %device_token, error = %e, "failed to deactivate device token");
            }
        }

        let summary = DispatchSummary {
            offer_id: offer_id.to_owned(),
            outcome: DispatchOutcome::Completed,
            candidates: candidate_count,
            eligible,
            user_capped,
            delivery,
        };
        self.write_marker(&summary, now)?;

        info!(
            offer_id,
            candidates = summary.candidates,
            eligible = summary.eligible,
            attempted = summary.delivery.attempted,
            delivered = summary.delivery.delivered,
            transient_failures = summary.delivery.transient_failures,
            invalid_tokens = summary.delivery.invalid_tokens.len(),
            skipped_past_deadline = summary.delivery.skipped_past_deadline,
            "dispatch run complete"
        );
        Ok(summary)
    }

    fn load_offer(&self, offer_id: &str) -> Result<Offer, DispatchError> {
        let raw = self
            .offers
            .get(offer_id.as_bytes())?
            .ok_or(DispatchError::UnknownOffer)?;
        Offer::from_cbor(&raw).map_err(|e| DispatchError::Codec(e.to_string()))
    }

    fn write_marker(
        &self,
        summary: &DispatchSummary,
        now: TimeStamp<Utc>,
    ) -> Result<(), DispatchError> {
        let marker = DispatchMarker {
            offer_id: summary.offer_id.clone(),
            completed_at: now,
            outcome: summary.outcome,
            attempted: summary.delivery.attempted as u32,
            delivered: summary.delivery.delivered as u32,
        };
        let cbor = minicbor::to_vec(&marker).map_err(|e| DispatchError::Codec(e.to_string()))?;
        self.markers.insert(summary.offer_id.as_bytes(), cbor)?;
        Ok(())
    }
}

fn codec_to_dispatch(e: crate::error::LedgerError) -> DispatchError {
    match e {
        crate::error::LedgerError::Storage(e) => DispatchError::Storage(e),
        crate::error::LedgerError::Codec(msg) => DispatchError::Codec(msg),
    }
}
