//! Service layer API for the claim workflow
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::claim::{Claim, ClaimStatus};
use super::config::EngineConfig;
use super::eligibility::{self, ClaimantState, Eligibility};
use super::error::{ClaimError, LedgerError};
use super::ledger::{ClaimLedger, ReserveOutcome, ReserveReject};
use super::offer::{Offer, OfferDetails};
use super::stores::UserDirectory;
use super::time::TimeStamp;
use super::token::TokenIssuer;

/// Returned to the client on a successful claim.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimReceipt {
    pub claim_id: String,
    pub token: String,
    pub expires_at: TimeStamp<Utc>,
}

pub struct ClaimService {
    ledger: ClaimLedger,
    issuer: TokenIssuer,
    users: Arc<dyn UserDirectory>,
    config: EngineConfig,
}

impl ClaimService {
    pub fn new(
        db: &Arc<sled::Db>,
        users: Arc<dyn UserDirectory>,
        config: EngineConfig,
    ) -> anyhow::Result<Self> {
        let ledger = ClaimLedger::open(db)?;
        let issuer = TokenIssuer::new(config.token_length);
        Ok(Self {
            ledger,
            issuer,
            users,
            config,
        })
    }

    /// Validate and persist a new offer on behalf of the venue actor.
    pub fn publish_offer(&self, details: OfferDetails) -> anyhow::Result<Offer> {
        let offer = details.validate_and_finalise(self.config.max_value_cents)?;
        self.ledger.insert_offer(&offer)?;

        info!(offer_id = %offer.id, venue_id = %offer.venue_id, max_claims = offer.max_claims, "offer published");
        Ok(offer)
    }

    /// Read-only offer snapshot for the client card.
    pub fn load_offer(&self, offer_id: &str) -> Result<Option<Offer>, ClaimError> {
        self.ledger.load_offer(offer_id).map_err(into_unavailable)
    }

    /// Claim an offer for a user.
    pub fn claim(&self, offer_id: &str, user_id: &str) -> Result<ClaimReceipt, ClaimError> {
        self.claim_at(offer_id, user_id, TimeStamp::now())
    }

    /// Claim at an explicit instant. Orchestration: advisory eligibility
    /// fast-fail, atomic ledger reservation, token issuance with collision
    /// retry, then the finalised claim row.
    pub fn claim_at(
        &self,
        offer_id: &str,
        user_id: &str,
        now: TimeStamp<Utc>,
    ) -> Result<ClaimReceipt, ClaimError> {
        // Load offer snapshot
        let offer = self
            .ledger
            .load_offer(offer_id)
            .map_err(into_unavailable)?
            .ok_or(ClaimError::UnknownOffer)?;

        // Advisory pre-check, no ledger write
        let claimant = self.claimant_state(offer_id, user_id)?;
        let verdict = eligibility::evaluate(&offer, &claimant, now);
        if let Some(rejection) = verdict.rejection() {
            debug!(offer_id, user_id, ?verdict, "claim rejected by pre-check");
            return Err(rejection);
        }

        // Atomic reserve-or-reject
        let expires_at = now.offset(self.config.claim_ttl);
        match self
            .ledger
            .reserve(offer_id, user_id, now, expires_at)
            .map_err(into_unavailable)?
        {
            ReserveOutcome::Reserved(_) => {}
            ReserveOutcome::Rejected(ReserveReject::DuplicateClaim) => {
                return Err(ClaimError::AlreadyClaimed);
            }
            ReserveOutcome::Rejected(ReserveReject::CapacityExceeded) => {
                // the advisory check passed moments ago: a concurrent
                // claimer took the last slot. Logged distinctly so capacity
                // races stay auditable.
                warn!(offer_id, user_id, "capacity race: advisory check passed, ledger refused");
                return Err(ClaimError::CapacityExceeded);
            }
            ReserveOutcome::Rejected(ReserveReject::UnknownOffer) => {
                return Err(ClaimError::UnknownOffer);
            }
        }

        // Token issuance, bounded collision retry
        let token = self.issue_unique_token(offer_id, user_id)?;
        let Some(token) = token else {
            // the one explicit two-phase rollback: hand the slot back
            // before reporting failure
            self.ledger.release(offer_id, user_id).map_err(|e| {
                warn!(offer_id, user_id, error = %e, "rollback of reservation failed");
                ClaimError::Unavailable
            })?;
            warn!(offer_id, user_id, retries = self.config.token_retry_limit, "token space exhausted, reservation released");
            return Err(ClaimError::Unavailable);
        };

        // Persist the finalised claim
        let claim = match self.ledger.finalise(offer_id, user_id, &token) {
            Ok(claim) => claim,
            Err(e) => {
                warn!(offer_id, user_id, error = %e, "finalise failed, rolling back");
                let _ = self.ledger.unindex_token(offer_id, &token);
                let _ = self.ledger.release(offer_id, user_id);
                return Err(ClaimError::Unavailable);
            }
        };

        info!(offer_id, user_id, claim_id = %claim.id, "claim reserved");
        Ok(ClaimReceipt {
            claim_id: claim.id,
            token,
            expires_at,
        })
    }

    /// Venue-side redemption: look the token up within the offer's claim
    /// set and move the claim to `Redeemed`.
    pub fn redeem(&self, offer_id: &str, token: &str) -> Result<Claim, ClaimError> {
        self.redeem_at(offer_id, token, TimeStamp::now())
    }

    pub fn redeem_at(
        &self,
        offer_id: &str,
        token: &str,
        now: TimeStamp<Utc>,
    ) -> Result<Claim, ClaimError> {
        let holder = self
            .ledger
            .token_holder(offer_id, token)
            .map_err(into_unavailable)?
            .ok_or(ClaimError::UnknownToken)?;

        let mut claim = self
            .ledger
            .load_claim(offer_id, &holder)
            .map_err(into_unavailable)?
            .ok_or(ClaimError::UnknownToken)?;

        match claim.status {
            ClaimStatus::Redeemed => return Err(ClaimError::AlreadyRedeemed),
            ClaimStatus::Expired => return Err(ClaimError::ClaimExpired),
            ClaimStatus::Reserved => {}
        }
        if !claim.is_redeemable(now) {
            return Err(ClaimError::ClaimExpired);
        }

        claim.status = ClaimStatus::Redeemed;
        claim.redeemed_at = Some(now);
        self.ledger.put_claim(&claim).map_err(into_unavailable)?;

        info!(offer_id, user_id = %claim.user_id, claim_id = %claim.id, "claim redeemed");
        Ok(claim)
    }

    /// Current claim state for (offer, user). Clients re-query this after
    /// a timeout or screen refocus instead of re-submitting.
    pub fn claim_status(&self, offer_id: &str, user_id: &str) -> Result<Option<Claim>, ClaimError> {
        self.ledger
            .load_claim(offer_id, user_id)
            .map_err(into_unavailable)
    }

    /// Background expiry sweep: `Reserved -> Expired` for claims past
    /// their expiry. Returns how many claims were transitioned.
    pub fn sweep_expired(&self, now: TimeStamp<Utc>) -> anyhow::Result<usize> {
        let mut expired = 0;

        let due: Vec<Claim> = self
            .ledger
            .scan_claims()
            .collect::<Result<Vec<_>, LedgerError>>()?
            .into_iter()
            .filter(|c| c.status == ClaimStatus::Reserved && c.expires_at <= now)
            .collect();

        for mut claim in due {
            claim.status = ClaimStatus::Expired;
            self.ledger.put_claim(&claim)?;
            expired += 1;
        }

        if expired > 0 {
            info!(expired, "expiry sweep transitioned claims");
        }
        Ok(expired)
    }

    fn claimant_state(&self, offer_id: &str, user_id: &str) -> Result<ClaimantState, ClaimError> {
        let checked_in_venue = self
            .users
            .user(user_id)
            .map_err(|e| {
                warn!(user_id, error = %e, "user directory read failed");
                ClaimError::Unavailable
            })?
            .and_then(|u| u.checked_in_venue);

        let has_existing_claim = self
            .ledger
            .load_claim(offer_id, user_id)
            .map_err(into_unavailable)?
            .is_some();

        Ok(ClaimantState {
            checked_in_venue,
            has_existing_claim,
        })
    }

    /// Draw tokens until one is unique within the offer, bounded by the
    /// configured retry limit. `Ok(None)` means the space is exhausted.
    fn issue_unique_token(
        &self,
        offer_id: &str,
        user_id: &str,
    ) -> Result<Option<String>, ClaimError> {
        for attempt in 0..self.config.token_retry_limit {
            let candidate = self.issuer.issue().map_err(|e| {
                warn!(offer_id, error = %e, "token draw failed");
                ClaimError::Unavailable
            })?;

            if self
                .ledger
                .try_index_token(offer_id, &candidate, user_id)
                .map_err(into_unavailable)?
            {
                return Ok(Some(candidate));
            }
            debug!(offer_id, attempt, "token collision, redrawing");
        }
        Ok(None)
    }

    // the advisory check needs Eligibility exposed for UI pre-checks
    pub fn precheck(
        &self,
        offer_id: &str,
        user_id: &str,
        now: TimeStamp<Utc>,
    ) -> Result<Eligibility, ClaimError> {
        let offer = self
            .ledger
            .load_offer(offer_id)
            .map_err(into_unavailable)?
            .ok_or(ClaimError::UnknownOffer)?;
        let claimant = self.claimant_state(offer_id, user_id)?;
        Ok(eligibility::evaluate(&offer, &claimant, now))
    }
}

/// Ledger/storage failures fail closed: the claim is rejected, never
/// optimistically granted. Detail goes to the log, not the client.
fn into_unavailable(e: LedgerError) -> ClaimError {
    warn!(error = %e, "ledger unavailable");
    ClaimError::Unavailable
}
