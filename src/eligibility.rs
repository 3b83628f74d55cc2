//! Advisory eligibility check for the claim path
//!
//! Pure and side-effect free. The capacity comparison here reads a
//! possibly stale snapshot and exists only to fail fast for the client;
//! the ledger transaction is the sole enforcement of the capacity
//! invariant.

use chrono::Utc;

use super::error::ClaimError;
use super::offer::Offer;
use super::time::TimeStamp;

/// What the evaluator needs to know about the claimant.
#[derive(Debug, Clone, Default)]
pub struct ClaimantState {
    /// Venue the user is currently checked in at, if any.
    pub checked_in_venue: Option<String>,
    /// Whether a claim row already exists for (offer, user).
    pub has_existing_claim: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    NotCheckedIn,
    OfferExpired,
    OfferFull,
    AlreadyClaimed,
}

/// Checks run in order, short-circuiting on the first failure: window,
/// capacity snapshot, prior claim, check-in.
pub fn evaluate(offer: &Offer, claimant: &ClaimantState, now: TimeStamp<Utc>) -> Eligibility {
    if !offer.window_contains(now) {
        return Eligibility::OfferExpired;
    }
    if !offer.capacity_remaining() {
        return Eligibility::OfferFull;
    }
    if claimant.has_existing_claim {
        return Eligibility::AlreadyClaimed;
    }
    if claimant.checked_in_venue.as_deref() != Some(offer.venue_id.as_str()) {
        return Eligibility::NotCheckedIn;
    }

    Eligibility::Eligible
}

impl Eligibility {
    /// `None` for `Eligible`, otherwise the client-facing rejection.
    pub fn rejection(self) -> Option<ClaimError> {
        match self {
            Eligibility::Eligible => None,
            Eligibility::NotCheckedIn => Some(ClaimError::NotCheckedIn),
            Eligibility::OfferExpired => Some(ClaimError::OfferExpired),
            Eligibility::OfferFull => Some(ClaimError::OfferFull),
            Eligibility::AlreadyClaimed => Some(ClaimError::AlreadyClaimed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offer::OfferDetails;

    fn offer() -> Offer {
        OfferDetails::new()
            .set_venue("venue_a")
            .set_title("Happy hour wings")
            .set_max_claims(2)
            .set_window(
                TimeStamp::new_with(2026, 3, 1, 16, 0, 0),
                TimeStamp::new_with(2026, 3, 1, 19, 0, 0),
            )
            .set_radius_m(500)
            .validate_and_finalise(50_000)
            .unwrap()
    }

    fn checked_in() -> ClaimantState {
        ClaimantState {
            checked_in_venue: Some("venue_a".into()),
            has_existing_claim: false,
        }
    }

    #[test]
    fn happy_path_is_eligible() {
        let now = TimeStamp::new_with(2026, 3, 1, 17, 0, 0);
        assert_eq!(evaluate(&offer(), &checked_in(), now), Eligibility::Eligible);
    }

    #[test]
    fn window_check_comes_first() {
        // expired AND full AND already claimed: window failure wins
        let mut offer = offer();
        offer.claimed_count = offer.max_claims;
        let claimant = ClaimantState {
            checked_in_venue: None,
            has_existing_claim: true,
        };

        let late = TimeStamp::new_with(2026, 3, 1, 20, 0, 0);
        assert_eq!(evaluate(&offer, &claimant, late), Eligibility::OfferExpired);
    }

    #[test]
    fn full_snapshot_reports_offer_full() {
        let mut offer = offer();
        offer.claimed_count = offer.max_claims;

        let now = TimeStamp::new_with(2026, 3, 1, 17, 0, 0);
        assert_eq!(evaluate(&offer, &checked_in(), now), Eligibility::OfferFull);
    }

    #[test]
    fn prior_claim_beats_checkin_failure() {
        let claimant = ClaimantState {
            checked_in_venue: None,
            has_existing_claim: true,
        };

        let now = TimeStamp::new_with(2026, 3, 1, 17, 0, 0);
        assert_eq!(
            evaluate(&offer(), &claimant, now),
            Eligibility::AlreadyClaimed
        );
    }

    #[test]
    fn checked_in_elsewhere_is_not_checked_in() {
        let claimant = ClaimantState {
            checked_in_venue: Some("venue_b".into()),
            has_existing_claim: false,
        };

        let now = TimeStamp::new_with(2026, 3, 1, 17, 0, 0);
        assert_eq!(evaluate(&offer(), &claimant, now), Eligibility::NotCheckedIn);
    }
}
