//! Client-observed claim state machine
//!
//! A pure reducer the mobile client drives with explicit server
//! responses. The UI never assumes success: optimistic rendering is
//! whatever the current state says, and reconciliation happens through
//! `StatusRefreshed` after a timeout or screen refocus.

use crate::claim::{Claim, ClaimStatus};
use crate::error::ClaimError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimUiState {
    /// The offer card is actionable.
    Claimable,
    /// A claim request is in flight; further submissions are ignored.
    Loading,
    /// Terminal success.
    Claimed { token: String },
    /// Terminal for this offer (the user may still check in and re-enter).
    Ineligible { reason: ClaimError },
    /// Terminal for this offer: capacity is gone.
    Full,
    /// Retryable.
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimUiEvent {
    /// User tapped the claim button.
    Submit,
    /// Server accepted the claim.
    ServerAccepted { token: String },
    /// Server rejected the claim with a taxonomy error.
    ServerRejected(ClaimError),
    /// The request itself failed client-side (network, timeout). The
    /// server may still have completed the operation.
    RequestFailed { message: String },
    /// User asked to retry after an error.
    Retry,
    /// Fresh server truth from a status re-query.
    StatusRefreshed(Option<Claim>),
}

/// One transition. Unknown (state, event) pairs leave the state alone.
pub fn reduce(state: ClaimUiState, event: ClaimUiEvent) -> ClaimUiState {
    use ClaimUiEvent as E;
    use ClaimUiState as S;

    match (state, event) {
        // a re-query showing a live or redeemed claim wins from anywhere
        // but terminal success
        (S::Claimed { token }, _) => S::Claimed { token },
        (state, E::StatusRefreshed(found)) => match found {
            Some(claim) if claim.status != ClaimStatus::Expired => S::Claimed {
                token: claim.token.unwrap_or_default(),
            },
            _ => state,
        },

        (S::Claimable, E::Submit) => S::Loading,
        // re-entrant submission disabled while in flight
        (S::Loading, E::Submit) => S::Loading,
        (S::Loading, E::ServerAccepted { token }) => S::Claimed { token },
        (S::Loading, E::ServerRejected(reason)) => match reason {
            ClaimError::OfferFull | ClaimError::CapacityExceeded => S::Full,
            ClaimError::Unavailable => S::Error {
                message: reason.to_string(),
            },
            other => S::Ineligible { reason: other },
        },
        (S::Loading, E::RequestFailed { message }) => S::Error { message },
        (S::Error { .. }, E::Retry) => S::Loading,

        (state, _) => state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TimeStamp;

    fn claim(status: ClaimStatus) -> Claim {
        Claim {
            id: "claim_x".into(),
            offer_id: "offer_x".into(),
            user_id: "user_x".into(),
            status,
            token: Some("131072".into()),
            expires_at: TimeStamp::new_with(2026, 3, 2, 9, 0, 0),
            created_at: TimeStamp::new_with(2026, 3, 1, 9, 0, 0),
            redeemed_at: None,
        }
    }

    #[test]
    fn happy_path() {
        let s = reduce(ClaimUiState::Claimable, ClaimUiEvent::Submit);
        assert_eq!(s, ClaimUiState::Loading);

        let s = reduce(s, ClaimUiEvent::ServerAccepted { token: "042917".into() });
        assert_eq!(s, ClaimUiState::Claimed { token: "042917".into() });
    }

    #[test]
    fn submit_is_ignored_while_loading() {
        let s = reduce(ClaimUiState::Loading, ClaimUiEvent::Submit);
        assert_eq!(s, ClaimUiState::Loading);
    }

    #[test]
    fn capacity_rejections_go_to_full() {
        for reason in [ClaimError::OfferFull, ClaimError::CapacityExceeded] {
            let s = reduce(ClaimUiState::Loading, ClaimUiEvent::ServerRejected(reason));
            assert_eq!(s, ClaimUiState::Full);
        }
    }

    #[test]
    fn eligibility_rejections_go_to_ineligible() {
        let s = reduce(
            ClaimUiState::Loading,
            ClaimUiEvent::ServerRejected(ClaimError::NotCheckedIn),
        );
        assert_eq!(
            s,
            ClaimUiState::Ineligible {
                reason: ClaimError::NotCheckedIn
            }
        );
    }

    #[test]
    fn transient_failure_is_retryable() {
        let s = reduce(
            ClaimUiState::Loading,
            ClaimUiEvent::ServerRejected(ClaimError::Unavailable),
        );
        let ClaimUiState::Error { .. } = s else {
            panic!("expected Error, got {s:?}");
        };

        assert_eq!(reduce(s, ClaimUiEvent::Retry), ClaimUiState::Loading);
    }

    #[test]
    fn timeout_then_refresh_reconciles_with_server_truth() {
        // client timed out but the server had completed the claim
        let s = reduce(
            ClaimUiState::Loading,
            ClaimUiEvent::RequestFailed {
                message: "timeout".into(),
            },
        );
        let s = reduce(s, ClaimUiEvent::StatusRefreshed(Some(claim(ClaimStatus::Reserved))));

        assert_eq!(s, ClaimUiState::Claimed { token: "131072".into() });
    }

    #[test]
    fn refresh_with_no_claim_changes_nothing() {
        let s = reduce(ClaimUiState::Claimable, ClaimUiEvent::StatusRefreshed(None));
        assert_eq!(s, ClaimUiState::Claimable);
    }

    #[test]
    fn claimed_is_terminal() {
        let s = ClaimUiState::Claimed { token: "042917".into() };
        let after = reduce(s.clone(), ClaimUiEvent::ServerRejected(ClaimError::OfferFull));
        assert_eq!(after, s);
    }

    #[test]
    fn expired_claim_on_refresh_does_not_resurrect() {
        let s = reduce(
            ClaimUiState::Claimable,
            ClaimUiEvent::StatusRefreshed(Some(claim(ClaimStatus::Expired))),
        );
        assert_eq!(s, ClaimUiState::Claimable);
    }
}
