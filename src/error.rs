//! Error types for the claim and dispatch paths
//!
//! `ClaimError` is the closed, client-facing taxonomy: raw storage and
//! encoding failures are translated into it at the service boundary and
//! never leak to callers.

/// Client-facing claim and redemption failures.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimError {
    #[error("offer not found")]
    UnknownOffer,
    #[error("check in at the venue before claiming")]
    NotCheckedIn,
    #[error("this offer has ended")]
    OfferExpired,
    #[error("this offer is fully claimed")]
    OfferFull,
    #[error("you already claimed this offer")]
    AlreadyClaimed,
    /// The advisory capacity check passed but the ledger refused the
    /// reservation. Presented like [`ClaimError::OfferFull`], logged
    /// separately for correctness auditing.
    #[error("this offer is fully claimed")]
    CapacityExceeded,
    #[error("redemption token not recognised")]
    UnknownToken,
    #[error("this claim was already redeemed")]
    AlreadyRedeemed,
    #[error("this claim has expired")]
    ClaimExpired,
    /// Transient infrastructure failure. No partial claim state is
    /// visible to other callers when this is returned.
    #[error("service temporarily unavailable, try again")]
    Unavailable,
}

impl ClaimError {
    /// Deterministic rejections the client should not retry automatically.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ClaimError::Unavailable)
    }
}

/// Failures while validating offer details before publication.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum OfferValidationError {
    #[error("offer has no venue")]
    MissingVenue,
    #[error("offer has no title")]
    MissingTitle,
    #[error("max_claims must be positive")]
    ZeroCapacity,
    #[error("offer window is not fully set")]
    MissingWindow,
    #[error("offer window ends before it starts")]
    EmptyWindow,
    #[error("target radius must be positive for radius-targeted offers")]
    ZeroRadius,
    #[error("claim value {value} exceeds the configured cap {cap}")]
    ValueAboveCap { value: u64, cap: u64 },
}

/// Storage-level failures inside the claim ledger.
#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("corrupt record: {0}")]
    Codec(String),
}

/// Fatal dispatch-job failures. Per-recipient delivery errors are never
/// raised as errors; they aggregate into the run summary.
#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("offer not found")]
    UnknownOffer,
    #[error("venue not found for offer")]
    UnknownVenue,
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("corrupt record: {0}")]
    Codec(String),
    #[error("collaborator read failed: {0}")]
    Collaborator(String),
}
