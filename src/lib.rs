//! Flash-offer claim reservation and targeted push dispatch.
//!
//! Two entry points:
//!
//! - [`ClaimService`] — the client-facing claim workflow: advisory
//!   eligibility, the atomic reserve-or-reject against the ledger, token
//!   issuance and redemption.
//! - [`NotificationDispatchEngine`] — the per-offer fan-out job:
//!   targeting, preference and quiet-hours filtering, tiered rate limits
//!   and batched delivery through a swappable push provider.

pub mod claim;
pub mod config;
pub mod dispatch;
pub mod eligibility;
pub mod error;
pub mod geo;
pub mod ledger;
pub mod lifecycle;
pub mod offer;
pub mod service;
pub mod stores;
pub mod time;
pub mod token;
pub mod utils;

pub use claim::{Claim, ClaimStatus};
pub use config::EngineConfig;
pub use dispatch::{DispatchOutcome, DispatchSummary, NotificationDispatchEngine};
pub use error::{ClaimError, DispatchError, OfferValidationError};
pub use offer::{Offer, OfferDetails};
pub use service::{ClaimReceipt, ClaimService};
