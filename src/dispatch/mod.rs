//! Targeted push dispatch for freshly created offers
//!
//! Pipeline: recipient selection, preference and quiet-hours filtering,
//! rate limiting, then batched delivery with bounded parallelism. The
//! engine module orchestrates one run per offer-creation trigger.

pub mod batcher;
pub mod engine;
pub mod prefs;
pub mod provider;
pub mod rate_limit;
pub mod selector;

pub use engine::{DispatchOutcome, DispatchSummary, NotificationDispatchEngine};
pub use provider::{DeliveryStatus, PushMessage, PushProvider, RecordingProvider};
pub use rate_limit::RateLimiter;
