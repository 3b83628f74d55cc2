//! Batched delivery with bounded parallelism
//!
//! Recipients are chunked to the provider's batch limit and sent with a
//! small fixed number of batches in flight. Quota commits happen at the
//! moment a batch is queued: a batch skipped for the deadline, or refused
//! by the venue counter, consumes nothing.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::provider::{DeliveryStatus, PushMessage, PushProvider};
use super::rate_limit::RateLimiter;
use crate::config::EngineConfig;
use crate::offer::Offer;
use crate::stores::VenueProfile;

/// A notification target: one user, all of their active devices.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub user_id: String,
    pub device_tokens: Vec<String>,
}

/// What one dispatch run did at the delivery layer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliverySummary {
    /// Messages handed to the provider (including retries only once).
    pub attempted: usize,
    pub delivered: usize,
    /// Still failing after the single same-run retry pass.
    pub transient_failures: usize,
    /// Dead device tokens to deactivate.
    pub invalid_tokens: Vec<String>,
    /// Messages never sent because the wall-clock budget ran out.
    pub skipped_past_deadline: usize,
    /// Users dropped at commit time by the daily counters.
    pub rate_limited_users: usize,
}

#[derive(Debug, Default)]
struct BatchReport {
    attempted: usize,
    delivered: usize,
    transient: Vec<PushMessage>,
    invalid: Vec<String>,
    skipped: usize,
    rate_limited_users: usize,
}

pub struct DispatchBatcher<'a> {
    provider: &'a dyn PushProvider,
    limiter: &'a RateLimiter,
    offer: &'a Offer,
    venue: &'a VenueProfile,
    day: NaiveDate,
    batch_size: usize,
    parallelism: usize,
    provider_timeout: Duration,
}

impl<'a> DispatchBatcher<'a> {
    pub fn new(
        provider: &'a dyn PushProvider,
        limiter: &'a RateLimiter,
        config: &EngineConfig,
        offer: &'a Offer,
        venue: &'a VenueProfile,
        day: NaiveDate,
    ) -> Self {
        Self {
            provider,
            limiter,
            offer,
            venue,
            day,
            batch_size: config.batch_size.max(1),
            parallelism: config.dispatch_parallelism.max(1),
            provider_timeout: config.provider_timeout,
        }
    }

    /// Send to every recipient, then retry transient failures once if the
    /// deadline allows. Never fails: everything ends up in the summary.
    pub async fn dispatch(&self, recipients: Vec<Recipient>, deadline: Instant) -> DeliverySummary {
        let batches = chunk_recipients(recipients, self.batch_size);
        let venue_gate: OnceLock<bool> = OnceLock::new();

        let reports: Vec<BatchReport> = stream::iter(batches)
            .map(|batch| self.send_batch(batch, &venue_gate, deadline))
            .buffer_unordered(self.parallelism)
            .collect()
            .await;

        let mut summary = DeliverySummary::default();
        let mut transient = Vec::new();
        for report in reports {
            summary.attempted += report.attempted;
            summary.delivered += report.delivered;
            summary.invalid_tokens.extend(report.invalid);
            summary.skipped_past_deadline += report.skipped;
            summary.rate_limited_users += report.rate_limited_users;
            transient.extend(report.transient);
        }

        // one same-run retry pass for transient failures, no persisted queue
        if !transient.is_empty() && Instant::now() < deadline {
            debug!(retrying = transient.len(), "retrying transient failures");
            let retry_reports: Vec<BatchReport> = stream::iter(
                transient
                    .chunks(self.batch_size)
                    .map(<[PushMessage]>::to_vec)
                    .collect::<Vec<_>>(),
            )
            .map(|messages| self.send_retry(messages, deadline))
            .buffer_unordered(self.parallelism)
            .collect()
            .await;

            for report in retry_reports {
                summary.attempted += report.attempted;
                summary.delivered += report.delivered;
                summary.invalid_tokens.extend(report.invalid);
                summary.transient_failures += report.transient.len();
                summary.skipped_past_deadline += report.skipped;
            }
        } else {
            summary.transient_failures += transient.len();
        }

        summary
    }

    /// First-pass batch: commits quotas, builds messages, sends.
    async fn send_batch(
        &self,
        batch: Vec<Recipient>,
        venue_gate: &OnceLock<bool>,
        deadline: Instant,
    ) -> BatchReport {
        let mut report = BatchReport::default();

        let message_count: usize = batch.iter().map(|r| r.device_tokens.len()).sum();
        if Instant::now() >= deadline {
            report.skipped = message_count;
            return report;
        }

        // the first batch that actually proceeds consumes the venue quota
        let venue_admitted = *venue_gate.get_or_init(|| {
            match self
                .limiter
                .commit_venue(&self.venue.id, self.venue.tier, self.day)
            {
                Ok(admitted) => admitted,
                Err(e) => {
                    warn!(venue_id = %self.venue.id, error = %e, "venue quota commit failed");
                    false
                }
            }
        });
        if !venue_admitted {
            report.rate_limited_users += batch.len();
            return report;
        }

        let mut messages = Vec::with_capacity(message_count);
        for recipient in batch {
            match self.limiter.commit_user(&recipient.user_id, self.day) {
                Ok(true) => {
                    for device_token in recipient.device_tokens {
                        messages.push(self.message_for(device_token));
                    }
                }
                Ok(false) => report.rate_limited_users += 1,
                Err(e) => {
                    warn!(user_id = %recipient.user_id, error = %e, "user quota commit failed, dropping");
                    report.rate_limited_users += 1;
                }
            }
        }
        if messages.is_empty() {
            return report;
        }

        self.deliver(messages, &mut report).await;
        report
    }

    /// Retry-pass batch: quota already consumed the first time around.
    async fn send_retry(&self, messages: Vec<PushMessage>, deadline: Instant) -> BatchReport {
        let mut report = BatchReport::default();

        if Instant::now() >= deadline {
            report.skipped = messages.len();
            return report;
        }

        self.deliver(messages, &mut report).await;
        report
    }

    async fn deliver(&self, messages: Vec<PushMessage>, report: &mut BatchReport) {
        report.attempted += messages.len();

        let outcomes =
            match tokio::time::timeout(self.provider_timeout, self.provider.send(&messages)).await
            {
                Ok(Ok(outcomes)) => outcomes,
                Ok(Err(e)) => {
                    warn!(error = %e, batch = messages.len(), "provider rejected batch");
                    report.transient.extend(messages);
                    return;
                }
                Err(_) => {
                    warn!(batch = messages.len(), "provider call timed out");
                    report.transient.extend(messages);
                    return;
                }
            };

        let by_token: HashMap<&str, &PushMessage> = messages
            .iter()
            .map(|m| (m.device_token.as_str(), m))
            .collect();

        for outcome in outcomes {
            match outcome.status {
                DeliveryStatus::Delivered => report.delivered += 1,
                DeliveryStatus::InvalidToken => report.invalid.push(outcome.device_token),
                DeliveryStatus::TransientFailure => {
                    if let Some(message) = by_token.get(outcome.device_token.as_str()) {
                        report.transient.push((*message).clone());
                    }
                }
            }
        }
    }

    fn message_for(&self, device_token: String) -> PushMessage {
        PushMessage {
            device_token,
            title: self.offer.title.clone(),
            body: self.offer.description.clone(),
            offer_id: self.offer.id.clone(),
        }
    }
}

/// Greedy chunking: each batch holds whole recipients and at most
/// `batch_size` messages (a single recipient with more devices than the
/// limit still gets one batch).
fn chunk_recipients(recipients: Vec<Recipient>, batch_size: usize) -> Vec<Vec<Recipient>> {
    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut count = 0usize;

    for recipient in recipients {
        let n = recipient.device_tokens.len();
        if n == 0 {
            continue;
        }
        if !current.is_empty() && count + n > batch_size {
            batches.push(std::mem::take(&mut current));
            count = 0;
        }
        count += n;
        current.push(recipient);
    }
    if !current.is_empty() {
        batches.push(current);
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient(id: &str, tokens: usize) -> Recipient {
        Recipient {
            user_id: id.into(),
            device_tokens: (0..tokens).map(|i| format!("{id}-tok{i}")).collect(),
        }
    }

    #[test]
    fn chunking_respects_the_message_limit() {
        let recipients = vec![
            recipient("a", 2),
            recipient("b", 2),
            recipient("c", 1),
            recipient("d", 0),
        ];

        let batches = chunk_recipients(recipients, 3);

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 1); // a alone: b would overflow
        assert_eq!(batches[1].len(), 2); // b + c
    }

    #[test]
    fn oversized_recipient_still_gets_a_batch() {
        let batches = chunk_recipients(vec![recipient("a", 5)], 3);

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].device_tokens.len(), 5);
    }
}
