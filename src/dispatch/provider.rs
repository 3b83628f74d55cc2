//! Delivery provider seam
//!
//! The engine only ever talks to `PushProvider`, so the concrete service
//! (FCM, APNs, Expo, ...) can be swapped without touching targeting or
//! rate limiting.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub device_token: String,
    pub title: String,
    pub body: String,
    pub offer_id: String,
}

/// Per-token outcome reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    /// The device token is dead; the caller should mark it inactive so
    /// future selections exclude it.
    InvalidToken,
    /// Worth one same-run retry.
    TransientFailure,
}

#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub device_token: String,
    pub status: DeliveryStatus,
}

#[async_trait]
pub trait PushProvider: Send + Sync {
    /// Send one batch. An `Err` means the whole batch failed transiently;
    /// per-token failures come back as outcomes.
    async fn send(&self, batch: &[PushMessage]) -> anyhow::Result<Vec<DeliveryOutcome>>;
}

/// Test double: records every batch and lets tests script failures.
#[derive(Default)]
pub struct RecordingProvider {
    sent: Mutex<Vec<Vec<PushMessage>>>,
    invalid_tokens: Mutex<HashSet<String>>,
    /// tokens that fail transiently this many times before succeeding
    transient_failures: Mutex<std::collections::HashMap<String, u32>>,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_invalid(&self, device_token: &str) {
        self.invalid_tokens
            .lock()
            .unwrap()
            .insert(device_token.to_owned());
    }

    pub fn fail_transiently(&self, device_token: &str, times: u32) {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(device_token.to_owned(), times);
    }

    pub fn batches(&self) -> Vec<Vec<PushMessage>> {
        self.sent.lock().unwrap().clone()
    }

    pub fn delivered_tokens(&self) -> Vec<String> {
        self.batches()
            .into_iter()
            .flatten()
            .map(|m| m.device_token)
            .collect()
    }
}

#[async_trait]
impl PushProvider for RecordingProvider {
    async fn send(&self, batch: &[PushMessage]) -> anyhow::Result<Vec<DeliveryOutcome>> {
        self.sent.lock().unwrap().push(batch.to_vec());

        let invalid = self.invalid_tokens.lock().unwrap();
        let mut transient = self.transient_failures.lock().unwrap();

        Ok(batch
            .iter()
            .map(|m| {
                let status = if invalid.contains(&m.device_token) {
                    DeliveryStatus::InvalidToken
                } else if let Some(left) = transient.get_mut(&m.device_token) {
                    if *left > 0 {
                        *left -= 1;
                        DeliveryStatus::TransientFailure
                    } else {
                        DeliveryStatus::Delivered
                    }
                } else {
                    DeliveryStatus::Delivered
                };
                DeliveryOutcome {
                    device_token: m.device_token.clone(),
                    status,
                }
            })
            .collect())
    }
}
