//! The authoritative claim ledger
//!
//! All writes to an offer's `claimed_count` and to the per-(offer, user)
//! claim rows happen inside the multi-tree transactions in this module.
//! Everything else in the crate treats those values as read-only.

use std::sync::Arc;

use chrono::Utc;
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};

use super::claim::{Claim, ClaimStatus};
use super::error::LedgerError;
use super::offer::Offer;
use super::time::TimeStamp;
use super::utils;

pub(crate) const OFFERS_TREE: &str = "offers";
pub(crate) const CLAIMS_TREE: &str = "claims";
pub(crate) const TOKENS_TREE: &str = "tokens";

/// Why a reservation was refused. Both variants are terminal for the
/// request that received them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveReject {
    /// The user already holds a reservation for this offer.
    DuplicateClaim,
    /// The offer reached `max_claims` strictly before this call.
    CapacityExceeded,
    UnknownOffer,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReserveOutcome {
    Reserved(Claim),
    Rejected(ReserveReject),
}

/// Key of a claim row: one row per (offer, user), enforced by the key
/// itself.
fn claim_key(offer_id: &str, user_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(offer_id.len() + user_id.len() + 1);
    key.extend_from_slice(offer_id.as_bytes());
    key.push(b'/');
    key.extend_from_slice(user_id.as_bytes());
    key
}

fn token_key(offer_id: &str, token: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(offer_id.len() + token.len() + 1);
    key.extend_from_slice(offer_id.as_bytes());
    key.push(b'/');
    key.extend_from_slice(token.as_bytes());
    key
}

enum TxFailure {
    Reject(ReserveReject),
    Codec(String),
}

pub struct ClaimLedger {
    offers: sled::Tree,
    claims: sled::Tree,
    tokens: sled::Tree,
}

impl ClaimLedger {
    pub fn open(db: &Arc<sled::Db>) -> Result<Self, LedgerError> {
        Ok(Self {
            offers: db.open_tree(OFFERS_TREE)?,
            claims: db.open_tree(CLAIMS_TREE)?,
            tokens: db.open_tree(TOKENS_TREE)?,
        })
    }

    pub fn insert_offer(&self, offer: &Offer) -> Result<(), LedgerError> {
        let cbor = offer.to_cbor().map_err(|e| LedgerError::Codec(e.to_string()))?;
        self.offers.insert(offer.id.as_bytes(), cbor)?;
        Ok(())
    }

    pub fn load_offer(&self, offer_id: &str) -> Result<Option<Offer>, LedgerError> {
        match self.offers.get(offer_id.as_bytes())? {
            Some(raw) => Ok(Some(
                Offer::from_cbor(&raw).map_err(|e| LedgerError::Codec(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    pub fn load_claim(&self, offer_id: &str, user_id: &str) -> Result<Option<Claim>, LedgerError> {
        match self.claims.get(claim_key(offer_id, user_id))? {
            Some(raw) => Ok(Some(
                Claim::from_cbor(&raw).map_err(|e| LedgerError::Codec(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    /// Reserve-or-reject: the single indivisible operation behind every
    /// successful claim.
    ///
    /// The counter check, the duplicate-key check, the pending claim row
    /// and the counter increment all commit together or not at all, so
    /// across any number of concurrent callers an offer hands out at most
    /// `max_claims` reservations and a user at most one.
    pub fn reserve(
        &self,
        offer_id: &str,
        user_id: &str,
        now: TimeStamp<Utc>,
        expires_at: TimeStamp<Utc>,
    ) -> Result<ReserveOutcome, LedgerError> {
        let result = (&self.offers, &self.claims).transaction(|(offers, claims)| {
            let raw = offers
                .get(offer_id.as_bytes())?
                .ok_or(ConflictableTransactionError::Abort(TxFailure::Reject(
                    ReserveReject::UnknownOffer,
                )))?;
            let mut offer = Offer::from_cbor(&raw).map_err(|e| {
                ConflictableTransactionError::Abort(TxFailure::Codec(e.to_string()))
            })?;

            if offer.claimed_count >= offer.max_claims {
                return Err(ConflictableTransactionError::Abort(TxFailure::Reject(
                    ReserveReject::CapacityExceeded,
                )));
            }

            let key = claim_key(offer_id, user_id);
            if claims.get(key.as_slice())?.is_some() {
                return Err(ConflictableTransactionError::Abort(TxFailure::Reject(
                    ReserveReject::DuplicateClaim,
                )));
            }

            let claim = Claim {
                id: utils::new_uuid_to_bech32("claim_").map_err(|e| {
                    ConflictableTransactionError::Abort(TxFailure::Codec(e.to_string()))
                })?,
                offer_id: offer_id.to_owned(),
                user_id: user_id.to_owned(),
                status: ClaimStatus::Reserved,
                token: None,
                expires_at,
                created_at: now,
                redeemed_at: None,
            };
            let claim_cbor = claim.to_cbor().map_err(|e| {
                ConflictableTransactionError::Abort(TxFailure::Codec(e.to_string()))
            })?;
            claims.insert(key.as_slice(), claim_cbor)?;

            offer.claimed_count += 1;
            let offer_cbor = offer.to_cbor().map_err(|e| {
                ConflictableTransactionError::Abort(TxFailure::Codec(e.to_string()))
            })?;
            offers.insert(offer_id.as_bytes(), offer_cbor)?;

            Ok(claim)
        });

        match result {
            Ok(claim) => Ok(ReserveOutcome::Reserved(claim)),
            Err(TransactionError::Abort(TxFailure::Reject(reject))) => {
                Ok(ReserveOutcome::Rejected(reject))
            }
            Err(TransactionError::Abort(TxFailure::Codec(msg))) => Err(LedgerError::Codec(msg)),
            Err(TransactionError::Storage(e)) => Err(LedgerError::Storage(e)),
        }
    }

    /// Compensation for a reservation whose token issuance failed: remove
    /// the pending claim row and hand the capacity slot back. Idempotent,
    /// a second call finds no row and leaves the counter alone.
    pub fn release(&self, offer_id: &str, user_id: &str) -> Result<(), LedgerError> {
        let result: Result<(), TransactionError<String>> =
            (&self.offers, &self.claims).transaction(|(offers, claims)| {
                let key = claim_key(offer_id, user_id);
                if claims.remove(key.as_slice())?.is_none() {
                    return Ok(());
                }

                if let Some(raw) = offers.get(offer_id.as_bytes())? {
                    let mut offer = Offer::from_cbor(&raw).map_err(|e| {
                        ConflictableTransactionError::Abort(e.to_string())
                    })?;
                    offer.claimed_count = offer.claimed_count.saturating_sub(1);
                    let offer_cbor = offer.to_cbor().map_err(|e| {
                        ConflictableTransactionError::Abort(e.to_string())
                    })?;
                    offers.insert(offer_id.as_bytes(), offer_cbor)?;
                }

                Ok(())
            });

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(msg)) => Err(LedgerError::Codec(msg)),
            Err(TransactionError::Storage(e)) => Err(LedgerError::Storage(e)),
        }
    }

    /// Conditionally index a freshly drawn token for an offer. Returns
    /// `false` when the token already belongs to another claim of the same
    /// offer, in which case the caller retries with a new draw.
    pub fn try_index_token(
        &self,
        offer_id: &str,
        token: &str,
        user_id: &str,
    ) -> Result<bool, LedgerError> {
        let key = token_key(offer_id, token);
        let swap = self.tokens.compare_and_swap(
            key,
            None as Option<&[u8]>,
            Some(user_id.as_bytes().to_vec()),
        )?;
        Ok(swap.is_ok())
    }

    pub fn unindex_token(&self, offer_id: &str, token: &str) -> Result<(), LedgerError> {
        self.tokens.remove(token_key(offer_id, token))?;
        Ok(())
    }

    /// Look up who holds a token within an offer's claim set.
    pub fn token_holder(&self, offer_id: &str, token: &str) -> Result<Option<String>, LedgerError> {
        match self.tokens.get(token_key(offer_id, token))? {
            Some(raw) => Ok(Some(
                String::from_utf8(raw.to_vec()).map_err(|e| LedgerError::Codec(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    /// Write the finalised claim (with its token) over the pending row.
    pub fn finalise(
        &self,
        offer_id: &str,
        user_id: &str,
        token: &str,
    ) -> Result<Claim, LedgerError> {
        let mut claim = self
            .load_claim(offer_id, user_id)?
            .ok_or_else(|| LedgerError::Codec("pending claim row vanished".into()))?;
        claim.token = Some(token.to_owned());
        self.put_claim(&claim)?;
        Ok(claim)
    }

    pub(crate) fn put_claim(&self, claim: &Claim) -> Result<(), LedgerError> {
        let cbor = claim.to_cbor().map_err(|e| LedgerError::Codec(e.to_string()))?;
        self.claims
            .insert(claim_key(&claim.offer_id, &claim.user_id), cbor)?;
        Ok(())
    }

    /// Iterate every claim row. Used by the expiry sweep.
    pub(crate) fn scan_claims(
        &self,
    ) -> impl Iterator<Item = Result<Claim, LedgerError>> + '_ {
        self.claims.iter().map(|entry| {
            let (_, raw) = entry?;
            Claim::from_cbor(&raw).map_err(|e| LedgerError::Codec(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offer::OfferDetails;
    use tempfile::tempdir;

    fn open_ledger() -> (tempfile::TempDir, ClaimLedger) {
        let dir = tempdir().unwrap();
        let db = Arc::new(sled::open(dir.path().join("ledger.db")).unwrap());
        let ledger = ClaimLedger::open(&db).unwrap();
        (dir, ledger)
    }

    fn sample_offer(max_claims: u32) -> Offer {
        OfferDetails::new()
            .set_venue("venue_test")
            .set_title("Free cold brew")
            .set_max_claims(max_claims)
            .set_window(
                TimeStamp::new_with(2026, 3, 1, 9, 0, 0),
                TimeStamp::new_with(2026, 3, 1, 17, 0, 0),
            )
            .set_radius_m(800)
            .validate_and_finalise(50_000)
            .unwrap()
    }

    fn ts() -> (TimeStamp<chrono::Utc>, TimeStamp<chrono::Utc>) {
        (
            TimeStamp::new_with(2026, 3, 1, 10, 0, 0),
            TimeStamp::new_with(2026, 3, 2, 10, 0, 0),
        )
    }

    #[test]
    fn reserve_increments_counter_once_per_user() {
        let (_dir, ledger) = open_ledger();
        let offer = sample_offer(5);
        ledger.insert_offer(&offer).unwrap();
        let (now, exp) = ts();

        let first = ledger.reserve(&offer.id, "user_a", now, exp).unwrap();
        assert!(matches!(first, ReserveOutcome::Reserved(_)));

        let second = ledger.reserve(&offer.id, "user_a", now, exp).unwrap();
        assert_eq!(
            second,
            ReserveOutcome::Rejected(ReserveReject::DuplicateClaim)
        );

        let stored = ledger.load_offer(&offer.id).unwrap().unwrap();
        assert_eq!(stored.claimed_count, 1);
    }

    #[test]
    fn reserve_refuses_at_capacity() {
        let (_dir, ledger) = open_ledger();
        let offer = sample_offer(2);
        ledger.insert_offer(&offer).unwrap();
        let (now, exp) = ts();

        for user in ["user_a", "user_b"] {
            let outcome = ledger.reserve(&offer.id, user, now, exp).unwrap();
            assert!(matches!(outcome, ReserveOutcome::Reserved(_)));
        }

        let third = ledger.reserve(&offer.id, "user_c", now, exp).unwrap();
        assert_eq!(
            third,
            ReserveOutcome::Rejected(ReserveReject::CapacityExceeded)
        );
    }

    #[test]
    fn release_is_idempotent_and_frees_the_slot() {
        let (_dir, ledger) = open_ledger();
        let offer = sample_offer(1);
        ledger.insert_offer(&offer).unwrap();
        let (now, exp) = ts();

        ledger.reserve(&offer.id, "user_a", now, exp).unwrap();
        ledger.release(&offer.id, "user_a").unwrap();
        ledger.release(&offer.id, "user_a").unwrap();

        let stored = ledger.load_offer(&offer.id).unwrap().unwrap();
        assert_eq!(stored.claimed_count, 0);

        // slot is claimable again
        let retry = ledger.reserve(&offer.id, "user_b", now, exp).unwrap();
        assert!(matches!(retry, ReserveOutcome::Reserved(_)));
    }

    #[test]
    fn token_index_rejects_second_insert() {
        let (_dir, ledger) = open_ledger();

        assert!(ledger.try_index_token("offer_x", "123456", "user_a").unwrap());
        assert!(!ledger.try_index_token("offer_x", "123456", "user_b").unwrap());
        // same token under a different offer is a different key
        assert!(ledger.try_index_token("offer_y", "123456", "user_b").unwrap());
    }
}
