//! Offer records and the details builder
use super::error::OfferValidationError;
use super::time::TimeStamp;
use super::utils;
use chrono::Utc;

// Also used for constructing drafts before publication.
// A venue actor fills this in; `validate_and_finalise` gates the write.
#[derive(Debug, Default, PartialEq)]
pub struct OfferDetails {
    venue_id: Option<String>,
    title: Option<String>,
    description: Option<String>,
    max_claims: u32,
    starts_at: Option<TimeStamp<Utc>>,
    ends_at: Option<TimeStamp<Utc>>,
    radius_m: u32,
    favorites_only: bool,
    value_cents: u64,
}

/// The authoritative offer record. `claimed_count` is written only inside
/// ledger transactions; offers are never deleted, they go inactive when the
/// window closes or capacity runs out.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Offer {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub venue_id: String,
    #[n(2)]
    pub title: String,
    #[n(3)]
    pub description: String,
    #[n(4)]
    pub max_claims: u32,
    #[n(5)]
    pub claimed_count: u32,
    #[n(6)]
    pub starts_at: TimeStamp<Utc>,
    #[n(7)]
    pub ends_at: TimeStamp<Utc>,
    #[n(8)]
    pub radius_m: u32,
    #[n(9)]
    pub favorites_only: bool,
    #[n(10)]
    pub value_cents: u64,
}

impl OfferDetails {
    /// Construct a new builder object, this becomes the basis for a draft
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_venue(mut self, venue_id: &str) -> Self {
        self.venue_id = Some(venue_id.to_owned());
        self
    }
    pub fn set_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_owned());
        self
    }
    pub fn set_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_owned());
        self
    }
    pub fn set_max_claims(mut self, max_claims: u32) -> Self {
        self.max_claims = max_claims;
        self
    }
    pub fn set_window(mut self, starts_at: TimeStamp<Utc>, ends_at: TimeStamp<Utc>) -> Self {
        self.starts_at = Some(starts_at);
        self.ends_at = Some(ends_at);
        self
    }
    pub fn set_radius_m(mut self, radius_m: u32) -> Self {
        self.radius_m = radius_m;
        self
    }
    pub fn set_favorites_only(mut self, favorites_only: bool) -> Self {
        self.favorites_only = favorites_only;
        self
    }
    pub fn set_value_cents(mut self, value_cents: u64) -> Self {
        self.value_cents = value_cents;
        self
    }

    /// Checks fields, mints an offer id and returns the finalised record
    /// with a zeroed claim counter.
    pub fn validate_and_finalise(self, value_cap: u64) -> Result<Offer, OfferValidationError> {
        let venue_id = self.venue_id.ok_or(OfferValidationError::MissingVenue)?;
        let title = match self.title {
            Some(t) if !t.trim().is_empty() => t,
            _ => return Err(OfferValidationError::MissingTitle),
        };
        if self.max_claims == 0 {
            return Err(OfferValidationError::ZeroCapacity);
        }
        let (starts_at, ends_at) = match (self.starts_at, self.ends_at) {
            (Some(s), Some(e)) => (s, e),
            _ => return Err(OfferValidationError::MissingWindow),
        };
        if ends_at <= starts_at {
            return Err(OfferValidationError::EmptyWindow);
        }
        if !self.favorites_only && self.radius_m == 0 {
            return Err(OfferValidationError::ZeroRadius);
        }
        if self.value_cents > value_cap {
            return Err(OfferValidationError::ValueAboveCap {
                value: self.value_cents,
                cap: value_cap,
            });
        }

        // id minting can only fail on a malformed hrp, which is fixed here
        let id = utils::new_uuid_to_bech32("offer_")
            .expect("bech32 encoding of a fresh uuid cannot fail with a valid hrp");

        Ok(Offer {
            id,
            venue_id,
            title,
            description: self.description.unwrap_or_default(),
            max_claims: self.max_claims,
            claimed_count: 0,
            starts_at,
            ends_at,
            radius_m: self.radius_m,
            favorites_only: self.favorites_only,
            value_cents: self.value_cents,
        })
    }
}

impl Offer {
    /// Offer is inside its claim window.
    pub fn window_contains(&self, now: TimeStamp<Utc>) -> bool {
        self.starts_at <= now && now < self.ends_at
    }

    pub fn capacity_remaining(&self) -> bool {
        self.claimed_count < self.max_claims
    }

    pub(crate) fn to_cbor(&self) -> Result<Vec<u8>, minicbor::encode::Error<std::convert::Infallible>> {
        minicbor::to_vec(self)
    }

    pub(crate) fn from_cbor(bytes: &[u8]) -> Result<Self, minicbor::decode::Error> {
        minicbor::decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_details() -> OfferDetails {
        OfferDetails::new()
            .set_venue("venue_test")
            .set_title("Two-for-one espresso")
            .set_max_claims(10)
            .set_window(
                TimeStamp::new_with(2026, 3, 1, 9, 0, 0),
                TimeStamp::new_with(2026, 3, 1, 17, 0, 0),
            )
            .set_radius_m(1_500)
    }

    #[test]
    fn finalise_produces_zeroed_counter_and_fresh_id() {
        let offer = base_details().validate_and_finalise(50_000).unwrap();

        assert_eq!(offer.claimed_count, 0);
        assert!(offer.id.starts_with("offer_1"));
    }

    #[test]
    fn rejects_inverted_window() {
        let details = OfferDetails::new()
            .set_venue("venue_test")
            .set_title("t")
            .set_max_claims(1)
            .set_radius_m(100)
            .set_window(
                TimeStamp::new_with(2026, 3, 1, 17, 0, 0),
                TimeStamp::new_with(2026, 3, 1, 9, 0, 0),
            );

        assert_eq!(
            details.validate_and_finalise(50_000),
            Err(OfferValidationError::EmptyWindow)
        );
    }

    #[test]
    fn rejects_value_above_cap() {
        let details = base_details().set_value_cents(60_000);

        assert!(matches!(
            details.validate_and_finalise(50_000),
            Err(OfferValidationError::ValueAboveCap { .. })
        ));
    }

    #[test]
    fn favorites_only_offer_needs_no_radius() {
        let offer = base_details()
            .set_radius_m(0)
            .set_favorites_only(true)
            .validate_and_finalise(50_000);

        assert!(offer.is_ok());
    }

    #[test]
    fn offer_encoding() {
        let original = base_details().validate_and_finalise(50_000).unwrap();

        let encoding = original.to_cbor().unwrap();
        let decode = Offer::from_cbor(&encoding).unwrap();

        assert_eq!(original, decode);
    }
}
