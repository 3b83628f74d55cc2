//! Claim records and status transitions
use super::time::TimeStamp;
use chrono::Utc;

/// Lifecycle of a reservation. `Reserved -> Redeemed` is owned by the
/// service; `Reserved -> Expired` by the background sweep. Claims are
/// never deleted, their existence is the proof of a reservation.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStatus {
    #[n(0)]
    Reserved,
    #[n(1)]
    Redeemed,
    #[n(2)]
    Expired,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Claim {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub offer_id: String,
    #[n(2)]
    pub user_id: String,
    #[n(3)]
    pub status: ClaimStatus,
    /// Set once token issuance succeeds; `None` only on the short-lived
    /// pending record between reserve and finalise.
    #[n(4)]
    pub token: Option<String>,
    #[n(5)]
    pub expires_at: TimeStamp<Utc>,
    #[n(6)]
    pub created_at: TimeStamp<Utc>,
    #[n(7)]
    pub redeemed_at: Option<TimeStamp<Utc>>,
}

impl Claim {
    pub fn is_redeemable(&self, now: TimeStamp<Utc>) -> bool {
        self.status == ClaimStatus::Reserved && now < self.expires_at
    }

    pub(crate) fn to_cbor(&self) -> Result<Vec<u8>, minicbor::encode::Error<std::convert::Infallible>> {
        minicbor::to_vec(self)
    }

    pub(crate) fn from_cbor(bytes: &[u8]) -> Result<Self, minicbor::decode::Error> {
        minicbor::decode(bytes)
    }
}
