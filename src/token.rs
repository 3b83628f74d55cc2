//! Redemption token issuance
//!
//! Tokens are short numeric strings a venue can read back over the
//! counter. Uniqueness within an offer is not guaranteed here; the
//! service detects collisions through the ledger's token index and asks
//! for a fresh draw.

use thiserror::Error;

#[derive(Debug, Error)]
#[error("system randomness unavailable: {0}")]
pub struct TokenDrawError(getrandom::Error);

#[derive(Debug, Clone)]
pub struct TokenIssuer {
    length: usize,
}

impl TokenIssuer {
    pub fn new(length: usize) -> Self {
        assert!((1..=9).contains(&length), "token length out of range");
        Self { length }
    }

    /// Draw a zero-padded numeric token, uniform over `10^length`.
    pub fn issue(&self) -> Result<String, TokenDrawError> {
        let space = 10u64.pow(self.length as u32);
        // rejection sampling keeps the draw uniform: discard values in the
        // truncated tail of the u64 range
        let limit = u64::MAX - (u64::MAX % space);

        loop {
            let mut buf = [0u8; 8];
            getrandom::getrandom(&mut buf).map_err(TokenDrawError)?;
            let raw = u64::from_le_bytes(buf);
            if raw < limit {
                return Ok(format!("{:0width$}", raw % space, width = self.length));
            }
        }
    }
}
