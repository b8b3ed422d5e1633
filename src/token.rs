//! Bearer token material and freshness rules.

use crate::constants::TOKEN_FRESHNESS_MARGIN;
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

/// A complete set of bearer credentials for the remote service.
///
/// A `TokenSet` is immutable once constructed: refresh and login produce a
/// new value that replaces the old one wholesale, nothing mutates a stored
/// set in place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    /// JWT presented as the bearer credential on every call and handshake.
    pub access_token: String,
    /// Opaque token used to obtain the next pair.
    pub refresh_token: String,
    /// Expiry of `access_token`, decoded from its embedded `exp` claim.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl TokenSet {
    /// Builds a `TokenSet` from the raw pair returned by the auth endpoints,
    /// deriving the expiry from the access token's `exp` claim.
    ///
    /// # Errors
    ///
    /// Returns [`TokenDecodeError`] if the access token is not a decodable
    /// JWT or carries no usable expiry.
    pub fn from_raw(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Result<Self, TokenDecodeError> {
        let access_token = access_token.into();
        let expires_at = decode_expiry(&access_token)?;
        Ok(Self {
            access_token,
            refresh_token: refresh_token.into(),
            expires_at,
        })
    }

    /// Returns `true` while the access token is safely inside the freshness
    /// margin at time `now`.
    ///
    /// A token closer to expiry than [`TOKEN_FRESHNESS_MARGIN`] is stale even
    /// though the remote service may still accept it; callers must attempt a
    /// refresh before presenting it.
    pub fn is_fresh(&self, now: OffsetDateTime) -> bool {
        now < self.expires_at - TOKEN_FRESHNESS_MARGIN
    }
}

/// Failure to read the expiry out of an access token.
#[derive(Debug, Error)]
pub enum TokenDecodeError {
    /// The token is not a decodable JWT or lacks an `exp` claim.
    #[error("malformed access token: {0}")]
    Malformed(#[from] jsonwebtoken::errors::Error),
    /// The `exp` claim is not a representable timestamp.
    #[error("access token expiry out of range")]
    ExpiryOutOfRange,
}

#[derive(Deserialize)]
struct ExpiryClaims {
    exp: i64,
}

/// Reads the `exp` claim without verifying the signature; the signature is
/// the remote service's concern, this client only needs the expiry.
fn decode_expiry(token: &str) -> Result<OffsetDateTime, TokenDecodeError> {
    let header = decode_header(token)?;

    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<ExpiryClaims>(token, &DecodingKey::from_secret(&[]), &validation)?;
    OffsetDateTime::from_unix_timestamp(data.claims.exp)
        .map_err(|_| TokenDecodeError::ExpiryOutOfRange)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::time::Duration;

    #[derive(serde::Serialize)]
    struct Claims {
        sub: &'static str,
        exp: i64,
    }

    fn mint(expires_in_secs: i64) -> String {
        let exp = OffsetDateTime::now_utc().unix_timestamp() + expires_in_secs;
        encode(
            &Header::default(),
            &Claims { sub: "agent", exp },
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap()
    }

    #[test]
    fn expiry_decoded_from_exp_claim() {
        let set = TokenSet::from_raw(mint(3600), "refresh-1").unwrap();
        let delta = set.expires_at - OffsetDateTime::now_utc();
        assert!(delta > time::Duration::seconds(3590));
        assert!(delta <= time::Duration::seconds(3600));
    }

    #[test]
    fn garbage_token_is_rejected() {
        assert!(matches!(
            TokenSet::from_raw("not-a-jwt", "refresh-1"),
            Err(TokenDecodeError::Malformed(_))
        ));
    }

    #[test]
    fn token_without_exp_claim_is_rejected() {
        #[derive(serde::Serialize)]
        struct NoExp {
            sub: &'static str,
        }
        let token = encode(
            &Header::default(),
            &NoExp { sub: "agent" },
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert!(TokenSet::from_raw(token, "refresh-1").is_err());
    }

    #[test]
    fn freshness_respects_margin() {
        let now = OffsetDateTime::now_utc();

        // Well beyond the margin.
        let fresh = TokenSet::from_raw(mint(3600), "r").unwrap();
        assert!(fresh.is_fresh(now));

        // Inside the margin: expires in 5 minutes, margin is 10.
        let stale = TokenSet::from_raw(mint(300), "r").unwrap();
        assert!(!stale.is_fresh(now));

        // Exactly at the margin counts as stale.
        let exact = TokenSet {
            access_token: "t".into(),
            refresh_token: "r".into(),
            expires_at: now + TOKEN_FRESHNESS_MARGIN,
        };
        assert!(!exact.is_fresh(now));
        assert!(exact.is_fresh(now - Duration::from_secs(1)));
    }
}
