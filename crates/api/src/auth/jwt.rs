//! Stateless signing and verification of bearer tokens
//!
//! The codec is pure: it never consults the session store, so a verified
//! signature proves only "issued by us", not "still a live session". Liveness
//! is the middleware's concern.

use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Discriminates access tokens from refresh tokens inside the claims
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Signed token payload
///
/// `iat` plus the random `jti` make every issued token value unique even when
/// two tokens for the same subject are minted in the same millisecond. The
/// signature, not the uniqueness, remains the integrity mechanism.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Owning account id
    pub sub: Uuid,
    /// Role strings; carried by access tokens only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorities: Vec<String>,
    pub kind: TokenKind,
    /// Issue time, epoch seconds
    pub iat: i64,
    /// Expiry, epoch seconds, exclusive
    pub exp: i64,
    pub jti: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenCodecError {
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token is expired")]
    Expired,
    #[error("token is malformed")]
    Malformed,
}

impl From<TokenCodecError> for crate::error::ApiError {
    /// Codec failures reaching the manager are signing-side faults; the
    /// middleware maps verification failures to [`crate::error::TokenError`]
    /// explicitly instead of using this conversion.
    fn from(err: TokenCodecError) -> Self {
        crate::error::ApiError::Internal(err.to_string())
    }
}

/// HS256 codec around a single process-wide symmetric key
///
/// Constructed once at startup from configuration and passed by reference;
/// there is no ambient global key slot, and the key material itself is never
/// logged or echoed into error payloads.
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenCodec {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Mint a signed token expiring `ttl` from now
    ///
    /// Authorities are embedded for access tokens only; refresh tokens carry
    /// just the subject.
    pub fn issue(
        &self,
        subject: Uuid,
        authorities: &[String],
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<String, TokenCodecError> {
        self.issue_at(subject, authorities, kind, ttl, OffsetDateTime::now_utc())
    }

    pub(crate) fn issue_at(
        &self,
        subject: Uuid,
        authorities: &[String],
        kind: TokenKind,
        ttl: Duration,
        now: OffsetDateTime,
    ) -> Result<String, TokenCodecError> {
        let claims = Claims {
            sub: subject,
            authorities: match kind {
                TokenKind::Access => authorities.to_vec(),
                TokenKind::Refresh => Vec::new(),
            },
            kind,
            iat: now.unix_timestamp(),
            exp: (now + ttl).unix_timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|_| TokenCodecError::Malformed)
    }

    /// Verify signature and expiry against the current clock
    pub fn verify(&self, token: &str) -> Result<Claims, TokenCodecError> {
        self.verify_at(token, OffsetDateTime::now_utc())
    }

    /// Verify signature and expiry against an explicit clock
    ///
    /// Expiry is exclusive: a token checked at exactly `exp` is expired. The
    /// clock is always the verifier's own, never a caller-supplied claim.
    pub fn verify_at(&self, token: &str, now: OffsetDateTime) -> Result<Claims, TokenCodecError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked below with exclusive semantics and no leeway
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|err| {
            match err.kind() {
                ErrorKind::InvalidSignature => TokenCodecError::InvalidSignature,
                _ => TokenCodecError::Malformed,
            }
        })?;

        if data.claims.exp <= now.unix_timestamp() {
            return Err(TokenCodecError::Expired);
        }

        Ok(data.claims)
    }
}
