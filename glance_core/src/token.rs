//! Compact HS256 tokens binding a viewer to one canonical repository path.
//!
//! Tokens carry `repo_path`, `iat` and `exp` claims. They are stateless and
//! cannot be revoked; a token stays usable until `exp` unless the path it
//! names falls outside the approved roots.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use glance_api::ErrorKind;
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Lifetime used when the issuer does not ask for one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);
/// Upper bound applied to requested lifetimes.
pub const MAX_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Shortest secret accepted by process configuration.
pub const MIN_SECRET_LEN: usize = 32;

const ALGORITHM: Algorithm = Algorithm::HS256;

/// HMAC signing key. Never printed, logged or serialized.
#[derive(Clone)]
pub struct Secret(Vec<u8>);

impl Secret {
    /// Wrap raw key material.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Key length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the key is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the key meets [`MIN_SECRET_LEN`].
    #[must_use]
    pub fn is_strong(&self) -> bool {
        self.0.len() >= MIN_SECRET_LEN
    }

    fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_secret(&self.0)
    }

    fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_secret(&self.0)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Claims embedded in every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Canonical absolute repository path.
    pub repo_path: Utf8PathBuf,
    /// Issue time, seconds since the Unix epoch.
    pub iat: i64,
    /// Expiry time, seconds since the Unix epoch.
    pub exp: i64,
}

/// Errors produced while issuing or verifying tokens.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Token is not a compact HS256 token with the expected claims.
    #[error("token is malformed")]
    Malformed,
    /// Token lifetime has elapsed.
    #[error("token has expired")]
    Expired,
    /// Signature does not match the configured secret.
    #[error("token signature does not match")]
    SignatureMismatch,
    /// Path handed to the issuer is not absolute and canonical.
    #[error("path is not absolute and canonical: {path}")]
    InvalidPath {
        /// Offending path.
        path: String,
    },
    /// Requested lifetime is zero or unrepresentable.
    #[error("token lifetime must be at least one second")]
    InvalidTtl,
    /// Encoding the token failed.
    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl TokenError {
    /// Stable public classification of the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Malformed => ErrorKind::TokenMalformed,
            Self::Expired => ErrorKind::TokenExpired,
            Self::SignatureMismatch => ErrorKind::TokenSignatureMismatch,
            Self::InvalidPath { .. } => ErrorKind::InvalidPath,
            Self::InvalidTtl | Self::Signing(_) => ErrorKind::Internal,
        }
    }
}

/// Issue a token for `path` valid for `ttl` from now.
///
/// # Errors
///
/// Returns [`TokenError::InvalidPath`] for relative or non-canonical paths and
/// [`TokenError::InvalidTtl`] for a zero lifetime.
pub fn issue(path: &Utf8Path, secret: &Secret, ttl: Duration) -> Result<String, TokenError> {
    issue_at(path, secret, ttl, Utc::now())
}

/// Issue a token as if the current time were `now`.
///
/// # Errors
///
/// See [`issue`].
pub fn issue_at(
    path: &Utf8Path,
    secret: &Secret,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<String, TokenError> {
    if !is_canonical(path) {
        return Err(TokenError::InvalidPath {
            path: path.to_string(),
        });
    }

    let lifetime = match i64::try_from(ttl.as_secs()) {
        Ok(0) | Err(_) => return Err(TokenError::InvalidTtl),
        Ok(secs) => secs,
    };
    let iat = now.timestamp();
    let exp = iat.checked_add(lifetime).ok_or(TokenError::InvalidTtl)?;

    let claims = Claims {
        repo_path: path.to_owned(),
        iat,
        exp,
    };
    jsonwebtoken::encode(&Header::new(ALGORITHM), &claims, &secret.encoding_key())
        .map_err(|err| TokenError::Signing(err.to_string()))
}

/// Verify `token` against `secret` and return the path it names.
///
/// The returned path must still be confined before use.
///
/// # Errors
///
/// Returns [`TokenError::Malformed`], [`TokenError::SignatureMismatch`] or
/// [`TokenError::Expired`].
pub fn verify(token: &str, secret: &Secret) -> Result<Utf8PathBuf, TokenError> {
    verify_at(token, secret, Utc::now())
}

/// Verify `token` as if the current time were `now`.
///
/// # Errors
///
/// See [`verify`].
pub fn verify_at(
    token: &str,
    secret: &Secret,
    now: DateTime<Utc>,
) -> Result<Utf8PathBuf, TokenError> {
    // Signature is checked (in constant time) before the claims are parsed.
    let data = jsonwebtoken::decode::<Claims>(token, &secret.decoding_key(), &validation())
        .map_err(classify)?;
    let claims = data.claims;

    if !is_canonical(&claims.repo_path) || claims.exp < claims.iat {
        return Err(TokenError::Malformed);
    }
    if now.timestamp() >= claims.exp {
        return Err(TokenError::Expired);
    }

    Ok(claims.repo_path)
}

/// Issuer and verifier sharing one secret and lifetime policy.
#[derive(Debug, Clone)]
pub struct TokenCodec {
    secret: Secret,
    default_ttl: Duration,
    max_ttl: Duration,
}

impl TokenCodec {
    /// Codec using [`DEFAULT_TTL`] and [`MAX_TTL`].
    #[must_use]
    pub const fn new(secret: Secret) -> Self {
        Self {
            secret,
            default_ttl: DEFAULT_TTL,
            max_ttl: MAX_TTL,
        }
    }

    /// Override the lifetime used by [`TokenCodec::issue`].
    #[must_use]
    pub const fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Override the lifetime cap.
    #[must_use]
    pub const fn with_max_ttl(mut self, ttl: Duration) -> Self {
        self.max_ttl = ttl;
        self
    }

    /// Lifetime used by [`TokenCodec::issue`], after clamping.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.clamp(self.default_ttl)
    }

    /// Issue a token with the default lifetime.
    ///
    /// # Errors
    ///
    /// See [`issue`].
    pub fn issue(&self, path: &Utf8Path) -> Result<String, TokenError> {
        self.issue_with_ttl(path, self.default_ttl)
    }

    /// Issue a token with `ttl`, clamped to the configured maximum.
    ///
    /// # Errors
    ///
    /// See [`issue`].
    pub fn issue_with_ttl(&self, path: &Utf8Path, ttl: Duration) -> Result<String, TokenError> {
        issue(path, &self.secret, self.clamp(ttl))
    }

    /// Issue a token with `ttl` as if the current time were `now`.
    ///
    /// # Errors
    ///
    /// See [`issue`].
    pub fn issue_at(
        &self,
        path: &Utf8Path,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        issue_at(path, &self.secret, self.clamp(ttl), now)
    }

    /// Verify a token against the codec's secret.
    ///
    /// # Errors
    ///
    /// See [`verify`].
    pub fn verify(&self, token: &str) -> Result<Utf8PathBuf, TokenError> {
        verify(token, &self.secret)
    }

    /// Verify a token as if the current time were `now`.
    ///
    /// # Errors
    ///
    /// See [`verify`].
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Utf8PathBuf, TokenError> {
        verify_at(token, &self.secret, now)
    }

    fn clamp(&self, ttl: Duration) -> Duration {
        ttl.min(self.max_ttl)
    }
}

fn validation() -> Validation {
    let mut validation = Validation::new(ALGORITHM);
    // Expiry is checked against the caller's clock in `verify_at`.
    validation.validate_exp = false;
    validation.required_spec_claims = HashSet::new();
    validation
}

fn classify(error: jsonwebtoken::errors::Error) -> TokenError {
    match error.kind() {
        JwtErrorKind::InvalidSignature => TokenError::SignatureMismatch,
        JwtErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Malformed,
    }
}

fn is_canonical(path: &Utf8Path) -> bool {
    if !path.is_absolute() || path.as_str().contains('\0') {
        return false;
    }
    if path
        .components()
        .any(|component| matches!(component, Utf8Component::CurDir | Utf8Component::ParentDir))
    {
        return false;
    }
    // `components()` hides interior `.`, doubled and trailing separators.
    let rebuilt: Utf8PathBuf = path.components().collect();
    rebuilt.as_str() == path.as_str()
}
