//! Signed, self-contained tokens
//!
//! Every token class (authorization code, access token, refresh token) is an
//! HS256 JWT carrying the same claims. Classes differ only in lifetime and,
//! when configured, in the key that signs them. Nothing is stored server-side:
//! a token is valid if its signature checks out and it has not expired.

use std::fmt;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::TokenConfig;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
    #[error("Lifetime for {0} tokens must be a positive number of seconds")]
    InvalidLifetime(TokenClass),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenClass {
    AuthorizationCode,
    Access,
    Refresh,
}

impl TokenClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload embedded in every token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub client_id: String,
    /// The redirect URI presented when the token was minted
    pub redirect_uri: String,
    #[serde(rename = "iat", with = "chrono::serde::ts_seconds")]
    pub issued_at: DateTime<Utc>,
    #[serde(rename = "exp", with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
}

impl Claims {
    /// Whole seconds left before expiry, measured against `now` rounded down
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from(self.expires_at.timestamp() - now.timestamp()).unwrap_or(0)
    }
}

/// Symmetric HS256 key material for one token class
#[derive(Clone)]
struct SigningKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKey {
    fn generate() -> Self {
        let mut secret = [0u8; 32];
        rand::rng().fill(&mut secret);
        Self {
            encoding: EncodingKey::from_secret(&secret),
            decoding: DecodingKey::from_secret(&secret),
        }
    }
}

struct ClassKeys {
    authorization_code: SigningKey,
    access: SigningKey,
    refresh: SigningKey,
}

impl ClassKeys {
    fn shared() -> Self {
        let key = SigningKey::generate();
        Self {
            authorization_code: key.clone(),
            access: key.clone(),
            refresh: key,
        }
    }

    fn per_class() -> Self {
        Self {
            authorization_code: SigningKey::generate(),
            access: SigningKey::generate(),
            refresh: SigningKey::generate(),
        }
    }

    fn get(&self, class: TokenClass) -> &SigningKey {
        match class {
            TokenClass::AuthorizationCode => &self.authorization_code,
            TokenClass::Access => &self.access,
            TokenClass::Refresh => &self.refresh,
        }
    }
}

struct Lifetimes {
    authorization_code: Duration,
    access: Duration,
    refresh: Duration,
}

impl Lifetimes {
    fn from_config(tokens: &TokenConfig) -> Result<Self, CodecError> {
        let duration = |class: TokenClass, secs: u64| {
            i64::try_from(secs)
                .ok()
                .filter(|secs| *secs > 0)
                .and_then(Duration::try_seconds)
                .ok_or(CodecError::InvalidLifetime(class))
        };

        Ok(Self {
            authorization_code: duration(
                TokenClass::AuthorizationCode,
                tokens.authorization_code_lifetime_secs,
            )?,
            access: duration(TokenClass::Access, tokens.access_token_lifetime_secs)?,
            refresh: duration(TokenClass::Refresh, tokens.refresh_token_lifetime_secs)?,
        })
    }
}

/// Issues and verifies tokens with keys generated at construction.
///
/// The keys never leave this struct; they die with the process, so tokens do
/// not survive a restart.
pub struct TokenCodec {
    keys: ClassKeys,
    lifetimes: Lifetimes,
    header: Header,
    validation: Validation,
}

impl TokenCodec {
    /// Create a codec with freshly generated keys
    pub fn new(tokens: &TokenConfig) -> Result<Self, CodecError> {
        let keys = if tokens.separate_class_keys {
            ClassKeys::per_class()
        } else {
            ClassKeys::shared()
        };

        // Expiry is checked against the caller's clock in `verify`, with no leeway
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;

        Ok(Self {
            keys,
            lifetimes: Lifetimes::from_config(tokens)?,
            header: Header::new(Algorithm::HS256),
            validation,
        })
    }

    pub fn lifetime(&self, class: TokenClass) -> Duration {
        match class {
            TokenClass::AuthorizationCode => self.lifetimes.authorization_code,
            TokenClass::Access => self.lifetimes.access,
            TokenClass::Refresh => self.lifetimes.refresh,
        }
    }

    /// Sign a token of `class` issued at `now`
    pub fn mint(
        &self,
        class: TokenClass,
        client_id: &str,
        redirect_uri: &str,
        now: DateTime<Utc>,
    ) -> Result<String, CodecError> {
        let issued_at = now.trunc_subsecs(0);
        let expires_at = issued_at
            .checked_add_signed(self.lifetime(class))
            .ok_or(CodecError::InvalidLifetime(class))?;
        let claims = Claims {
            client_id: client_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
            issued_at,
            expires_at,
        };

        Ok(encode(&self.header, &claims, &self.keys.get(class).encoding)?)
    }

    /// Check signature and expiry, returning the claims of a valid token.
    ///
    /// A token is valid strictly before its `exp`. Bad signatures, malformed
    /// input and expired tokens all yield `None`.
    pub fn verify(&self, class: TokenClass, token: &str, now: DateTime<Utc>) -> Option<Claims> {
        let claims = match decode::<Claims>(token, &self.keys.get(class).decoding, &self.validation)
        {
            Ok(data) => data.claims,
            Err(e) => {
                tracing::debug!("Rejected {} token: {}", class, e);
                return None;
            }
        };

        if now >= claims.expires_at {
            tracing::debug!(
                "Rejected {} token for client {}: expired at {}",
                class,
                claims.client_id,
                claims.expires_at
            );
            return None;
        }

        Some(claims)
    }

    pub fn verify_now(&self, class: TokenClass, token: &str) -> Option<Claims> {
        self.verify(class, token, Utc::now())
    }
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("authorization_code_lifetime", &self.lifetimes.authorization_code)
            .field("access_lifetime", &self.lifetimes.access)
            .field("refresh_lifetime", &self.lifetimes.refresh)
            .finish_non_exhaustive()
    }
}
