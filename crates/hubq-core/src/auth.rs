//! Caller authorization for the control gateway.
//!
//! Every gateway operation presents an optional bearer credential. The check
//! happens before any job lookup and fails closed.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::HubqError;

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
}

pub trait Authorizer: Send + Sync {
    /// Validate `credential` (a bearer token, optionally prefixed with `Bearer `).
    fn authorize(&self, credential: Option<&str>) -> Result<Principal, HubqError>;
}

/// Claims carried by hubq tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    /// Expiry (Unix seconds). Tokens without one do not expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    pub iat: u64,
}

/// HS256 bearer tokens signed with a shared secret.
pub struct JwtAuthorizer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtAuthorizer {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::default();
        validation.set_required_spec_claims(&["sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Mint a token for `subject`, valid for `ttl` (or forever).
    pub fn issue(&self, subject: &str, ttl: Option<Duration>) -> Result<String, HubqError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let claims = Claims {
            sub: subject.to_string(),
            exp: ttl.map(|t| now + t.as_secs()),
            iat: now,
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| HubqError::Internal(format!("token encoding: {e}")))
    }
}

impl Authorizer for JwtAuthorizer {
    fn authorize(&self, credential: Option<&str>) -> Result<Principal, HubqError> {
        let token = credential
            .map(str::trim)
            .map(|c| c.strip_prefix("Bearer ").unwrap_or(c).trim())
            .filter(|c| !c.is_empty())
            .ok_or(HubqError::Authorization)?;
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "credential rejected");
            HubqError::Authorization
        })?;
        if data.claims.sub.is_empty() {
            return Err(HubqError::Authorization);
        }
        Ok(Principal {
            subject: data.claims.sub,
        })
    }
}
