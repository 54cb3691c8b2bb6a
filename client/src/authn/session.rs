//! Session tokens

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use openapi_client::models::TokenPair;

use crate::errors::SyncError;

/// Access token claims the client cares about
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user email)
    #[serde(default)]
    pub sub: Option<String>,

    /// Expiration timestamp (seconds)
    #[serde(default)]
    pub exp: Option<i64>,

    /// Token kind, `access` or `refresh`
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl AccessClaims {
    /// Decode the claims of a JWT.
    /// Note: This does NOT validate the signature; the client never holds the server secret
    pub fn decode(raw: &str) -> Result<Self, SyncError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let token_data = decode::<AccessClaims>(raw, &DecodingKey::from_secret(b""), &validation)
            .map_err(|e| SyncError::TokenError(format!("Failed to decode token: {}", e)))?;

        Ok(token_data.claims)
    }
}

/// An authenticated session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Bearer token for API calls
    pub access_token: String,

    /// Token used to obtain a new pair
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Authoritative expiry of `access_token` (Unix epoch millis)
    pub expires_at_millis: i64,
}

impl Session {
    /// Build a session from a freshly issued token pair. The expiry comes from
    /// the access token's `exp` claim; a token without one is rejected.
    pub fn from_token_pair(pair: TokenPair) -> Result<Self, SyncError> {
        let claims = AccessClaims::decode(&pair.access_token)?;
        let exp = claims
            .exp
            .ok_or_else(|| SyncError::TokenError("Access token has no exp claim".to_string()))?;

        let refresh_token = if pair.refresh_token.is_empty() {
            None
        } else {
            Some(pair.refresh_token)
        };

        Ok(Self {
            access_token: pair.access_token,
            refresh_token,
            expires_at_millis: exp.saturating_mul(1000),
        })
    }

    /// Usable for a call starting at `now_millis` that must not outlive the token
    pub fn is_fresh(&self, now_millis: i64, skew_margin: Duration) -> bool {
        now_millis < self.expires_at_millis - skew_margin.as_millis() as i64
    }

    /// Whole seconds until expiry, floored at zero
    pub fn seconds_remaining(&self, now_millis: i64) -> i64 {
        ((self.expires_at_millis - now_millis) / 1000).max(0)
    }

    /// Get expiration time
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.expires_at_millis).unwrap_or_else(Utc::now)
    }
}
