//! Bearer-token handling for the event-details API.
//!
//! The token is a JWT scraped from widget markup. Only the expiry claim is
//! read, by base64-decoding the payload segment; the signature is the
//! platform's concern, not ours.

use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Treat tokens as expired this long before their actual expiry, so a token
/// never dies mid-enhancement.
const EXPIRY_MARGIN_SECS: i64 = 600;

const DEFAULT_LIFETIME_SECS: i64 = 3600;

/// A scraped token and its decoded expiry, as cached per tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl ApiToken {
    pub fn new(token: String, now: DateTime<Utc>) -> Self {
        let expires_at = decode_expiry(&token, now);
        ApiToken { token, expires_at }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(EXPIRY_MARGIN_SECS) >= self.expires_at
    }
}

/// Read the `exp` claim out of a JWT's payload segment. Tokens that are not
/// decodable JWTs get a conservative one-hour lifetime.
fn decode_expiry(token: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    let fallback = now + chrono::Duration::seconds(DEFAULT_LIFETIME_SECS);
    let Some(payload) = token.split('.').nth(1) else {
        return fallback;
    };
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| base64::engine::general_purpose::STANDARD.decode(payload));
    let Ok(bytes) = decoded else {
        return fallback;
    };
    let Ok(claims) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
        return fallback;
    };
    claims
        .get("exp")
        .and_then(|v| v.as_i64())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or(fallback)
}
