//! Venue bearer tokens.
//!
//! A token is a two-part envelope: `base64url(payload).base64url(mac)` where
//! the payload is `{"venueId":..,"name":..,"exp":..}` and the MAC is
//! HMAC-SHA256 over the payload bytes. Tokens are immutable once issued and
//! valid for 365 days.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::TOKEN_VALIDITY_DAYS;
use crate::error::{CoreError, Result};
use crate::types::VenueId;

type HmacSha256 = Hmac<Sha256>;

/// Signed claims carried inside a venue token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    pub venue_id: VenueId,
    pub name: String,
    /// Unix seconds after which the token is rejected.
    pub exp: i64,
}

/// Sign a fresh token for `venue_id` valid for 365 days.
pub fn sign(secret: &str, venue_id: &VenueId, name: &str) -> Result<String> {
    let claims = TokenClaims {
        venue_id: venue_id.clone(),
        name: name.to_string(),
        exp: (Utc::now() + Duration::days(TOKEN_VALIDITY_DAYS)).timestamp(),
    };
    let payload = serde_json::to_vec(&claims)?;
    let mac = mac_over(secret, &payload)?;
    Ok(format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(&payload),
        URL_SAFE_NO_PAD.encode(mac)
    ))
}

/// Verify signature and expiry, returning the claims on success.
pub fn verify(secret: &str, token: &str) -> Result<TokenClaims> {
    let (payload_b64, mac_b64) = token
        .split_once('.')
        .ok_or_else(|| CoreError::Token("malformed token".into()))?;

    let payload = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| CoreError::Token("bad payload encoding".into()))?;
    let presented_mac = URL_SAFE_NO_PAD
        .decode(mac_b64)
        .map_err(|_| CoreError::Token("bad signature encoding".into()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| CoreError::Token("bad secret".into()))?;
    mac.update(&payload);
    mac.verify_slice(&presented_mac)
        .map_err(|_| CoreError::Token("signature mismatch".into()))?;

    let claims: TokenClaims = serde_json::from_slice(&payload)
        .map_err(|_| CoreError::Token("bad claims".into()))?;

    if claims.exp < Utc::now().timestamp() {
        return Err(CoreError::Token("token expired".into()));
    }
    Ok(claims)
}

fn mac_over(secret: &str, payload: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| CoreError::Token("bad secret".into()))?;
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trip() {
        let venue = VenueId::from("v-123");
        let token = sign("s3cret", &venue, "Grace Chapel").unwrap();
        let claims = verify("s3cret", &token).unwrap();
        assert_eq!(claims.venue_id, venue);
        assert_eq!(claims.name, "Grace Chapel");
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = sign("s3cret", &VenueId::from("v-1"), "A").unwrap();
        assert!(verify("other", &token).is_err());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let token = sign("s3cret", &VenueId::from("v-1"), "A").unwrap();
        let (payload, mac) = token.split_once('.').unwrap();
        // Re-encode a different venue id with the original MAC.
        let forged_claims = TokenClaims {
            venue_id: VenueId::from("v-2"),
            name: "A".into(),
            exp: Utc::now().timestamp() + 1000,
        };
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).unwrap());
        assert_ne!(payload, forged_payload);
        assert!(verify("s3cret", &format!("{forged_payload}.{mac}")).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let claims = TokenClaims {
            venue_id: VenueId::from("v-1"),
            name: "A".into(),
            exp: Utc::now().timestamp() - 10,
        };
        let payload = serde_json::to_vec(&claims).unwrap();
        let mac = mac_over("s3cret", &payload).unwrap();
        let token = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(mac)
        );
        assert!(verify("s3cret", &token).is_err());
    }

    #[test]
    fn garbage_is_rejected_without_panic() {
        assert!(verify("s3cret", "not-a-token").is_err());
        assert!(verify("s3cret", "a.b").is_err());
        assert!(verify("s3cret", "").is_err());
    }
}
