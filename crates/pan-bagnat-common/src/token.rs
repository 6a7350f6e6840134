//! Short-lived module access token.
//!
//! The backend hands the browser a token the page proxy can verify without
//! a shared session store on the module subdomain:
//! `base64url(payload_json) + "." + base64url(HMAC-SHA256(payload_json))`
//! where the payload is `{sid, slug, iat, exp, n}` and `n` is a fresh
//! 256-bit nonce.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::Error;

type HmacSha256 = Hmac<Sha256>;

/// Default token lifetime when the env knob is absent.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);
/// Lifetimes below this are clamped up.
pub const MIN_TTL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandoffClaims {
    pub sid: String,
    pub slug: String,
    pub iat: i64,
    pub exp: i64,
    pub n: String,
}

fn mac(secret: &str, payload: &[u8]) -> Result<HmacSha256, Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| Error::ModuleAccessSecretMissing)?;
    mac.update(payload);
    Ok(mac)
}

/// Produce a signed handoff token for `(session_id, slug)`.
pub fn generate(secret: &str, session_id: &str, slug: &str, ttl: Duration) -> Result<String, Error> {
    if secret.is_empty() {
        return Err(Error::ModuleAccessSecretMissing);
    }
    if session_id.is_empty() || slug.is_empty() {
        return Err(Error::InvalidInput(
            "session id and slug are required".to_string(),
        ));
    }
    let ttl = ttl.max(MIN_TTL);

    let mut nonce = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut nonce);

    let iat = Utc::now().timestamp();
    let claims = HandoffClaims {
        sid: session_id.to_string(),
        slug: slug.to_string(),
        iat,
        exp: iat + ttl.as_secs() as i64,
        n: URL_SAFE_NO_PAD.encode(nonce),
    };
    let payload =
        serde_json::to_vec(&claims).map_err(|e| Error::Internal(format!("claims encode: {e}")))?;
    let sig = mac(secret, &payload)?.finalize().into_bytes();

    Ok(format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(&payload),
        URL_SAFE_NO_PAD.encode(sig)
    ))
}

/// Verify a handoff token and return its claims.
///
/// Signature comparison is constant time; any byte flip in payload or
/// signature, an expired `exp`, or `iat > exp` is rejected.
pub fn verify(secret: &str, token: &str) -> Result<HandoffClaims, Error> {
    if secret.is_empty() {
        return Err(Error::ModuleAccessSecretMissing);
    }
    let invalid = || Error::InvalidInput("invalid module access token".to_string());

    let (payload_b64, sig_b64) = token.split_once('.').ok_or_else(invalid)?;
    let payload = URL_SAFE_NO_PAD.decode(payload_b64).map_err(|_| invalid())?;
    let sig = URL_SAFE_NO_PAD.decode(sig_b64).map_err(|_| invalid())?;

    mac(secret, &payload)?
        .verify_slice(&sig)
        .map_err(|_| invalid())?;

    let claims: HandoffClaims = serde_json::from_slice(&payload).map_err(|_| invalid())?;
    if claims.iat > claims.exp {
        return Err(invalid());
    }
    if Utc::now().timestamp() > claims.exp {
        return Err(invalid());
    }
    Ok(claims)
}

/// Parse a Go-style duration string: `90s`, `5m`, `1h30m`, `1500ms`.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let mut total = Duration::ZERO;
    let mut num = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            num.push(c);
            continue;
        }
        let mut unit = c.to_string();
        if c == 'm' && chars.peek() == Some(&'s') {
            chars.next();
            unit.push('s');
        }
        let value: f64 = num.parse().ok()?;
        num.clear();
        let secs = match unit.as_str() {
            "ms" => value / 1000.0,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3600.0,
            _ => return None,
        };
        total += Duration::from_secs_f64(secs);
    }
    if !num.is_empty() {
        return None; // trailing number without a unit
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn test_generate_verify_roundtrip() {
        let token = generate(SECRET, "sess-1", "app", DEFAULT_TTL).unwrap();
        let claims = verify(SECRET, &token).unwrap();
        assert_eq!(claims.sid, "sess-1");
        assert_eq!(claims.slug, "app");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_generate_requires_secret_and_inputs() {
        assert!(matches!(
            generate("", "sess", "app", DEFAULT_TTL),
            Err(Error::ModuleAccessSecretMissing)
        ));
        assert!(matches!(
            generate(SECRET, "", "app", DEFAULT_TTL),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            generate(SECRET, "sess", "", DEFAULT_TTL),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_ttl_floor() {
        let token = generate(SECRET, "sess", "app", Duration::ZERO).unwrap();
        let claims = verify(SECRET, &token).unwrap();
        assert!(claims.exp >= claims.iat + 1);
    }

    #[test]
    fn test_payload_tamper_rejected() {
        let token = generate(SECRET, "sess", "app", DEFAULT_TTL).unwrap();
        let (payload, sig) = token.split_once('.').unwrap();
        let mut bytes = URL_SAFE_NO_PAD.decode(payload).unwrap();
        bytes[10] ^= 0x01;
        let tampered = format!("{}.{}", URL_SAFE_NO_PAD.encode(bytes), sig);
        assert!(verify(SECRET, &tampered).is_err());
    }

    #[test]
    fn test_signature_tamper_rejected() {
        let token = generate(SECRET, "sess", "app", DEFAULT_TTL).unwrap();
        let (payload, sig) = token.split_once('.').unwrap();
        let mut bytes = URL_SAFE_NO_PAD.decode(sig).unwrap();
        bytes[0] ^= 0x80;
        let tampered = format!("{}.{}", payload, URL_SAFE_NO_PAD.encode(bytes));
        assert!(verify(SECRET, &tampered).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = generate(SECRET, "sess", "app", DEFAULT_TTL).unwrap();
        assert!(verify("other-secret", &token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        // Forge a token whose exp already passed, signed with the real key.
        let iat = Utc::now().timestamp() - 120;
        let claims = HandoffClaims {
            sid: "sess".into(),
            slug: "app".into(),
            iat,
            exp: iat + 1,
            n: "n".into(),
        };
        let payload = serde_json::to_vec(&claims).unwrap();
        let sig = mac(SECRET, &payload).unwrap().finalize().into_bytes();
        let token = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(sig)
        );
        assert!(verify(SECRET, &token).is_err());
    }

    #[test]
    fn test_iat_after_exp_rejected() {
        let now = Utc::now().timestamp();
        let claims = HandoffClaims {
            sid: "sess".into(),
            slug: "app".into(),
            iat: now + 600,
            exp: now + 60,
            n: "n".into(),
        };
        let payload = serde_json::to_vec(&claims).unwrap();
        let sig = mac(SECRET, &payload).unwrap().finalize().into_bytes();
        let token = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(sig)
        );
        assert!(verify(SECRET, &token).is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("1500ms"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration("10"), None);
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("5x"), None);
    }
}
