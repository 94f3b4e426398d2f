//! Signed session cookies for the operator API
//!
//! Same signing key as the URL tokens (rotation invalidates both at
//! once). The cookie value is `b64url(expiry + "|" + b64url(sig))` with
//! the signature over the expiry string.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Session cookie name
pub const SESSION_COOKIE: &str = "ember_session";

/// Session lifetime in seconds (30 days)
pub const SESSION_MAX_AGE: i64 = 30 * 24 * 60 * 60;

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Create a signed session cookie value
pub fn create_session_value(key: &[u8]) -> String {
    create_session_value_at(key, unix_now() + SESSION_MAX_AGE)
}

fn create_session_value_at(key: &[u8], expiry: i64) -> String {
    let payload = expiry.to_string();
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    let sig = mac.finalize().into_bytes();
    URL_SAFE_NO_PAD.encode(format!("{}|{}", payload, URL_SAFE_NO_PAD.encode(sig)))
}

/// Validate a session cookie value against the signing key
pub fn validate_session_value(key: &[u8], value: &str) -> bool {
    validate_session_value_at(key, value, unix_now())
}

fn validate_session_value_at(key: &[u8], value: &str, now: i64) -> bool {
    if key.is_empty() {
        return false;
    }
    let raw = match URL_SAFE_NO_PAD.decode(value) {
        Ok(r) => r,
        Err(_) => return false,
    };
    let raw = match String::from_utf8(raw) {
        Ok(s) => s,
        Err(_) => return false,
    };
    let (expiry_str, sig_b64) = match raw.split_once('|') {
        Some(parts) => parts,
        None => return false,
    };
    let expiry: i64 = match expiry_str.parse() {
        Ok(e) => e,
        Err(_) => return false,
    };
    if now > expiry {
        return false;
    }
    let sig = match URL_SAFE_NO_PAD.decode(sig_b64) {
        Ok(s) => s,
        Err(_) => return false,
    };

    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(expiry_str.as_bytes());
    mac.verify_slice(&sig).is_ok()
}

/// Set-Cookie header value establishing a session
pub fn session_cookie_header(value: &str) -> String {
    format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        SESSION_COOKIE, value, SESSION_MAX_AGE
    )
}

/// Set-Cookie header value clearing the session
pub fn clear_session_cookie_header() -> String {
    format!("{}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax", SESSION_COOKIE)
}

/// Pull this session cookie's value out of a Cookie request header
pub fn session_from_cookie_header(header: &str) -> Option<&str> {
    header.split(';').find_map(|part| {
        let (name, value) = part.trim().split_once('=')?;
        if name == SESSION_COOKIE {
            Some(value)
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn test_session_roundtrip() {
        let value = create_session_value(KEY);
        assert!(validate_session_value(KEY, &value));
    }

    #[test]
    fn test_expired_session_rejected() {
        let value = create_session_value_at(KEY, unix_now() - 1);
        assert!(!validate_session_value(KEY, &value));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let value = create_session_value(KEY);
        assert!(!validate_session_value(b"other-key-0123456789abcdef012345", &value));
        assert!(!validate_session_value(b"", &value));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(!validate_session_value(KEY, ""));
        assert!(!validate_session_value(KEY, "!!not-base64!!"));
        assert!(!validate_session_value(KEY, &URL_SAFE_NO_PAD.encode("no-separator")));
    }

    #[test]
    fn test_cookie_header_parsing() {
        let header = format!("theme=dark; {}=abc123; lang=en", SESSION_COOKIE);
        assert_eq!(session_from_cookie_header(&header), Some("abc123"));
        assert_eq!(session_from_cookie_header("theme=dark"), None);
    }

    #[test]
    fn test_cookie_headers() {
        let set = session_cookie_header("v");
        assert!(set.starts_with("ember_session=v; "));
        assert!(set.contains("HttpOnly"));

        let clear = clear_session_cookie_header();
        assert!(clear.contains("Max-Age=0"));
    }
}
