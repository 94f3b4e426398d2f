//! Expiring HMAC URL tokens
//!
//! Booting firmware cannot carry cookies, so every artifact URL embedded
//! in a boot script is signed: the token binds the URL *path* (query
//! excluded) to a unix expiry with HMAC-SHA256 under the shared signing
//! key.
//!
//! Token layout, preserved exactly for compatibility with boot scripts
//! machines may have cached:
//!
//! ```text
//! payload = "{expiry}|{path}"
//! sig     = HMAC-SHA256(key, payload)
//! tok     = b64url_nopad("{expiry}." + b64url_nopad(sig))
//! ```
//!
//! The expiry ends up base64-wrapped twice; redundant, but the shape is
//! load-bearing for previously issued scripts.
//!
//! With no signing key configured (operator never set a password), signing
//! returns the URL unchanged and verification accepts anything; boot must
//! keep working on a fresh install.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Token lifetime in seconds (1 hour)
pub const TOKEN_EXPIRY_SECS: i64 = 3600;

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn compute_sig(key: &[u8], expiry: i64, path: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(format!("{}|{}", expiry, path).as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn token_for(key: &[u8], expiry: i64, path: &str) -> String {
    let sig = compute_sig(key, expiry, path);
    let inner = format!("{}.{}", expiry, URL_SAFE_NO_PAD.encode(sig));
    URL_SAFE_NO_PAD.encode(inner)
}

/// Append a `tok=` parameter signing the URL's path with the default
/// expiry. `key = None` (auth not configured) returns the URL unchanged.
pub fn sign_url(key: Option<&[u8]>, raw_url: &str) -> String {
    sign_url_at(key, raw_url, unix_now() + TOKEN_EXPIRY_SECS)
}

/// Sign with an explicit expiry timestamp
pub fn sign_url_at(key: Option<&[u8]>, raw_url: &str, expiry: i64) -> String {
    let key = match key {
        Some(k) if !k.is_empty() => k,
        _ => return raw_url.to_string(),
    };

    // The signature covers the path only; split off any existing query
    let (path, query) = match raw_url.find('?') {
        Some(i) => (&raw_url[..i], Some(&raw_url[i + 1..])),
        None => (raw_url, None),
    };

    let token = token_for(key, expiry, path);
    match query {
        Some(q) => format!("{}?{}&tok={}", path, q, token),
        None => format!("{}?tok={}", raw_url, token),
    }
}

/// Verify a token against the request path. `key = None` accepts
/// everything (auth disabled).
pub fn verify_token(key: Option<&[u8]>, path: &str, token: &str) -> bool {
    verify_token_at(key, path, token, unix_now())
}

fn verify_token_at(key: Option<&[u8]>, path: &str, token: &str, now: i64) -> bool {
    let key = match key {
        Some(k) if !k.is_empty() => k,
        _ => return true,
    };

    let decoded = match URL_SAFE_NO_PAD.decode(token) {
        Ok(d) => d,
        Err(_) => return false,
    };
    let decoded = match String::from_utf8(decoded) {
        Ok(s) => s,
        Err(_) => return false,
    };

    let (expiry_str, sig_b64) = match decoded.split_once('.') {
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

    // Constant-time comparison via the Mac verifier
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(format!("{}|{}", expiry, path).as_bytes());
    mac.verify_slice(&sig).is_ok()
}

/// Pull the `tok` parameter out of a raw query string
pub fn token_from_query(query: Option<&str>) -> Option<String> {
    let query = query?;
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("tok=") {
            return Some(value.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn extract_token(url: &str) -> String {
        token_from_query(url.split_once('?').map(|(_, q)| q)).unwrap()
    }

    #[test]
    fn test_sign_then_verify() {
        let signed = sign_url(Some(KEY), "http://10.0.0.2/images/3/file/vmlinuz");
        assert!(signed.contains("?tok="));

        let token = extract_token(&signed);
        assert!(verify_token(Some(KEY), "/images/3/file/vmlinuz", &token));
    }

    #[test]
    fn test_signature_binds_path() {
        let signed = sign_url(Some(KEY), "http://10.0.0.2/images/3/file/vmlinuz");
        let token = extract_token(&signed);

        assert!(!verify_token(Some(KEY), "/images/3/file/initrd.img", &token));
        assert!(!verify_token(Some(KEY), "/images/4/file/vmlinuz", &token));
    }

    #[test]
    fn test_existing_query_preserved() {
        let signed = sign_url(Some(KEY), "http://10.0.0.2/boot.ipxe?mac=aa:bb:cc:dd:ee:ff");
        assert!(signed.starts_with("http://10.0.0.2/boot.ipxe?mac=aa:bb:cc:dd:ee:ff&tok="));

        // Query is not part of the signed payload: path alone verifies
        let token = extract_token(&signed);
        assert!(verify_token(Some(KEY), "/boot.ipxe", &token));
    }

    #[test]
    fn test_expired_token_rejected() {
        let expired = sign_url_at(Some(KEY), "http://10.0.0.2/config/1", unix_now() - 10);
        let token = extract_token(&expired);
        assert!(!verify_token(Some(KEY), "/config/1", &token));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let signed = sign_url(Some(KEY), "http://10.0.0.2/config/1");
        let token = extract_token(&signed);
        assert!(!verify_token(Some(b"another-key-entirely-32-bytes!!!"), "/config/1", &token));
    }

    #[test]
    fn test_garbage_tokens_rejected() {
        assert!(!verify_token(Some(KEY), "/x", ""));
        assert!(!verify_token(Some(KEY), "/x", "not-base64!!!"));
        assert!(!verify_token(Some(KEY), "/x", &URL_SAFE_NO_PAD.encode("no-dot-here")));
        assert!(!verify_token(Some(KEY), "/x", &URL_SAFE_NO_PAD.encode("nan.c2ln")));
    }

    #[test]
    fn test_absent_key_degrades_open() {
        // No key: signing is the identity, verification accepts anything
        let url = "http://10.0.0.2/images/3/file/vmlinuz";
        assert_eq!(sign_url(None, url), url);
        assert_eq!(sign_url(Some(b""), url), url);
        assert!(verify_token(None, "/anything", "whatever"));
        assert!(verify_token(None, "/anything", ""));
    }

    #[test]
    fn test_token_shape_double_wraps_expiry() {
        // The outer token decodes to "expiry.b64(sig)", the documented
        // legacy shape old boot scripts depend on
        let expiry = unix_now() + 60;
        let signed = sign_url_at(Some(KEY), "http://h/p", expiry);
        let token = extract_token(&signed);

        let decoded = String::from_utf8(URL_SAFE_NO_PAD.decode(&token).unwrap()).unwrap();
        let (exp_str, sig_b64) = decoded.split_once('.').unwrap();
        assert_eq!(exp_str, expiry.to_string());
        assert_eq!(URL_SAFE_NO_PAD.decode(sig_b64).unwrap().len(), 32);
    }

    #[test]
    fn test_token_from_query() {
        assert_eq!(token_from_query(Some("tok=abc")), Some("abc".to_string()));
        assert_eq!(token_from_query(Some("mac=x&tok=abc")), Some("abc".to_string()));
        assert_eq!(token_from_query(Some("mac=x")), None);
        assert_eq!(token_from_query(None), None);
    }
}
