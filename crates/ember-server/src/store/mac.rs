//! MAC address normalization
//!
//! MAC is the primary external identity of a machine; every boot-time
//! lookup goes through the canonical form `aa:bb:cc:dd:ee:ff`.

use super::{Result, StoreError};

/// Normalise a MAC address to lowercase colon-separated form. Accepts
/// colon, dash and dot separators as firmware and operators write them.
pub fn normalize_mac(mac: &str) -> Result<String> {
    let trimmed = mac.trim().to_lowercase();
    let hex: String = trimmed
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .collect();

    if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(StoreError::InvalidMac(mac.to_string()));
    }

    Ok(format!(
        "{}:{}:{}:{}:{}:{}",
        &hex[0..2],
        &hex[2..4],
        &hex[4..6],
        &hex[6..8],
        &hex[8..10],
        &hex[10..12]
    ))
}
