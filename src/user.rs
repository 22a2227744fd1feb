use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};

use crate::config::FaucetConfig;

pub const MAX_ADDRESS_LEN: usize = 128;
pub const WALLET_ADDRESS_BYTES: usize = 20;
pub const GIVEAWAY_ID_BYTES: usize = 12;
pub const MAX_EMAIL_LEN: usize = 320;

/// Canonical form of an identity key. Every stored and compared address goes
/// through here.
pub fn canonical_address(value: &str) -> String {
    value.to_lowercase()
}

/// Trims, bounds and lowercases an address handed in by a caller.
pub fn sanitize_address(value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("Wallet address cannot be empty"));
    }
    if trimmed.len() > MAX_ADDRESS_LEN {
        return Err(anyhow!(
            "Wallet address exceeds {MAX_ADDRESS_LEN} character limit"
        ));
    }
    Ok(canonical_address(trimmed))
}

/// Accepts only `0x`-prefixed 20-byte hex wallet addresses, in any case.
pub fn parse_wallet_address(value: &str) -> Result<String> {
    let sanitized = sanitize_address(value)?;
    let digits = sanitized
        .strip_prefix("0x")
        .ok_or_else(|| anyhow!("Wallet address must start with 0x"))?;
    let bytes =
        hex::decode(digits).map_err(|err| anyhow!("Failed to decode wallet address: {err}"))?;
    if bytes.len() != WALLET_ADDRESS_BYTES {
        return Err(anyhow!(
            "Wallet address must be {WALLET_ADDRESS_BYTES} bytes, got {}",
            bytes.len()
        ));
    }
    Ok(sanitized)
}

/// Giveaway references are 12-byte object ids rendered as 24 hex characters.
pub fn parse_giveaway_id(value: &str) -> Result<String> {
    let trimmed = value.trim();
    let bytes = hex::decode(trimmed)
        .map_err(|err| anyhow!("Failed to decode giveaway id as hex: {err}"))?;
    if bytes.len() != GIVEAWAY_ID_BYTES {
        return Err(anyhow!(
            "Giveaway id must be {GIVEAWAY_ID_BYTES} bytes, got {}",
            bytes.len()
        ));
    }
    Ok(trimmed.to_ascii_lowercase())
}

pub fn canonicalize_email(value: &str) -> Result<Option<String>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.len() > MAX_EMAIL_LEN {
        return Err(anyhow!("Email exceeds {MAX_EMAIL_LEN} character limit"));
    }
    if !trimmed.contains('@') {
        return Err(anyhow!("Email must contain an @"));
    }
    Ok(Some(trimmed.to_string()))
}

/// Whether a user may ask the faucet for tokens at `now`.
///
/// A user who never asked is eligible as long as the faucet is on. Otherwise
/// at least `faucet.cooldown()` must have passed since the last request; the
/// boundary itself counts as elapsed.
pub fn can_request_faucet_tokens(
    last_requested_at: Option<DateTime<Utc>>,
    faucet: &FaucetConfig,
    now: DateTime<Utc>,
) -> bool {
    if !faucet.enabled {
        return false;
    }
    match last_requested_at {
        None => true,
        Some(last) => now.signed_duration_since(last) >= faucet.cooldown(),
    }
}

/// The instant the cooldown ends, or `None` when the user may request now or
/// the faucet is off.
pub fn next_faucet_eligibility(
    last_requested_at: Option<DateTime<Utc>>,
    faucet: &FaucetConfig,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if !faucet.enabled || can_request_faucet_tokens(last_requested_at, faucet, now) {
        return None;
    }
    last_requested_at.map(|last| last + faucet.cooldown())
}
