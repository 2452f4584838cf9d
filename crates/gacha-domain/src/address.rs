pub use ethabi::Address;

use crate::errors::DomainError;

/// Parses a 20-byte account address written as 40 hex digits, with or
/// without the `0x` marker.
pub fn parse_address(raw: &str) -> Result<Address, DomainError> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.len() != 40 {
        return Err(DomainError::InvalidAddress(format!(
            "expected 40 hex digits, got {} in {raw:?}",
            digits.len()
        )));
    }
    let bytes = hex::decode(digits)
        .map_err(|e| DomainError::InvalidAddress(format!("{raw:?}: {e}")))?;
    Ok(Address::from_slice(&bytes))
}

#[must_use]
pub fn format_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_bytes()))
}
