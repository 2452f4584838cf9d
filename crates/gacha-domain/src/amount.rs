use ethabi::ethereum_types::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Token quantity in the token's smallest unit. Always fits in 256 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RewardAmount(U256);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount exceeds 256 bits")]
    Overflow,
    #[error("invalid amount {0:?}")]
    Invalid(String),
}

impl RewardAmount {
    pub const ZERO: Self = Self(U256([0; 4]));

    #[must_use]
    pub fn from_base_units(value: U256) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn from_u128(value: u128) -> Self {
        Self(U256::from(value))
    }

    /// Big-endian magnitude of any width; leading zero bytes are ignored.
    pub fn from_be_bytes(bytes: &[u8]) -> Result<Self, AmountError> {
        let first_significant = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        let significant = &bytes[first_significant..];
        if significant.len() > 32 {
            return Err(AmountError::Overflow);
        }
        Ok(Self(U256::from_big_endian(significant)))
    }

    /// Parses a decimal integer already expressed in base units.
    pub fn parse_base_units(raw: &str) -> Result<Self, AmountError> {
        let digits = raw.trim();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountError::Invalid(raw.to_string()));
        }
        U256::from_dec_str(digits)
            .map(Self)
            .map_err(|_| AmountError::Overflow)
    }

    /// Scales a decimal token quantity such as `"10"` or `"2.5"` by
    /// `10^decimals`.
    pub fn from_whole_tokens(raw: &str, decimals: u8) -> Result<Self, AmountError> {
        let trimmed = raw.trim();
        let (whole, fraction) = match trimmed.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (trimmed, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(AmountError::Invalid(raw.to_string()));
        }
        if fraction.len() > usize::from(decimals) {
            return Err(AmountError::Invalid(format!(
                "{raw}: more than {decimals} fractional digits"
            )));
        }
        let mut digits = String::with_capacity(whole.len() + usize::from(decimals));
        digits.push_str(if whole.is_empty() { "0" } else { whole });
        digits.push_str(fraction);
        for _ in fraction.len()..usize::from(decimals) {
            digits.push('0');
        }
        Self::parse_base_units(&digits).map_err(|err| match err {
            AmountError::Invalid(_) => AmountError::Invalid(raw.to_string()),
            other => other,
        })
    }

    #[must_use]
    pub fn as_u256(self) -> U256 {
        self.0
    }

    #[must_use]
    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    /// 32-byte big-endian word, left-padded with zeros.
    #[must_use]
    pub fn to_be_word(self) -> [u8; 32] {
        let mut word = [0_u8; 32];
        self.0.to_big_endian(&mut word);
        word
    }
}

impl std::fmt::Display for RewardAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for RewardAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RewardAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse_base_units(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_tokens_scale_by_decimals() {
        let ten = RewardAmount::from_whole_tokens("10", 18).expect("ten tokens");
        assert_eq!(
            ten,
            RewardAmount::parse_base_units("10000000000000000000").expect("base units")
        );
        let half = RewardAmount::from_whole_tokens("0.5", 2).expect("half");
        assert_eq!(half, RewardAmount::from_u128(50));
        let leading_dot = RewardAmount::from_whole_tokens(".25", 2).expect("quarter");
        assert_eq!(leading_dot, RewardAmount::from_u128(25));
    }

    #[test]
    fn whole_tokens_reject_excess_precision_and_garbage() {
        assert!(matches!(
            RewardAmount::from_whole_tokens("1.001", 2),
            Err(AmountError::Invalid(_))
        ));
        assert!(matches!(
            RewardAmount::from_whole_tokens("ten", 18),
            Err(AmountError::Invalid(_))
        ));
        assert!(matches!(
            RewardAmount::from_whole_tokens(".", 18),
            Err(AmountError::Invalid(_))
        ));
    }

    #[test]
    fn values_wider_than_256_bits_overflow() {
        // 2^256 has 78 decimal digits.
        let too_wide = format!("1{}", "0".repeat(78));
        assert_eq!(
            RewardAmount::parse_base_units(&too_wide),
            Err(AmountError::Overflow)
        );
        assert_eq!(
            RewardAmount::from_whole_tokens("1000000000000000000000000000000000000000000000000000000000000000", 18),
            Err(AmountError::Overflow)
        );
        let mut bytes = vec![0_u8; 33];
        bytes[0] = 1;
        assert_eq!(RewardAmount::from_be_bytes(&bytes), Err(AmountError::Overflow));
    }

    #[test]
    fn be_bytes_ignore_leading_zero_padding() {
        let mut bytes = vec![0_u8; 40];
        bytes[39] = 7;
        assert_eq!(
            RewardAmount::from_be_bytes(&bytes).expect("padded"),
            RewardAmount::from_u128(7)
        );
        let word = RewardAmount::from_u128(0x0102).to_be_word();
        assert_eq!(&word[30..], &[0x01, 0x02]);
        assert!(word[..30].iter().all(|b| *b == 0));
    }

    #[test]
    fn amount_serializes_as_decimal_string() {
        let amount = RewardAmount::from_u128(42);
        let value = serde_json::to_value(amount).expect("serialize");
        assert_eq!(value, serde_json::json!("42"));
        let back: RewardAmount = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, amount);
    }
}
