use gacha_domain::{Address, H256, U256, format_address};
use k256::ecdsa::{SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use thiserror::Error;

use crate::tx_builder::{UnsignedTransaction, keccak256};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("invalid private key: {0}")]
    InvalidKey(String),
    #[error("operator key derives {derived}, configured operator is {expected}")]
    AddressMismatch { expected: String, derived: String },
    #[error("signing failed: {0}")]
    Signing(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub unsigned: UnsignedTransaction,
    pub chain_id: u64,
    pub v: u64,
    pub r: U256,
    pub s: U256,
    pub raw: Vec<u8>,
    pub hash: H256,
}

impl SignedTransaction {
    #[must_use]
    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }
}

/// Sole owner of the operator's secp256k1 key. Other components hold an
/// `Arc<OperatorSigner>` and only ever see the derived address.
pub struct OperatorSigner {
    signing_key: SigningKey,
    address: Address,
}

impl OperatorSigner {
    pub fn from_private_key_hex(raw: &str) -> Result<Self, SignerError> {
        let trimmed = raw.trim();
        let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        if digits.len() != 64 {
            return Err(SignerError::InvalidKey(format!(
                "expected 64 hex digits, got {}",
                digits.len()
            )));
        }
        let bytes =
            hex::decode(digits).map_err(|e| SignerError::InvalidKey(format!("not hex: {e}")))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignerError> {
        let signing_key =
            SigningKey::from_slice(bytes).map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        let address = address_from_verifying_key(signing_key.verifying_key());
        Ok(Self {
            signing_key,
            address,
        })
    }

    /// Startup check that the key belongs to the configured operator account.
    pub fn ensure_address(self, expected: Address) -> Result<Self, SignerError> {
        if self.address != expected {
            return Err(SignerError::AddressMismatch {
                expected: format_address(&expected),
                derived: format_address(&self.address),
            });
        }
        Ok(self)
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    /// Replay-protected signature: the chain id is part of the hashed payload
    /// and of `v = recovery_id + 2 * chain_id + 35`.
    pub fn sign(
        &self,
        tx: &UnsignedTransaction,
        chain_id: u64,
    ) -> Result<SignedTransaction, SignerError> {
        let sighash = tx.signing_hash(chain_id);
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(&sighash)
            .map_err(|e| SignerError::Signing(e.to_string()))?;
        let v = chain_id
            .checked_mul(2)
            .and_then(|x| x.checked_add(35 + u64::from(recovery_id.to_byte())))
            .ok_or_else(|| SignerError::Signing(format!("chain id {chain_id} too large")))?;
        let rs = signature.to_bytes();
        let r = U256::from_big_endian(&rs[..32]);
        let s = U256::from_big_endian(&rs[32..]);
        let raw = tx.encode_signed(v, r, s);
        let hash = H256::from(keccak256(&raw));
        Ok(SignedTransaction {
            unsigned: tx.clone(),
            chain_id,
            v,
            r,
            s,
            raw,
            hash,
        })
    }
}

impl std::fmt::Debug for OperatorSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorSigner")
            .field("address", &format_address(&self.address))
            .finish_non_exhaustive()
    }
}

#[must_use]
pub fn address_from_verifying_key(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&digest[12..])
}
