use std::sync::OnceLock;

use ethabi::{Function, Param, ParamType, StateMutability, Token};
use gacha_domain::{Address, AmountError, RewardAmount, U256};
use rlp::RlpStream;
use sha3::{Digest, Keccak256};
use thiserror::Error;

pub const TRANSFER_SIGNATURE: &str = "transfer(address,uint256)";
/// First four bytes of `keccak256("transfer(address,uint256)")`.
pub const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];
pub const TRANSFER_CALL_DATA_LEN: usize = 4 + 32 + 32;

/// Multiplier applied to the node's gas estimate, in tenths.
const GAS_MARGIN_TENTHS: u128 = 18;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("reward amount must be greater than zero")]
    ZeroAmount,
    #[error("reward amount exceeds 256 bits")]
    EncodingOverflow,
    #[error("gas estimate {estimate} overflows the gas limit after margin")]
    GasOverflow { estimate: u64 },
    #[error("abi encode failed: {0}")]
    Abi(String),
    #[error("malformed transfer call data: {0}")]
    MalformedCallData(String),
}

impl From<AmountError> for BuildError {
    fn from(err: AmountError) -> Self {
        match err {
            AmountError::Overflow => Self::EncodingOverflow,
            AmountError::Invalid(raw) => Self::MalformedCallData(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub nonce: u64,
    pub to: Address,
    pub value: U256,
    pub gas_limit: u64,
    pub gas_price: U256,
    pub data: Vec<u8>,
}

impl UnsignedTransaction {
    /// RLP payload hashed for a replay-protected signature:
    /// `[nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0]`.
    #[must_use]
    pub fn signing_payload(&self, chain_id: u64) -> Vec<u8> {
        let mut stream = RlpStream::new_list(9);
        self.append_fields(&mut stream);
        stream.append(&chain_id);
        stream.append(&0_u8);
        stream.append(&0_u8);
        stream.out().to_vec()
    }

    #[must_use]
    pub fn signing_hash(&self, chain_id: u64) -> [u8; 32] {
        keccak256(&self.signing_payload(chain_id))
    }

    /// Broadcastable encoding `[nonce, gasPrice, gasLimit, to, value, data, v, r, s]`.
    #[must_use]
    pub fn encode_signed(&self, v: u64, r: U256, s: U256) -> Vec<u8> {
        let mut stream = RlpStream::new_list(9);
        self.append_fields(&mut stream);
        stream.append(&v);
        stream.append(&u256_minimal_be(r));
        stream.append(&u256_minimal_be(s));
        stream.out().to_vec()
    }

    fn append_fields(&self, stream: &mut RlpStream) {
        stream.append(&self.nonce);
        stream.append(&u256_minimal_be(self.gas_price));
        stream.append(&self.gas_limit);
        stream.append(&self.to.as_bytes().to_vec());
        stream.append(&u256_minimal_be(self.value));
        stream.append(&self.data);
    }
}

/// Builds ERC-20 `transfer` transactions against one fixed token contract.
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    token_contract: Address,
}

impl TransactionBuilder {
    #[must_use]
    pub fn new(token_contract: Address) -> Self {
        Self { token_contract }
    }

    #[must_use]
    pub fn token_contract(&self) -> Address {
        self.token_contract
    }

    /// `selector ‖ pad32(recipient) ‖ pad32(amount)`, always 68 bytes.
    pub fn transfer_call_data(
        &self,
        recipient: Address,
        amount: RewardAmount,
    ) -> Result<Vec<u8>, BuildError> {
        encode_transfer_call(recipient, amount)
    }

    pub fn build(
        &self,
        recipient: Address,
        amount: RewardAmount,
        nonce: u64,
        gas_limit: u64,
        gas_price: U256,
    ) -> Result<UnsignedTransaction, BuildError> {
        Ok(UnsignedTransaction {
            nonce,
            to: self.token_contract,
            // Token transfers move value through `data`, never the native coin.
            value: U256::zero(),
            gas_limit,
            gas_price,
            data: encode_transfer_call(recipient, amount)?,
        })
    }
}

fn transfer_function() -> &'static Function {
    static TRANSFER: OnceLock<Function> = OnceLock::new();
    TRANSFER.get_or_init(|| {
        #[allow(deprecated)]
        Function {
            name: "transfer".to_string(),
            inputs: vec![
                Param {
                    name: "to".to_string(),
                    kind: ParamType::Address,
                    internal_type: None,
                },
                Param {
                    name: "value".to_string(),
                    kind: ParamType::Uint(256),
                    internal_type: None,
                },
            ],
            outputs: vec![Param {
                name: String::new(),
                kind: ParamType::Bool,
                internal_type: None,
            }],
            constant: None,
            state_mutability: StateMutability::NonPayable,
        }
    })
}

#[must_use]
pub fn transfer_selector() -> [u8; 4] {
    transfer_function().short_signature()
}

pub fn encode_transfer_call(recipient: Address, amount: RewardAmount) -> Result<Vec<u8>, BuildError> {
    if amount.is_zero() {
        return Err(BuildError::ZeroAmount);
    }
    let data = transfer_function()
        .encode_input(&[Token::Address(recipient), Token::Uint(amount.as_u256())])
        .map_err(|e| BuildError::Abi(e.to_string()))?;
    if data.len() != TRANSFER_CALL_DATA_LEN {
        return Err(BuildError::Abi(format!(
            "transfer call data is {} bytes, expected {TRANSFER_CALL_DATA_LEN}",
            data.len()
        )));
    }
    Ok(data)
}

pub fn decode_transfer_call(data: &[u8]) -> Result<(Address, RewardAmount), BuildError> {
    if data.len() != TRANSFER_CALL_DATA_LEN {
        return Err(BuildError::MalformedCallData(format!(
            "expected {TRANSFER_CALL_DATA_LEN} bytes, got {}",
            data.len()
        )));
    }
    if data[..4] != TRANSFER_SELECTOR {
        return Err(BuildError::MalformedCallData(format!(
            "unexpected selector 0x{}",
            hex::encode(&data[..4])
        )));
    }
    let tokens = ethabi::decode(&[ParamType::Address, ParamType::Uint(256)], &data[4..])
        .map_err(|e| BuildError::MalformedCallData(e.to_string()))?;
    match tokens.as_slice() {
        [Token::Address(recipient), Token::Uint(amount)] => {
            Ok((*recipient, RewardAmount::from_base_units(*amount)))
        }
        other => Err(BuildError::MalformedCallData(format!(
            "unexpected tokens {other:?}"
        ))),
    }
}

/// `ceil(estimate * 1.8)` in integer arithmetic.
pub fn gas_limit_with_margin(estimate: u64) -> Result<u64, BuildError> {
    let scaled = (u128::from(estimate) * GAS_MARGIN_TENTHS).div_ceil(10);
    u64::try_from(scaled).map_err(|_| BuildError::GasOverflow { estimate })
}

#[must_use]
pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    let digest = Keccak256::digest(bytes);
    let mut out = [0_u8; 32];
    out.copy_from_slice(&digest);
    out
}

fn u256_minimal_be(value: U256) -> Vec<u8> {
    let mut word = [0_u8; 32];
    value.to_big_endian(&mut word);
    let first = word.iter().position(|b| *b != 0).unwrap_or(word.len());
    word[first..].to_vec()
}

#[cfg(test)]
mod tests {
    use gacha_domain::parse_address;

    use super::*;

    fn addr(raw: &str) -> Address {
        parse_address(raw).expect("address")
    }

    #[test]
    fn selector_matches_keccak_of_signature() {
        assert_eq!(&keccak256(TRANSFER_SIGNATURE.as_bytes())[..4], &TRANSFER_SELECTOR);
        assert_eq!(transfer_selector(), TRANSFER_SELECTOR);
        assert_eq!(hex::encode(TRANSFER_SELECTOR), "a9059cbb");
    }

    #[test]
    fn transfer_call_data_layout_is_selector_then_two_words() {
        let recipient = addr("0xabc0000000000000000000000000000000000def");
        let amount = RewardAmount::from_whole_tokens("10", 18).expect("amount");
        let data = encode_transfer_call(recipient, amount).expect("encode");

        assert_eq!(data.len(), 68);
        assert_eq!(&data[..4], &TRANSFER_SELECTOR);
        assert!(data[4..16].iter().all(|b| *b == 0));
        assert_eq!(&data[16..36], recipient.as_bytes());
        assert_eq!(&data[36..68], &amount.to_be_word());
        assert_eq!(
            hex::encode(&data[36..68]),
            "0000000000000000000000000000000000000000000000008ac7230489e80000"
        );
    }

    #[test]
    fn transfer_call_data_decodes_back_to_inputs() {
        let cases = [
            (
                addr("0x0000000000000000000000000000000000000001"),
                RewardAmount::from_u128(1),
            ),
            (
                addr("0xffffffffffffffffffffffffffffffffffffffff"),
                RewardAmount::from_base_units(U256::MAX),
            ),
            (
                addr("0xEa58D2fFBa020c4f3152dB37E8896B4d233F849b"),
                RewardAmount::from_whole_tokens("10", 18).expect("amount"),
            ),
        ];
        for (recipient, amount) in cases {
            let data = encode_transfer_call(recipient, amount).expect("encode");
            assert_eq!(data.len(), TRANSFER_CALL_DATA_LEN);
            assert_eq!(
                decode_transfer_call(&data).expect("decode"),
                (recipient, amount)
            );
        }
    }

    #[test]
    fn zero_amount_is_not_encodable() {
        assert_eq!(
            encode_transfer_call(Address::zero(), RewardAmount::ZERO),
            Err(BuildError::ZeroAmount)
        );
    }

    #[test]
    fn decode_rejects_foreign_selector_and_length() {
        let mut data = encode_transfer_call(Address::repeat_byte(1), RewardAmount::from_u128(5))
            .expect("encode");
        assert!(decode_transfer_call(&data[..67]).is_err());
        data[0] = 0x00;
        assert!(matches!(
            decode_transfer_call(&data),
            Err(BuildError::MalformedCallData(msg)) if msg.contains("selector")
        ));
    }

    #[test]
    fn gas_margin_rounds_up_and_never_undercuts_estimate() {
        assert_eq!(gas_limit_with_margin(0).expect("zero"), 0);
        assert_eq!(gas_limit_with_margin(1).expect("one"), 2);
        assert_eq!(gas_limit_with_margin(10).expect("ten"), 18);
        assert_eq!(gas_limit_with_margin(21_000).expect("transfer"), 37_800);
        assert_eq!(gas_limit_with_margin(51_234).expect("odd"), 92_222);
        for estimate in [3_u64, 7, 99, 12_345, 1_000_003] {
            let limit = gas_limit_with_margin(estimate).expect("limit");
            assert_eq!(u128::from(limit), (u128::from(estimate) * 18).div_ceil(10));
            assert!(limit >= estimate);
        }
        assert_eq!(
            gas_limit_with_margin(u64::MAX),
            Err(BuildError::GasOverflow { estimate: u64::MAX })
        );
    }

    #[test]
    fn builder_targets_token_contract_with_zero_value() {
        let token = addr("0x1111111111111111111111111111111111111111");
        let recipient = addr("0x2222222222222222222222222222222222222222");
        let builder = TransactionBuilder::new(token);
        let tx = builder
            .build(recipient, RewardAmount::from_u128(99), 4, 90_000, U256::from(7))
            .expect("build");
        assert_eq!(tx.to, token);
        assert_eq!(tx.value, U256::zero());
        assert_eq!(tx.nonce, 4);
        assert_eq!(tx.gas_limit, 90_000);
        assert_eq!(
            tx.data,
            builder
                .transfer_call_data(recipient, RewardAmount::from_u128(99))
                .expect("data")
        );
    }

    #[test]
    fn signing_payload_matches_replay_protected_reference_vector() {
        let tx = UnsignedTransaction {
            nonce: 9,
            to: addr("0x3535353535353535353535353535353535353535"),
            value: U256::from(1_000_000_000_000_000_000_u64),
            gas_limit: 21_000,
            gas_price: U256::from(20_000_000_000_u64),
            data: Vec::new(),
        };
        assert_eq!(
            hex::encode(tx.signing_payload(1)),
            "ec098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a764000080018080"
        );
        assert_eq!(
            hex::encode(tx.signing_hash(1)),
            "daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"
        );
    }
}
