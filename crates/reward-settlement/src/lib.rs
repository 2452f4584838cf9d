pub mod chain_client;
pub mod mock;
pub mod nonce;
pub mod retry;
pub mod service;
pub mod signer;
pub mod tx_builder;

pub use chain_client::{CallRequest, ChainClient, ChainError, JsonRpcChainClient};
pub use mock::{MockCall, MockChainClient};
pub use nonce::{InFlightTransaction, NonceAllocator, NonceGate};
pub use retry::RetryPolicy;
pub use service::{
    ErrorCategory, RewardSettlementService, SettlementDeps, SettlementError, SettlementOptions,
    SettlementReceipt, SettlementStage,
};
pub use signer::{OperatorSigner, SignedTransaction, SignerError};
pub use tx_builder::{
    BuildError, TRANSFER_CALL_DATA_LEN, TRANSFER_SELECTOR, TransactionBuilder,
    UnsignedTransaction, decode_transfer_call, encode_transfer_call, gas_limit_with_margin,
    keccak256, transfer_selector,
};
