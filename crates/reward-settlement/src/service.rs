use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use emission_store::{DrawRecord, DrawRecordRepository, EmissionTableSource, StoreError};
use gacha_domain::{
    Address, CharacterId, GachaId, H256, RewardAmount, TraceId, format_address,
};
use gacha_draw::{DrawError, Drawer, RewardRule};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::chain_client::{CallRequest, ChainClient, ChainError};
use crate::nonce::{InFlightTransaction, NonceAllocator};
use crate::retry::RetryPolicy;
use crate::signer::{OperatorSigner, SignerError};
use crate::tx_builder::{BuildError, TransactionBuilder, gas_limit_with_margin};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementStage {
    Drawing,
    Resolving,
    Building,
    Estimating,
    Signing,
    Broadcasting,
    Settled,
}

impl fmt::Display for SettlementStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Drawing => "drawing",
            Self::Resolving => "resolving",
            Self::Building => "building",
            Self::Estimating => "estimating",
            Self::Signing => "signing",
            Self::Broadcasting => "broadcasting",
            Self::Settled => "settled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Distribution,
    ChainUnavailable,
    ChainRejected,
    /// The transfer may be on chain; the caller must not retry blindly.
    OutcomeUnknown,
    EncodingOverflow,
    Fatal,
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("unknown gacha {gacha_id}")]
    UnknownGacha { gacha_id: String },
    #[error(transparent)]
    Distribution(#[from] DrawError),
    #[error("chain unavailable while {stage}: {message}")]
    ChainUnavailable {
        stage: SettlementStage,
        message: String,
    },
    #[error("chain rejected request while {stage}: {message}")]
    ChainRejected {
        stage: SettlementStage,
        message: String,
    },
    #[error("broadcast outcome unknown for nonce {nonce} (tx {tx_hash:?}): {message}")]
    BroadcastOutcomeUnknown {
        nonce: u64,
        tx_hash: H256,
        message: String,
    },
    #[error("reward amount for {character_id} does not fit in 256 bits")]
    EncodingOverflow { character_id: String },
    #[error("transaction build failed: {0}")]
    Build(BuildError),
    #[error("signing failed: {0}")]
    Signing(#[from] SignerError),
    #[error("store failure while {stage}: {source}")]
    Store {
        stage: SettlementStage,
        #[source]
        source: StoreError,
    },
}

impl SettlementError {
    fn chain(stage: SettlementStage, err: ChainError) -> Self {
        match err {
            ChainError::Unavailable(message) => Self::ChainUnavailable { stage, message },
            ChainError::Rejected(message) => Self::ChainRejected { stage, message },
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::UnknownGacha { .. } | Self::Distribution(_) => ErrorCategory::Distribution,
            Self::ChainUnavailable { .. } => ErrorCategory::ChainUnavailable,
            Self::ChainRejected { .. } => ErrorCategory::ChainRejected,
            Self::BroadcastOutcomeUnknown { .. } => ErrorCategory::OutcomeUnknown,
            Self::EncodingOverflow { .. } => ErrorCategory::EncodingOverflow,
            Self::Build(_) | Self::Signing(_) | Self::Store { .. } => ErrorCategory::Fatal,
        }
    }

    /// Whether the caller may try the whole settlement again later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::ChainUnavailable)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementReceipt {
    pub trace_id: TraceId,
    pub gacha_id: GachaId,
    pub character_id: CharacterId,
    pub recipient: Address,
    pub amount: RewardAmount,
    pub nonce: u64,
    pub tx_hash: H256,
}

pub struct SettlementDeps<C, E, R> {
    pub chain: C,
    pub emission_source: E,
    pub records: R,
    pub signer: Arc<OperatorSigner>,
    pub drawer: Drawer,
    pub rewards: Arc<dyn RewardRule>,
}

#[derive(Debug, Clone)]
pub struct SettlementOptions {
    pub token_contract: Address,
    pub expected_chain_id: Option<u64>,
    pub retry: RetryPolicy,
}

/// Draws a character, pays its reward through a signed token transfer and
/// returns the broadcast transaction hash. Safe to call concurrently; all
/// calls share one nonce sequence for the operator account.
pub struct RewardSettlementService<C, E, R> {
    chain: C,
    emission_source: E,
    records: R,
    signer: Arc<OperatorSigner>,
    drawer: Drawer,
    rewards: Arc<dyn RewardRule>,
    builder: TransactionBuilder,
    nonces: NonceAllocator,
    retry: RetryPolicy,
    chain_id: u64,
}

impl<C, E, R> RewardSettlementService<C, E, R>
where
    C: ChainClient,
    E: EmissionTableSource,
    R: DrawRecordRepository,
{
    /// Queries the chain id once and checks it against the configured one.
    pub async fn connect(
        deps: SettlementDeps<C, E, R>,
        options: SettlementOptions,
    ) -> Result<Self, SettlementError> {
        let chain = &deps.chain;
        let chain_id = options
            .retry
            .run("eth_chainId", move || chain.network_id())
            .await
            .map_err(|e| SettlementError::Configuration(format!("chain id lookup failed: {e}")))?;
        if let Some(expected) = options.expected_chain_id
            && expected != chain_id
        {
            return Err(SettlementError::Configuration(format!(
                "node reports chain id {chain_id}, expected {expected}"
            )));
        }
        let operator = deps.signer.address();
        info!(
            chain_id,
            operator = %format_address(&operator),
            token_contract = %format_address(&options.token_contract),
            "reward settlement service connected"
        );
        Ok(Self {
            chain: deps.chain,
            emission_source: deps.emission_source,
            records: deps.records,
            signer: deps.signer,
            drawer: deps.drawer,
            rewards: deps.rewards,
            builder: TransactionBuilder::new(options.token_contract),
            nonces: NonceAllocator::new(operator),
            retry: options.retry,
            chain_id,
        })
    }

    #[must_use]
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    #[must_use]
    pub fn operator(&self) -> Address {
        self.signer.address()
    }

    #[must_use]
    pub fn token_contract(&self) -> Address {
        self.builder.token_contract()
    }

    pub async fn settle_reward(
        &self,
        gacha_id: &GachaId,
        recipient: Address,
    ) -> Result<SettlementReceipt, SettlementError> {
        let trace_id = TraceId::new();

        let table = self
            .emission_source
            .emission_table(gacha_id)
            .await
            .map_err(|source| SettlementError::Store {
                stage: SettlementStage::Drawing,
                source,
            })?
            .ok_or_else(|| SettlementError::UnknownGacha {
                gacha_id: gacha_id.to_string(),
            })?;
        let character_id = self.drawer.draw(&table)?.clone();

        let amount = self.rewards.amount_for(&character_id).inspect_err(|err| {
            error!(
                %trace_id,
                %gacha_id,
                %character_id,
                error = %err,
                "drawn character has no configured reward"
            );
        })?;

        let data = self
            .builder
            .transfer_call_data(recipient, amount)
            .map_err(|err| self.build_failure(trace_id, &character_id, amount, err))?;

        let chain = &self.chain;
        let gas_price = self
            .retry
            .run("eth_gasPrice", move || chain.suggest_gas_price())
            .await
            .map_err(|e| SettlementError::chain(SettlementStage::Estimating, e))?;
        let request = CallRequest {
            from: self.signer.address(),
            to: self.builder.token_contract(),
            data,
        };
        let request = &request;
        let estimate = self
            .retry
            .run("eth_estimateGas", move || chain.estimate_gas(request))
            .await
            .map_err(|e| SettlementError::chain(SettlementStage::Estimating, e))?;
        let gas_limit = gas_limit_with_margin(estimate)
            .map_err(|err| self.build_failure(trace_id, &character_id, amount, err))?;
        debug!(%trace_id, estimate, gas_limit, %gas_price, "gas priced");

        let operator = self.signer.address();
        let mut gate = self.nonces.lock().await;
        let chain_pending = self
            .retry
            .run("eth_getTransactionCount", move || chain.pending_nonce(operator))
            .await
            .map_err(|e| SettlementError::chain(SettlementStage::Building, e))?;
        let nonce = gate.reserve(chain_pending);

        let unsigned = self
            .builder
            .build(recipient, amount, nonce, gas_limit, gas_price)
            .map_err(|err| self.build_failure(trace_id, &character_id, amount, err))?;
        let signed = self.signer.sign(&unsigned, self.chain_id).inspect_err(|err| {
            error!(
                %trace_id,
                operator = %format_address(&operator),
                nonce,
                error = %err,
                "signing failed with validated key material"
            );
        })?;

        gate.mark_in_flight(InFlightTransaction {
            tx_hash: signed.hash,
            raw_hex: signed.raw_hex(),
        });
        let raw = signed.raw.as_slice();
        // Set once an attempt ends without a definite answer from the node.
        let maybe_observed = AtomicBool::new(false);
        let observed = &maybe_observed;
        let broadcast = self
            .retry
            .run("eth_sendRawTransaction", move || async move {
                let outcome = chain.send_raw_transaction(raw).await;
                if matches!(outcome, Err(ChainError::Unavailable(_))) {
                    observed.store(true, Ordering::Relaxed);
                }
                outcome
            })
            .await;
        let tx_hash = match broadcast {
            Ok(node_hash) => {
                if node_hash != signed.hash {
                    warn!(
                        %trace_id,
                        nonce,
                        local_hash = ?signed.hash,
                        node_hash = ?node_hash,
                        "node returned a different transaction hash"
                    );
                }
                signed.hash
            }
            Err(ChainError::Rejected(reason)) if is_already_known(&reason) => {
                debug!(%trace_id, nonce, tx_hash = ?signed.hash, "transaction already in pool");
                signed.hash
            }
            Err(err) if maybe_observed.load(Ordering::Relaxed) => {
                error!(
                    %trace_id,
                    operator = %format_address(&operator),
                    recipient = %format_address(&recipient),
                    %character_id,
                    %amount,
                    nonce,
                    tx_hash = ?signed.hash,
                    raw_tx = %signed.raw_hex(),
                    error = %err,
                    "broadcast outcome unknown, nonce consumed; reconcile against the ledger"
                );
                gate.commit();
                return Err(SettlementError::BroadcastOutcomeUnknown {
                    nonce,
                    tx_hash: signed.hash,
                    message: err.to_string(),
                });
            }
            Err(err) => {
                error!(
                    %trace_id,
                    operator = %format_address(&operator),
                    recipient = %format_address(&recipient),
                    %character_id,
                    %amount,
                    nonce,
                    tx_hash = ?signed.hash,
                    raw_tx = %signed.raw_hex(),
                    error = %err,
                    "broadcast rejected, nonce released"
                );
                gate.release();
                return Err(SettlementError::chain(SettlementStage::Broadcasting, err));
            }
        };
        gate.commit();

        let record = DrawRecord {
            trace_id,
            gacha_id: gacha_id.clone(),
            character_id: character_id.clone(),
            recipient,
            amount,
            nonce,
            tx_hash,
            settled_at: Utc::now(),
        };
        if let Err(err) = self.records.insert_draw_record(&record).await {
            error!(
                %trace_id,
                %gacha_id,
                %character_id,
                recipient = %format_address(&recipient),
                %amount,
                nonce,
                tx_hash = ?tx_hash,
                error = %err,
                "draw record not persisted for broadcast transaction"
            );
        }

        info!(
            %trace_id,
            %gacha_id,
            %character_id,
            recipient = %format_address(&recipient),
            %amount,
            nonce,
            tx_hash = ?tx_hash,
            stage = %SettlementStage::Settled,
            "reward settled"
        );
        Ok(SettlementReceipt {
            trace_id,
            gacha_id: gacha_id.clone(),
            character_id,
            recipient,
            amount,
            nonce,
            tx_hash,
        })
    }

    fn build_failure(
        &self,
        trace_id: TraceId,
        character_id: &CharacterId,
        amount: RewardAmount,
        err: BuildError,
    ) -> SettlementError {
        error!(
            %trace_id,
            %character_id,
            %amount,
            error = %err,
            "reward transfer could not be encoded"
        );
        match err {
            BuildError::EncodingOverflow => SettlementError::EncodingOverflow {
                character_id: character_id.to_string(),
            },
            other => SettlementError::Build(other),
        }
    }
}

fn is_already_known(reason: &str) -> bool {
    let reason = reason.to_ascii_lowercase();
    reason.contains("already known") || reason.contains("known transaction")
}
