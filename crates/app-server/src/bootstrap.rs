use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use emission_store::{InMemoryDrawRecordRepository, InMemoryEmissionStore, StoreError};
use gacha_domain::{
    AmountError, CharacterId, DomainError, EmissionEntry, EmissionTable, GachaId, RewardAmount,
    parse_address,
};
use gacha_draw::{ConfiguredRewardResolver, DrawError, Drawer};
use platform_core::{AppConfig, ConfigError, GachaSection, RewardSection};
use reward_settlement::{
    ChainClient, ChainError, JsonRpcChainClient, OperatorSigner, RetryPolicy,
    RewardSettlementService, SettlementDeps, SettlementError, SettlementOptions, SignerError,
};
use thiserror::Error;
use tracing::{info, warn};

pub type AppSettlementService<C = JsonRpcChainClient> =
    RewardSettlementService<C, InMemoryEmissionStore, InMemoryDrawRecordRepository>;

/// Every variant stops the process before it serves a single settlement.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid {field}: {source}")]
    Address {
        field: &'static str,
        #[source]
        source: DomainError,
    },
    #[error("operator key rejected: {0}")]
    Signer(#[from] SignerError),
    #[error("reward amount {field}: {source}")]
    RewardAmount {
        field: String,
        #[source]
        source: AmountError,
    },
    #[error("gacha {gacha_id}: {source}")]
    Emission {
        gacha_id: String,
        #[source]
        source: DomainError,
    },
    #[error("reward configuration: {0}")]
    Rewards(#[from] DrawError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("chain client: {0}")]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Settlement(#[from] SettlementError),
}

pub fn build_signer(config: &AppConfig) -> Result<OperatorSigner, BootstrapError> {
    let expected = parse_address(&config.operator.address).map_err(|source| {
        BootstrapError::Address {
            field: "operator.address",
            source,
        }
    })?;
    let signer = OperatorSigner::from_private_key_hex(config.operator.private_key.expose_secret())?
        .ensure_address(expected)?;
    Ok(signer)
}

pub fn build_reward_rule(reward: &RewardSection) -> Result<ConfiguredRewardResolver, BootstrapError> {
    let scale = |field: String, raw: &str| {
        RewardAmount::from_whole_tokens(raw, reward.token_decimals)
            .map_err(|source| BootstrapError::RewardAmount { field, source })
    };
    let default_amount = reward
        .default_amount
        .as_deref()
        .map(|raw| scale("reward.default_amount".to_string(), raw))
        .transpose()?;
    let mut per_character = HashMap::with_capacity(reward.per_character.len());
    for (character_id, raw) in &reward.per_character {
        let amount = scale(format!("reward.per_character.{character_id}"), raw)?;
        per_character.insert(CharacterId::new(character_id.as_str()), amount);
    }
    Ok(ConfiguredRewardResolver::new(default_amount, per_character)?)
}

/// Loads configured emission rows and checks every drawable character has a
/// reward before the service accepts calls.
pub fn seed_emission_store(
    gachas: &BTreeMap<String, GachaSection>,
    rewards: &ConfiguredRewardResolver,
) -> Result<InMemoryEmissionStore, BootstrapError> {
    let store = InMemoryEmissionStore::new();
    for (gacha_id, section) in gachas {
        let entries = section
            .entries
            .iter()
            .map(|row| EmissionEntry::new(row.character_id.as_str(), row.weight))
            .collect();
        let table = EmissionTable::new(GachaId::new(gacha_id.as_str()), entries).map_err(
            |source| BootstrapError::Emission {
                gacha_id: gacha_id.clone(),
                source,
            },
        )?;
        rewards.ensure_covers(&table)?;
        if !table.is_drawable() {
            warn!(%gacha_id, "gacha has zero total weight; draws will be rejected");
        }
        info!(
            %gacha_id,
            characters = table.entries().len(),
            total_weight = table.total_weight(),
            "emission table loaded"
        );
        store.upsert_table(table)?;
    }
    Ok(store)
}

pub fn settlement_options(config: &AppConfig) -> Result<SettlementOptions, BootstrapError> {
    let token_contract = parse_address(&config.chain.token_contract).map_err(|source| {
        BootstrapError::Address {
            field: "chain.token_contract",
            source,
        }
    })?;
    Ok(SettlementOptions {
        token_contract,
        expected_chain_id: config.chain.expected_chain_id,
        retry: RetryPolicy {
            max_attempts: config.settlement.retry_max_attempts,
            base_backoff: Duration::from_millis(config.settlement.retry_base_backoff_ms),
            max_backoff: Duration::from_millis(config.settlement.retry_max_backoff_ms),
        },
    })
}

pub async fn build_service(config: &AppConfig) -> Result<AppSettlementService, BootstrapError> {
    let chain = JsonRpcChainClient::new(&config.chain.rpc_url, config.chain.request_timeout())?;
    build_service_with_chain(config, chain).await
}

/// Wires the settlement service around any chain client. Fails on the first
/// configuration problem, including a node on the wrong chain.
pub async fn build_service_with_chain<C: ChainClient>(
    config: &AppConfig,
    chain: C,
) -> Result<AppSettlementService<C>, BootstrapError> {
    let signer = build_signer(config)?;
    let rewards = build_reward_rule(&config.reward)?;
    let emission_source = seed_emission_store(&config.gachas, &rewards)?;
    let options = settlement_options(config)?;
    let service = RewardSettlementService::connect(
        SettlementDeps {
            chain,
            emission_source,
            records: InMemoryDrawRecordRepository::new(),
            signer: Arc::new(signer),
            drawer: Drawer::thread_local(),
            rewards: Arc::new(rewards),
        },
        options,
    )
    .await?;
    Ok(service)
}
