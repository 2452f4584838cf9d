use std::collections::BTreeMap;
use std::time::Duration;
use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::secret::SecretString;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppEnv {
    Local,
    Dev,
    Test,
    Prod,
}

impl AppEnv {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Dev => "dev",
            Self::Test => "test",
            Self::Prod => "prod",
        }
    }
}

impl std::str::FromStr for AppEnv {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "dev" | "development" => Ok(Self::Dev),
            "test" => Ok(Self::Test),
            "prod" | "production" => Ok(Self::Prod),
            other => Err(ConfigError::InvalidEnv(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app: AppSection,
    pub chain: ChainSection,
    pub operator: OperatorSection,
    pub reward: RewardSection,
    pub settlement: SettlementSection,
    pub observability: ObservabilitySection,
    pub gachas: BTreeMap<String, GachaSection>,
}

#[derive(Debug, Clone)]
pub struct AppSection {
    pub env: AppEnv,
    pub service_name: String,
}

#[derive(Debug, Clone)]
pub struct ChainSection {
    pub rpc_url: String,
    pub expected_chain_id: Option<u64>,
    pub token_contract: String,
    pub request_timeout_ms: u64,
}

impl ChainSection {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub struct OperatorSection {
    pub private_key: SecretString,
    pub address: String,
}

/// Amounts are decimal whole-token strings, scaled by `10^token_decimals`.
#[derive(Debug, Clone)]
pub struct RewardSection {
    pub token_decimals: u8,
    pub default_amount: Option<String>,
    pub per_character: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct SettlementSection {
    pub retry_max_attempts: u32,
    pub retry_base_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ObservabilitySection {
    pub log_filter: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GachaSection {
    #[serde(default)]
    pub entries: Vec<EmissionRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EmissionRow {
    pub character_id: String,
    pub weight: u32,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid APP_ENV value: {0}")]
    InvalidEnv(String),
    #[error("unable to locate config directory (expected config/default.toml)")]
    ConfigDirNotFound,
    #[error("failed reading config file {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed parsing config file {path}: {source}")]
    ParseToml {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Default, Deserialize)]
struct PartialAppConfig {
    app: Option<PartialAppSection>,
    chain: Option<PartialChainSection>,
    operator: Option<PartialOperatorSection>,
    reward: Option<PartialRewardSection>,
    settlement: Option<PartialSettlementSection>,
    observability: Option<PartialObservabilitySection>,
    gachas: Option<BTreeMap<String, GachaSection>>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialAppSection {
    env: Option<AppEnv>,
    service_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialChainSection {
    rpc_url: Option<String>,
    expected_chain_id: Option<u64>,
    token_contract: Option<String>,
    request_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialOperatorSection {
    private_key: Option<SecretString>,
    address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialRewardSection {
    token_decimals: Option<u8>,
    default_amount: Option<String>,
    per_character: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialSettlementSection {
    retry_max_attempts: Option<u32>,
    retry_base_backoff_ms: Option<u64>,
    retry_max_backoff_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialObservabilitySection {
    log_filter: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let app_env = env::var("APP_ENV")
            .ok()
            .map(|value| value.parse())
            .transpose()?
            .unwrap_or(AppEnv::Local);
        let config_dir = resolve_config_dir()?;
        Self::load_from_dir_for_env(config_dir, app_env)
    }

    pub fn load_from_dir_for_env(
        config_dir: impl AsRef<Path>,
        app_env: AppEnv,
    ) -> Result<Self, ConfigError> {
        Self::load_from_dir_with_overrides(config_dir, app_env, |key| env::var(key).ok())
    }

    /// Same as [`AppConfig::load_from_dir_for_env`] but reads overrides
    /// through `lookup` instead of the process environment.
    pub fn load_from_dir_with_overrides<F>(
        config_dir: impl AsRef<Path>,
        app_env: AppEnv,
        lookup: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_dir = config_dir.as_ref();
        let mut config = Self::default_for_env(app_env);
        merge_file(&mut config, &config_dir.join("default.toml"))?;
        let env_file = config_dir.join(format!("{}.toml", app_env.as_str()));
        if env_file.exists() {
            merge_file(&mut config, &env_file)?;
        }
        config.app.env = app_env;
        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn default_for_env(app_env: AppEnv) -> Self {
        Self {
            app: AppSection {
                env: app_env,
                service_name: "gacha-reward".to_string(),
            },
            chain: ChainSection {
                rpc_url: String::new(),
                expected_chain_id: None,
                token_contract: String::new(),
                request_timeout_ms: 10_000,
            },
            operator: OperatorSection {
                private_key: SecretString::default(),
                address: String::new(),
            },
            reward: RewardSection {
                token_decimals: 18,
                default_amount: None,
                per_character: BTreeMap::new(),
            },
            settlement: SettlementSection {
                retry_max_attempts: 4,
                retry_base_backoff_ms: 200,
                retry_max_backoff_ms: 3_000,
            },
            observability: ObservabilitySection {
                log_filter: "info".to_string(),
            },
            gachas: BTreeMap::new(),
        }
    }

    /// Checks that every setting the settlement path needs is present and
    /// well formed. Address and key contents are checked where they are
    /// parsed, at service bootstrap.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rpc_url = self.chain.rpc_url.trim();
        if rpc_url.is_empty() {
            return Err(ConfigError::Missing("chain.rpc_url"));
        }
        if !(rpc_url.starts_with("http://") || rpc_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                field: "chain.rpc_url",
                reason: format!("expected an http(s) endpoint, got {rpc_url}"),
            });
        }
        if self.chain.token_contract.trim().is_empty() {
            return Err(ConfigError::Missing("chain.token_contract"));
        }
        if self.chain.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "chain.request_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.operator.private_key.is_empty() {
            return Err(ConfigError::Missing("operator.private_key"));
        }
        if self.operator.address.trim().is_empty() {
            return Err(ConfigError::Missing("operator.address"));
        }
        if self.settlement.retry_max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "settlement.retry_max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.settlement.retry_base_backoff_ms > self.settlement.retry_max_backoff_ms {
            return Err(ConfigError::Invalid {
                field: "settlement.retry_base_backoff_ms",
                reason: "must not exceed retry_max_backoff_ms".to_string(),
            });
        }
        if self.reward.default_amount.is_none() && self.reward.per_character.is_empty() {
            return Err(ConfigError::Missing("reward.default_amount"));
        }
        Ok(())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw_env) = lookup("APP_ENV") {
            self.app.env = raw_env.parse()?;
        }
        if let Some(service_name) = lookup("GACHA__APP__SERVICE_NAME") {
            self.app.service_name = service_name;
        }

        // Names used by the first deployment; the namespaced ones win.
        if let Some(url) = lookup("URL") {
            self.chain.rpc_url = url;
        }
        if let Some(token) = lookup("TOKEN_ADDRESS") {
            self.chain.token_contract = token;
        }
        if let Some(key) = lookup("PRIVATE_KEY") {
            self.operator.private_key = SecretString::new(key);
        }

        if let Some(url) = lookup("GACHA__CHAIN__RPC_URL") {
            self.chain.rpc_url = url;
        }
        if let Some(token) = lookup("GACHA__CHAIN__TOKEN_CONTRACT") {
            self.chain.token_contract = token;
        }
        if let Some(raw) = lookup("GACHA__CHAIN__EXPECTED_CHAIN_ID") {
            let chain_id = raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                field: "chain.expected_chain_id",
                reason: format!("{raw:?}: {e}"),
            })?;
            self.chain.expected_chain_id = Some(chain_id);
        }
        if let Some(key) = lookup("GACHA__OPERATOR__PRIVATE_KEY") {
            self.operator.private_key = SecretString::new(key);
        }
        if let Some(address) = lookup("GACHA__OPERATOR__ADDRESS") {
            self.operator.address = address;
        }

        if let Some(log_filter) = lookup("OBSERVABILITY__LOG_FILTER") {
            self.observability.log_filter = log_filter;
        } else if let Some(log_filter) = lookup("RUST_LOG") {
            self.observability.log_filter = log_filter;
        }
        Ok(())
    }

    fn merge_partial(&mut self, partial: PartialAppConfig) {
        if let Some(app) = partial.app {
            if let Some(value) = app.env {
                self.app.env = value;
            }
            if let Some(value) = app.service_name {
                self.app.service_name = value;
            }
        }
        if let Some(chain) = partial.chain {
            if let Some(value) = chain.rpc_url {
                self.chain.rpc_url = value;
            }
            if let Some(value) = chain.expected_chain_id {
                self.chain.expected_chain_id = Some(value);
            }
            if let Some(value) = chain.token_contract {
                self.chain.token_contract = value;
            }
            if let Some(value) = chain.request_timeout_ms {
                self.chain.request_timeout_ms = value;
            }
        }
        if let Some(operator) = partial.operator {
            if let Some(value) = operator.private_key {
                self.operator.private_key = value;
            }
            if let Some(value) = operator.address {
                self.operator.address = value;
            }
        }
        if let Some(reward) = partial.reward {
            if let Some(value) = reward.token_decimals {
                self.reward.token_decimals = value;
            }
            if let Some(value) = reward.default_amount {
                self.reward.default_amount = Some(value);
            }
            if let Some(values) = reward.per_character {
                self.reward.per_character.extend(values);
            }
        }
        if let Some(settlement) = partial.settlement {
            if let Some(value) = settlement.retry_max_attempts {
                self.settlement.retry_max_attempts = value;
            }
            if let Some(value) = settlement.retry_base_backoff_ms {
                self.settlement.retry_base_backoff_ms = value;
            }
            if let Some(value) = settlement.retry_max_backoff_ms {
                self.settlement.retry_max_backoff_ms = value;
            }
        }
        if let Some(observability) = partial.observability
            && let Some(value) = observability.log_filter
        {
            self.observability.log_filter = value;
        }
        if let Some(gachas) = partial.gachas {
            // A gacha redefined by a later file replaces its whole table.
            self.gachas.extend(gachas);
        }
    }
}

fn merge_file(config: &mut AppConfig, path: &Path) -> Result<(), ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.display().to_string(),
        source,
    })?;
    let partial =
        toml::from_str::<PartialAppConfig>(&content).map_err(|source| ConfigError::ParseToml {
            path: path.display().to_string(),
            source,
        })?;
    config.merge_partial(partial);
    Ok(())
}

fn resolve_config_dir() -> Result<PathBuf, ConfigError> {
    if let Ok(path) = env::var("GACHA_CONFIG_DIR") {
        return Ok(PathBuf::from(path));
    }

    let mut current_dir = env::current_dir().map_err(|_| ConfigError::ConfigDirNotFound)?;
    loop {
        let candidate = current_dir.join("config");
        if candidate.join("default.toml").exists() {
            return Ok(candidate);
        }
        if !current_dir.pop() {
            break;
        }
    }

    Err(ConfigError::ConfigDirNotFound)
}
