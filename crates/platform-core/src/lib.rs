pub mod config;
pub mod secret;

pub use config::{
    AppConfig, AppEnv, AppSection, ChainSection, ConfigError, EmissionRow, GachaSection,
    ObservabilitySection, OperatorSection, RewardSection, SettlementSection,
};
pub use secret::SecretString;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope<T> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<ErrorBody>,
}

impl<T> ResponseEnvelope<T> {
    #[must_use]
    pub fn ok(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    #[must_use]
    pub fn err(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RequestInvalid,
    DistributionInvalid,
    ChainUnavailable,
    ChainRejected,
    /// The payout may have happened; resolve through reconciliation, not a retry.
    BroadcastOutcomeUnknown,
    RewardEncodingOverflow,
    InternalError,
}

impl ErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequestInvalid => "REQUEST_INVALID",
            Self::DistributionInvalid => "DISTRIBUTION_INVALID",
            Self::ChainUnavailable => "CHAIN_UNAVAILABLE",
            Self::ChainRejected => "CHAIN_REJECTED",
            Self::BroadcastOutcomeUnknown => "BROADCAST_OUTCOME_UNKNOWN",
            Self::RewardEncodingOverflow => "REWARD_ENCODING_OVERFLOW",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Temporary failures the caller may retry as-is.
    #[must_use]
    pub fn is_temporary(self) -> bool {
        matches!(self, Self::ChainUnavailable)
    }
}
