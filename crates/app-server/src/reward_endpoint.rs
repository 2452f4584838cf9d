use emission_store::{DrawRecordRepository, EmissionTableSource};
use gacha_domain::{Address, GachaId, format_address, parse_address};
use platform_core::{ErrorCode, ResponseEnvelope};
use reward_settlement::{
    ChainClient, ErrorCategory, RewardSettlementService, SettlementError, SettlementReceipt,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleRewardRequest {
    pub gacha_id: String,
    pub recipient: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleRewardResponse {
    pub trace_id: String,
    pub gacha_id: String,
    pub character_id: String,
    pub recipient: String,
    /// Base units, decimal.
    pub amount: String,
    pub nonce: u64,
    pub tx_hash: String,
}

impl From<SettlementReceipt> for SettleRewardResponse {
    fn from(receipt: SettlementReceipt) -> Self {
        Self {
            trace_id: receipt.trace_id.to_string(),
            gacha_id: receipt.gacha_id.to_string(),
            character_id: receipt.character_id.to_string(),
            recipient: format_address(&receipt.recipient),
            amount: receipt.amount.to_string(),
            nonce: receipt.nonce,
            tx_hash: format!("{:#x}", receipt.tx_hash),
        }
    }
}

pub type RewardResult = ResponseEnvelope<SettleRewardResponse>;

#[must_use]
pub fn error_code_for(err: &SettlementError) -> ErrorCode {
    match err.category() {
        ErrorCategory::Distribution => ErrorCode::DistributionInvalid,
        ErrorCategory::ChainUnavailable => ErrorCode::ChainUnavailable,
        ErrorCategory::ChainRejected => ErrorCode::ChainRejected,
        ErrorCategory::OutcomeUnknown => ErrorCode::BroadcastOutcomeUnknown,
        ErrorCategory::EncodingOverflow => ErrorCode::RewardEncodingOverflow,
        ErrorCategory::Configuration | ErrorCategory::Fatal => ErrorCode::InternalError,
    }
}

fn validate_request(request: &SettleRewardRequest) -> Result<(GachaId, Address), String> {
    let gacha_id = request.gacha_id.trim();
    if gacha_id.is_empty() {
        return Err("gacha_id must not be empty".to_string());
    }
    let recipient = parse_address(&request.recipient).map_err(|e| e.to_string())?;
    if recipient.is_zero() {
        return Err("recipient must not be the zero address".to_string());
    }
    Ok((GachaId::new(gacha_id), recipient))
}

/// The one operation the outer request layer calls: draw for `gacha_id` and
/// pay the reward to `recipient`.
pub async fn settle_reward<C, E, R>(
    service: &RewardSettlementService<C, E, R>,
    request: SettleRewardRequest,
) -> RewardResult
where
    C: ChainClient,
    E: EmissionTableSource,
    R: DrawRecordRepository,
{
    let (gacha_id, recipient) = match validate_request(&request) {
        Ok(parsed) => parsed,
        Err(message) => return RewardResult::err(ErrorCode::RequestInvalid, message),
    };
    match service.settle_reward(&gacha_id, recipient).await {
        Ok(receipt) => RewardResult::ok(receipt.into()),
        Err(err) => {
            let code = error_code_for(&err);
            warn!(
                %gacha_id,
                recipient = %format_address(&recipient),
                code = code.as_str(),
                error = %err,
                "reward settlement failed"
            );
            RewardResult::err(code, err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use gacha_domain::H256;
    use gacha_draw::DrawError;
    use reward_settlement::{ChainError, MockCall, MockChainClient, SettlementStage};

    use super::*;
    use crate::bootstrap::build_service_with_chain;
    use crate::bootstrap::tests::{CHAIN_ID, test_config};

    fn request(gacha_id: &str, recipient: &str) -> SettleRewardRequest {
        SettleRewardRequest {
            gacha_id: gacha_id.to_string(),
            recipient: recipient.to_string(),
        }
    }

    const RECIPIENT: &str = "0xabc0000000000000000000000000000000000abc";

    #[tokio::test]
    async fn successful_settlement_returns_hash_and_character() {
        let chain = MockChainClient::new(CHAIN_ID);
        let service = build_service_with_chain(&test_config(), chain.clone())
            .await
            .expect("service");

        let response = settle_reward(&service, request("starter", RECIPIENT)).await;
        assert!(response.ok, "{:?}", response.error);
        let data = response.data.expect("data");
        assert!(data.character_id == "A" || data.character_id == "B");
        assert_eq!(data.amount, "10000000000000000000");
        assert_eq!(data.nonce, 0);
        assert_eq!(data.recipient, RECIPIENT);
        assert!(data.tx_hash.starts_with("0x"));
        assert_eq!(data.tx_hash.len(), 66);
        assert_eq!(chain.accepted_nonces(), vec![0]);
    }

    #[tokio::test]
    async fn malformed_recipient_is_request_invalid() {
        let chain = MockChainClient::new(CHAIN_ID);
        let service = build_service_with_chain(&test_config(), chain.clone())
            .await
            .expect("service");

        for bad in ["0x1234", "", "0x0000000000000000000000000000000000000000"] {
            let response = settle_reward(&service, request("starter", bad)).await;
            let error = response.error.expect("error");
            assert_eq!(error.code, ErrorCode::RequestInvalid, "recipient {bad:?}");
        }
        let response = settle_reward(&service, request("  ", RECIPIENT)).await;
        assert_eq!(response.error.expect("error").code, ErrorCode::RequestInvalid);
        assert_eq!(chain.call_count(MockCall::GasPrice), 0);
    }

    #[tokio::test]
    async fn unknown_gacha_is_distribution_invalid() {
        let service = build_service_with_chain(&test_config(), MockChainClient::new(CHAIN_ID))
            .await
            .expect("service");
        let response = settle_reward(&service, request("missing", RECIPIENT)).await;
        assert!(!response.ok);
        assert_eq!(
            response.error.expect("error").code,
            ErrorCode::DistributionInvalid
        );
    }

    #[tokio::test]
    async fn exhausted_gas_price_retries_are_temporary_failures() {
        let chain = MockChainClient::new(CHAIN_ID);
        for _ in 0..4 {
            chain.fail_next(
                MockCall::GasPrice,
                ChainError::Unavailable("connection reset".to_string()),
            );
        }
        let service = build_service_with_chain(&test_config(), chain.clone())
            .await
            .expect("service");

        let response = settle_reward(&service, request("starter", RECIPIENT)).await;
        let error = response.error.expect("error");
        assert_eq!(error.code, ErrorCode::ChainUnavailable);
        assert!(error.code.is_temporary());
        assert!(chain.accepted_transactions().is_empty());
    }

    #[tokio::test]
    async fn node_rejection_carries_the_reason() {
        let chain = MockChainClient::new(CHAIN_ID);
        chain.fail_next(
            MockCall::SendRawTransaction,
            ChainError::Rejected("insufficient funds".to_string()),
        );
        let service = build_service_with_chain(&test_config(), chain)
            .await
            .expect("service");

        let response = settle_reward(&service, request("starter", RECIPIENT)).await;
        let error = response.error.expect("error");
        assert_eq!(error.code, ErrorCode::ChainRejected);
        assert!(error.message.contains("insufficient funds"));
    }

    #[test]
    fn error_categories_map_to_codes() {
        let cases = [
            (
                SettlementError::Distribution(DrawError::EmptyDistribution {
                    gacha_id: "g".to_string(),
                }),
                ErrorCode::DistributionInvalid,
            ),
            (
                SettlementError::ChainUnavailable {
                    stage: SettlementStage::Estimating,
                    message: "timeout".to_string(),
                },
                ErrorCode::ChainUnavailable,
            ),
            (
                SettlementError::ChainRejected {
                    stage: SettlementStage::Broadcasting,
                    message: "nonce too low".to_string(),
                },
                ErrorCode::ChainRejected,
            ),
            (
                SettlementError::BroadcastOutcomeUnknown {
                    nonce: 4,
                    tx_hash: H256::repeat_byte(0x11),
                    message: "chain unavailable: response lost".to_string(),
                },
                ErrorCode::BroadcastOutcomeUnknown,
            ),
            (
                SettlementError::EncodingOverflow {
                    character_id: "A".to_string(),
                },
                ErrorCode::RewardEncodingOverflow,
            ),
            (
                SettlementError::Configuration("bad".to_string()),
                ErrorCode::InternalError,
            ),
        ];
        for (err, code) in cases {
            assert_eq!(error_code_for(&err), code, "{err}");
        }
    }
}
