mod bootstrap;
mod reward_endpoint;

use anyhow::{Context, Result};
use observability::init_tracing;
use platform_core::{AppConfig, ErrorCode, ResponseEnvelope};
use reward_endpoint::{SettleRewardRequest, SettleRewardResponse, settle_reward};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().context("loading configuration")?;
    init_tracing(&config.app.service_name, &config.observability.log_filter);
    info!(
        env = config.app.env.as_str(),
        rpc_url = %config.chain.rpc_url,
        gachas = config.gachas.len(),
        "configuration loaded"
    );

    let service = bootstrap::build_service(&config)
        .await
        .context("starting reward settlement")?;
    info!(
        chain_id = service.chain_id(),
        operator = %gacha_domain::format_address(&service.operator()),
        "reward settlement ready"
    );

    let mut args = std::env::args().skip(1);
    if let (Some(gacha_id), Some(recipient)) = (args.next(), args.next()) {
        let response = settle_reward(&service, SettleRewardRequest { gacha_id, recipient }).await;
        println!("{}", serde_json::to_string(&response)?);
        return Ok(());
    }

    // One JSON request per line on stdin, one envelope per line on stdout.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<SettleRewardRequest>(&line) {
            Ok(request) => settle_reward(&service, request).await,
            Err(err) => ResponseEnvelope::<SettleRewardResponse>::err(
                ErrorCode::RequestInvalid,
                format!("malformed request: {err}"),
            ),
        };
        let mut encoded = serde_json::to_vec(&response)?;
        encoded.push(b'\n');
        stdout.write_all(&encoded).await?;
        stdout.flush().await?;
    }
    info!("input closed, shutting down");
    Ok(())
}
