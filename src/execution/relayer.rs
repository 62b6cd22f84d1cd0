use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

use super::executor::{DepositContext, SettlementExecutor, SettlementFailure, SettlementReceipt};
use crate::error::AppResult;
use crate::ledger::models::AssetType;

#[derive(Debug, Serialize)]
struct WithdrawRequest<'a> {
    link_id: String,
    deposit_tx: &'a str,
    asset: AssetType,
    mint: Option<&'static str>,
    recipient: &'a str,
    amount: String,
}

#[derive(Debug, Deserialize)]
struct WithdrawResponse {
    #[serde(default)]
    signature: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Settlement executor that hands withdrawals to the privacy relayer over HTTP
pub struct RelayerExecutor {
    relayer_url: String,
    client: reqwest::Client,
}

impl RelayerExecutor {
    pub fn new(relayer_url: impl Into<String>, request_timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            relayer_url: relayer_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn withdraw_url(&self) -> String {
        format!("{}/withdraw", self.relayer_url)
    }
}

#[async_trait]
impl SettlementExecutor for RelayerExecutor {
    async fn execute(
        &self,
        ctx: &DepositContext,
        recipient: &str,
        net_amount: u64,
    ) -> Result<SettlementReceipt, SettlementFailure> {
        let request = WithdrawRequest {
            link_id: ctx.link_id.to_string(),
            deposit_tx: &ctx.deposit_tx,
            asset: ctx.asset_type,
            mint: ctx.asset_type.mint(),
            recipient,
            // Amounts travel as strings so no JSON parser rounds them
            amount: net_amount.to_string(),
        };

        info!(
            "Submitting withdrawal for link {} ({} {}) to relayer",
            ctx.link_id, net_amount, ctx.asset_type
        );

        let response = self
            .client
            .post(self.withdraw_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!("Relayer request for link {} failed: {}", ctx.link_id, e);
                SettlementFailure::Unavailable(format!("relayer unreachable: {}", e))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            SettlementFailure::Unavailable(format!("failed to read relayer response: {}", e))
        })?;

        let receipt = interpret_response(status, &body);
        if let Err(failure) = &receipt {
            error!("Relayer refused withdrawal for link {}: {}", ctx.link_id, failure);
        }
        receipt
    }

    fn name(&self) -> &'static str {
        "relayer"
    }
}

/// 4xx means the relayer looked at the withdrawal and refused it; anything
/// else that lacks a signature means nothing was paid.
fn interpret_response(status: StatusCode, body: &str) -> Result<SettlementReceipt, SettlementFailure> {
    let parsed: Option<WithdrawResponse> = serde_json::from_str(body).ok();

    if status.is_client_error() {
        let reason = parsed
            .and_then(|r| r.error)
            .unwrap_or_else(|| format!("HTTP {}", status));
        return Err(SettlementFailure::Rejected(reason));
    }

    if !status.is_success() {
        return Err(SettlementFailure::Unavailable(format!("HTTP {}", status)));
    }

    match parsed.and_then(|r| r.signature) {
        Some(signature) if !signature.trim().is_empty() => Ok(SettlementReceipt {
            withdraw_tx: signature,
        }),
        _ => Err(SettlementFailure::Unavailable(
            "relayer response carried no signature".to_string(),
        )),
    }
}
