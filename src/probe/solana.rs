use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use super::{LedgerProbe, ProbeOutcome, TransactionScanner};
use crate::error::{AppError, AppResult};
use crate::ledger::models::AssetType;

/// Ledger probe backed by a Solana JSON-RPC endpoint
pub struct SolanaRpcProbe {
    rpc_url: String,
    client: reqwest::Client,
}

impl SolanaRpcProbe {
    pub fn new(rpc_url: impl Into<String>, request_timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            rpc_url: rpc_url.into(),
            client,
        })
    }

    async fn rpc_call(&self, method: &str, params: Value) -> AppResult<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self.client.post(&self.rpc_url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(AppError::ExternalError(format!(
                "{} returned HTTP {}",
                method,
                response.status()
            )));
        }

        let payload: Value = response.json().await?;
        if let Some(error) = payload.get("error") {
            return Err(AppError::ExternalError(format!("{} failed: {}", method, error)));
        }

        Ok(payload.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Whether the cluster knows the signature at any commitment level
    async fn signature_seen(&self, tx_hash: &str) -> AppResult<bool> {
        let result = self
            .rpc_call(
                "getSignatureStatuses",
                json!([[tx_hash], { "searchTransactionHistory": true }]),
            )
            .await?;

        Ok(result
            .get("value")
            .and_then(|v| v.get(0))
            .map(|status| !status.is_null())
            .unwrap_or(false))
    }
}

#[async_trait]
impl LedgerProbe for SolanaRpcProbe {
    async fn verify(
        &self,
        tx_hash: &str,
        expected_pool: &str,
        expected_amount: u64,
        asset: AssetType,
    ) -> AppResult<ProbeOutcome> {
        let tx = self
            .rpc_call(
                "getTransaction",
                json!([
                    tx_hash,
                    {
                        "encoding": "jsonParsed",
                        "commitment": "confirmed",
                        "maxSupportedTransactionVersion": 0
                    }
                ]),
            )
            .await?;

        if tx.is_null() {
            let seen = self.signature_seen(tx_hash).await?;
            debug!("Transaction {} not at confirmed commitment (seen: {})", tx_hash, seen);
            return Ok(if seen {
                ProbeOutcome::Pending
            } else {
                ProbeOutcome::NotFound
            });
        }

        let outcome = evaluate_deposit(&tx, expected_pool, expected_amount, asset);
        info!("Probe verdict for {}: {:?}", tx_hash, outcome);
        Ok(outcome)
    }
}

#[async_trait]
impl TransactionScanner for SolanaRpcProbe {
    async fn signatures_page(
        &self,
        address: &str,
        before: Option<&str>,
        limit: usize,
    ) -> AppResult<Vec<String>> {
        let mut options = json!({ "limit": limit, "commitment": "confirmed" });
        if let Some(before) = before {
            options["before"] = json!(before);
        }

        let result = self
            .rpc_call("getSignaturesForAddress", json!([address, options]))
            .await?;

        let entries = result.as_array().ok_or_else(|| {
            AppError::ExternalError("getSignaturesForAddress returned no array".to_string())
        })?;

        Ok(entries
            .iter()
            .filter_map(|entry| entry.get("signature").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }
}

/// Classify a confirmed `getTransaction` result as a deposit into `pool`.
fn evaluate_deposit(tx: &Value, pool: &str, expected_amount: u64, asset: AssetType) -> ProbeOutcome {
    let meta = &tx["meta"];
    if meta.is_null() {
        return ProbeOutcome::Mismatch("transaction has no status metadata".to_string());
    }
    if !meta["err"].is_null() {
        return ProbeOutcome::Mismatch(format!("transaction failed on-chain: {}", meta["err"]));
    }

    let credited = match asset.mint() {
        None => lamports_credited(tx, pool),
        Some(mint) => tokens_credited(meta, pool, mint),
    };

    match credited {
        None => ProbeOutcome::Mismatch(format!("transaction did not credit pool {}", pool)),
        Some(amount) if amount < expected_amount => ProbeOutcome::Mismatch(format!(
            "pool credited {} but link requires {}",
            amount, expected_amount
        )),
        Some(_) => ProbeOutcome::Confirmed,
    }
}

fn account_keys(tx: &Value) -> Vec<&str> {
    tx["transaction"]["message"]["accountKeys"]
        .as_array()
        .map(|keys| {
            keys.iter()
                // jsonParsed yields objects, plain json yields strings
                .filter_map(|key| key.as_str().or_else(|| key["pubkey"].as_str()))
                .collect()
        })
        .unwrap_or_default()
}

fn lamports_credited(tx: &Value, pool: &str) -> Option<u64> {
    let index = account_keys(tx).iter().position(|key| *key == pool)?;
    let pre = tx["meta"]["preBalances"].get(index)?.as_u64()?;
    let post = tx["meta"]["postBalances"].get(index)?.as_u64()?;
    (post > pre).then(|| post - pre)
}

fn token_amounts(balances: &Value, pool: &str, mint: &str) -> Vec<(u64, u64)> {
    balances
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter(|b| b["owner"].as_str() == Some(pool) && b["mint"].as_str() == Some(mint))
                .filter_map(|b| {
                    let index = b["accountIndex"].as_u64()?;
                    let amount = b["uiTokenAmount"]["amount"].as_str()?.parse::<u64>().ok()?;
                    Some((index, amount))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn tokens_credited(meta: &Value, pool: &str, mint: &str) -> Option<u64> {
    let pre = token_amounts(&meta["preTokenBalances"], pool, mint);
    let post = token_amounts(&meta["postTokenBalances"], pool, mint);

    let credited: u64 = post
        .iter()
        .map(|(index, after)| {
            let before = pre
                .iter()
                .find(|(i, _)| i == index)
                .map(|(_, amount)| *amount)
                .unwrap_or(0);
            after.saturating_sub(before)
        })
        .sum();

    (credited > 0).then_some(credited)
}

#[cfg(test)]
mod tests {
    use super::*;

    const POOL: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";
    const DEPOSITOR: &str = "4Nd1mBQtrMJVYVfKf2PJy9NZUZdTAsp7D4xWLs4gDB4T";

    fn sol_deposit(amount: u64, err: Value) -> Value {
        json!({
            "meta": {
                "err": err,
                "preBalances": [50_000_000u64, 1_000_000u64],
                "postBalances": [50_000_000u64 - amount - 5_000, 1_000_000u64 + amount],
                "preTokenBalances": [],
                "postTokenBalances": []
            },
            "transaction": {
                "message": {
                    "accountKeys": [
                        { "pubkey": DEPOSITOR, "signer": true, "writable": true },
                        { "pubkey": POOL, "signer": false, "writable": true }
                    ]
                }
            }
        })
    }

    #[test]
    fn test_sol_deposit_confirmed() {
        let tx = sol_deposit(17_000_000, Value::Null);
        assert_eq!(
            evaluate_deposit(&tx, POOL, 17_000_000, AssetType::Sol),
            ProbeOutcome::Confirmed
        );
    }

    #[test]
    fn test_sol_deposit_short_amount() {
        let tx = sol_deposit(10_000_000, Value::Null);
        assert!(matches!(
            evaluate_deposit(&tx, POOL, 17_000_000, AssetType::Sol),
            ProbeOutcome::Mismatch(_)
        ));
    }

    #[test]
    fn test_failed_transaction_is_mismatch() {
        let tx = sol_deposit(17_000_000, json!({ "InstructionError": [0, "Custom"] }));
        assert!(matches!(
            evaluate_deposit(&tx, POOL, 17_000_000, AssetType::Sol),
            ProbeOutcome::Mismatch(_)
        ));
    }

    #[test]
    fn test_wrong_pool_is_mismatch() {
        let tx = sol_deposit(17_000_000, Value::Null);
        assert!(matches!(
            evaluate_deposit(&tx, "11111111111111111111111111111111", 17_000_000, AssetType::Sol),
            ProbeOutcome::Mismatch(_)
        ));
    }

    #[test]
    fn test_token_deposit_confirmed() {
        let mint = AssetType::Usdc.mint().unwrap();
        let tx = json!({
            "meta": {
                "err": null,
                "preBalances": [],
                "postBalances": [],
                "preTokenBalances": [
                    { "accountIndex": 2, "mint": mint, "owner": POOL,
                      "uiTokenAmount": { "amount": "5000000", "decimals": 6 } }
                ],
                "postTokenBalances": [
                    { "accountIndex": 2, "mint": mint, "owner": POOL,
                      "uiTokenAmount": { "amount": "17000000", "decimals": 6 } }
                ]
            },
            "transaction": { "message": { "accountKeys": [] } }
        });

        assert_eq!(
            evaluate_deposit(&tx, POOL, 12_000_000, AssetType::Usdc),
            ProbeOutcome::Confirmed
        );
        // Same transfer checked against the other stablecoin credits nothing.
        assert!(matches!(
            evaluate_deposit(&tx, POOL, 12_000_000, AssetType::Usdt),
            ProbeOutcome::Mismatch(_)
        ));
    }
}
