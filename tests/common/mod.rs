#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Barrier;

use paylink::config::AppConfig;
use paylink::error::{AppError, AppResult};
use paylink::execution::{DepositContext, SettlementExecutor, SettlementFailure, SettlementReceipt};
use paylink::ledger::models::AssetType;
use paylink::ledger::{InMemoryLinkStore, LinkStore};
use paylink::links::LinkService;
use paylink::probe::{LedgerProbe, ProbeOutcome, TransactionScanner};

pub const POOL: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";
pub const ADDR_A: &str = "4Nd1mBQtrMJVYVfKf2PJy9NZUZdTAsp7D4xWLs4gDB4T";
pub const ADDR_B: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";
pub const CREATOR: &str = "DRpbCBMxVnDK7maPM5tGv6MvB3v1sRMC86PZ8okm21hy";

/// Probe whose verdict the test controls
pub struct ScriptedProbe {
    outcome: Mutex<AppResult<ProbeOutcome>>,
    pub calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(outcome: ProbeOutcome) -> Self {
        Self {
            outcome: Mutex::new(Ok(outcome)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, outcome: ProbeOutcome) {
        *self.outcome.lock().unwrap() = Ok(outcome);
    }

    pub fn fail(&self, message: &str) {
        *self.outcome.lock().unwrap() = Err(AppError::ExternalError(message.to_string()));
    }
}

#[async_trait]
impl LedgerProbe for ScriptedProbe {
    async fn verify(&self, _: &str, pool: &str, _: u64, _: AssetType) -> AppResult<ProbeOutcome> {
        assert_eq!(pool, POOL);
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &*self.outcome.lock().unwrap() {
            Ok(outcome) => Ok(outcome.clone()),
            Err(e) => Err(AppError::ExternalError(e.to_string())),
        }
    }
}

/// Scanner backed by a fixed address -> signatures table
#[derive(Default)]
pub struct StaticScanner {
    signatures: Mutex<HashMap<String, Vec<String>>>,
    pub pages: AtomicUsize,
}

impl StaticScanner {
    /// `signature` becomes the address's most recent transaction
    pub fn add(&self, address: &str, signature: &str) {
        self.signatures
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_default()
            .insert(0, signature.to_string());
    }
}

#[async_trait]
impl TransactionScanner for StaticScanner {
    async fn signatures_page(
        &self,
        address: &str,
        before: Option<&str>,
        limit: usize,
    ) -> AppResult<Vec<String>> {
        self.pages.fetch_add(1, Ordering::SeqCst);
        let table = self.signatures.lock().unwrap();
        let Some(sigs) = table.get(address) else {
            return Ok(Vec::new());
        };
        let start = match before {
            Some(before) => sigs.iter().position(|s| s == before).map_or(sigs.len(), |i| i + 1),
            None => 0,
        };
        Ok(sigs.iter().skip(start).take(limit).cloned().collect())
    }
}

pub enum ExecutorMode {
    Succeed,
    Fail(SettlementFailure),
    Hang,
    /// Another caller claims the link while the payout is in flight
    Interloper,
}

pub struct MockExecutor {
    mode: ExecutorMode,
    pub calls: AtomicUsize,
    barrier: Option<Arc<Barrier>>,
    delay: Option<Duration>,
    store: Option<Arc<dyn LinkStore>>,
}

impl MockExecutor {
    pub fn new(mode: ExecutorMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
            barrier: None,
            delay: None,
            store: None,
        }
    }

    /// Hold every payout until `parties` callers are inside the executor
    pub fn with_barrier(mut self, parties: usize) -> Self {
        self.barrier = Some(Arc::new(Barrier::new(parties)));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn with_store(mut self, store: Arc<dyn LinkStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SettlementExecutor for MockExecutor {
    async fn execute(
        &self,
        ctx: &DepositContext,
        _recipient: &str,
        _net_amount: u64,
    ) -> Result<SettlementReceipt, SettlementFailure> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.mode {
            ExecutorMode::Succeed => {}
            ExecutorMode::Fail(failure) => return Err(failure.clone()),
            ExecutorMode::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            ExecutorMode::Interloper => {
                if let Some(store) = &self.store {
                    store
                        .try_mark_claimed(ctx.link_id, "interloperTx")
                        .await
                        .map_err(|e| SettlementFailure::Unavailable(e.to_string()))?;
                }
            }
        }

        Ok(SettlementReceipt {
            withdraw_tx: format!("withdraw{}n{}", ctx.link_id.simple(), n),
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

pub struct Harness {
    pub service: Arc<LinkService>,
    pub store: Arc<InMemoryLinkStore>,
    pub probe: Arc<ScriptedProbe>,
    pub scanner: Arc<StaticScanner>,
    pub executor: Arc<MockExecutor>,
    pub config: AppConfig,
}

pub fn test_config() -> AppConfig {
    AppConfig {
        pool_address: POOL.to_string(),
        relay_token: "test-relay-token-0001".to_string(),
        admin_token: "test-admin-token-0001".to_string(),
        probe_timeout_secs: 1,
        settlement_timeout_secs: 1,
        ..AppConfig::default()
    }
}

pub fn harness(mode: ExecutorMode) -> Harness {
    harness_with(MockExecutor::new(mode))
}

pub fn harness_with(executor: MockExecutor) -> Harness {
    harness_with_config(executor, test_config())
}

pub fn harness_with_config(executor: MockExecutor, config: AppConfig) -> Harness {
    let store = Arc::new(InMemoryLinkStore::new());
    let probe = Arc::new(ScriptedProbe::new(ProbeOutcome::Confirmed));
    let scanner = Arc::new(StaticScanner::default());
    let executor = Arc::new(executor.with_store(store.clone()));

    let service = Arc::new(LinkService::new(
        &config,
        store.clone(),
        probe.clone(),
        scanner.clone(),
        executor.clone(),
    ));

    Harness {
        service,
        store,
        probe,
        scanner,
        executor,
        config,
    }
}

impl Harness {
    /// A 0.017 SOL link with `tx_ref` recorded as its deposit
    pub async fn funded_link(&self, tx_ref: &str) -> uuid::Uuid {
        let link = self
            .service
            .create_link(17_000_000, AssetType::Sol, None)
            .await
            .unwrap();
        self.service
            .record_deposit(&link.id.to_string(), tx_ref)
            .await
            .unwrap();
        link.id
    }
}
