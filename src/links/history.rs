use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::AppResult;
use crate::ledger::models::PaymentLink;
use crate::ledger::LinkStore;
use crate::probe::TransactionScanner;
use crate::wallet::AddressVerifier;

/// What one view found for an address
#[derive(Debug, Default)]
pub struct ViewMatches {
    pub links: Vec<PaymentLink>,
    /// The view stopped before exhausting its source
    pub truncated: bool,
}

/// Link ids an address touched, newest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkHistory {
    pub link_ids: Vec<Uuid>,
    /// Older links may exist beyond the configured scan cap
    pub truncated: bool,
}

/// One way of answering "which links did this address touch"
#[async_trait]
pub trait HistoryView: Send + Sync {
    fn name(&self) -> &'static str;

    async fn links_for(&self, address: &str) -> AppResult<ViewMatches>;
}

/// Links whose creator attribution matches
pub struct AttributedView {
    store: Arc<dyn LinkStore>,
}

impl AttributedView {
    pub fn new(store: Arc<dyn LinkStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HistoryView for AttributedView {
    fn name(&self) -> &'static str {
        "attributed"
    }

    async fn links_for(&self, address: &str) -> AppResult<ViewMatches> {
        Ok(ViewMatches {
            links: self.store.find_by_creator(address).await?,
            truncated: false,
        })
    }
}

/// Links funded or paid out by any of the address's settlement transactions.
///
/// Covers records written before creator attribution existed. Pages back
/// through the address's signatures until they run out or `scan_cap`
/// signatures have been examined.
pub struct SettlementScanView {
    store: Arc<dyn LinkStore>,
    scanner: Arc<dyn TransactionScanner>,
    page_size: usize,
    scan_cap: usize,
}

impl SettlementScanView {
    pub fn new(
        store: Arc<dyn LinkStore>,
        scanner: Arc<dyn TransactionScanner>,
        page_size: usize,
        scan_cap: usize,
    ) -> Self {
        Self {
            store,
            scanner,
            page_size: page_size.max(1),
            scan_cap,
        }
    }
}

#[async_trait]
impl HistoryView for SettlementScanView {
    fn name(&self) -> &'static str {
        "settlement_scan"
    }

    async fn links_for(&self, address: &str) -> AppResult<ViewMatches> {
        let mut matches = ViewMatches::default();
        let mut before: Option<String> = None;
        let mut scanned = 0;

        while scanned < self.scan_cap {
            let limit = self.page_size.min(self.scan_cap - scanned);
            let page = self
                .scanner
                .signatures_page(address, before.as_deref(), limit)
                .await?;
            scanned += page.len();

            if !page.is_empty() {
                matches.links.extend(self.store.find_by_tx_refs(&page).await?);
            }
            if page.len() < limit {
                return Ok(matches);
            }
            before = page.last().cloned();
        }

        warn!(
            "Settlement scan for {} stopped at {} signatures; older links are not listed",
            address, self.scan_cap
        );
        matches.truncated = true;
        Ok(matches)
    }
}

/// Union of every history view, deduplicated by link id, newest first
pub struct HistoryReconciler {
    views: Vec<Box<dyn HistoryView>>,
}

impl HistoryReconciler {
    pub fn new(
        store: Arc<dyn LinkStore>,
        scanner: Arc<dyn TransactionScanner>,
        page_size: usize,
        scan_cap: usize,
    ) -> Self {
        Self::with_views(vec![
            Box::new(AttributedView::new(store.clone())),
            Box::new(SettlementScanView::new(store, scanner, page_size, scan_cap)),
        ])
    }

    pub fn with_views(views: Vec<Box<dyn HistoryView>>) -> Self {
        Self { views }
    }

    #[instrument(skip(self))]
    pub async fn history(&self, address: &str) -> AppResult<LinkHistory> {
        AddressVerifier::validate_address(address)?;

        // Every view always runs; one failing fails the lookup
        let results = join_all(self.views.iter().map(|view| view.links_for(address))).await;

        let mut seen = HashSet::new();
        let mut links = Vec::new();
        let mut truncated = false;
        for (view, result) in self.views.iter().zip(results) {
            let found = result?;
            debug!(
                "History view {} matched {} links for {}",
                view.name(),
                found.links.len(),
                address
            );
            truncated |= found.truncated;
            links.extend(found.links.into_iter().filter(|link| seen.insert(link.id)));
        }

        links.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(LinkHistory {
            link_ids: links.into_iter().map(|link| link.id).collect(),
            truncated,
        })
    }
}
