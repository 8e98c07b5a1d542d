//! One ingestion pass over the rollup inbox.
//!
//! # Run
//! 1. `safe = head - confirmations`
//! 2. take the chain's run lock (skip the pass if someone else holds it)
//! 3. resume `reorg_buffer` blocks behind the last checkpoint
//! 4. per `chunk_size` chunk: rollback → fetch → apply → checkpoint
//! 5. release the lock, recording `success` or `failed`

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use proofindex_core::config::{IndexerConfig, MAX_LOCK_TTL_SECS};
use proofindex_core::cursor::RunStatus;
use proofindex_core::error::IndexerError;
use proofindex_core::store::StateStore;
use proofindex_rpc::ChainReader;

use crate::apply::{rpc_err, EventApplier};
use crate::classifier::ProofClassifier;
use crate::events::EventKind;
use crate::fetcher::AdaptiveLogFetcher;
use crate::registry::VerifierRegistry;

/// Outcome of [`Indexer::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub from_block: u64,
    pub to_block: u64,
    /// Logs fetched across all event kinds.
    pub events: usize,
    /// `true` if another run held the lock and nothing was done.
    pub skipped: bool,
}

impl RunReport {
    pub fn skipped() -> Self {
        Self {
            from_block: 0,
            to_block: 0,
            events: 0,
            skipped: true,
        }
    }
}

pub struct Indexer {
    config: IndexerConfig,
    reader: Arc<dyn ChainReader>,
    store: Arc<dyn StateStore>,
    fetcher: AdaptiveLogFetcher,
    applier: EventApplier,
    inbox: String,
}

impl Indexer {
    pub fn new(
        config: IndexerConfig,
        reader: Arc<dyn ChainReader>,
        store: Arc<dyn StateStore>,
        registry: Arc<VerifierRegistry>,
    ) -> Self {
        let fetcher = AdaptiveLogFetcher::from_config(reader.clone(), &config.fetch);
        let classifier = ProofClassifier::new(registry, reader.clone());
        let applier = EventApplier::new(store.clone(), reader.clone(), classifier);
        Self {
            inbox: config.inbox_address.to_lowercase(),
            config,
            reader,
            store,
            fetcher,
            applier,
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<VerifierRegistry> {
        self.applier.classifier().registry()
    }

    pub fn classifier(&self) -> &ProofClassifier {
        self.applier.classifier()
    }

    fn lock_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let ttl = self.config.lock_ttl_secs.min(MAX_LOCK_TTL_SECS);
        now + chrono::Duration::seconds(ttl as i64)
    }

    /// Perform at most one ingestion pass.
    ///
    /// Lock contention is not an error: the pass is reported as skipped.
    pub async fn run(&mut self) -> Result<RunReport, IndexerError> {
        let chain_id = self.config.chain_id;
        let head = self.reader.latest_block_number().await.map_err(rpc_err)?;
        let safe = head.saturating_sub(self.config.confirmations);

        let token = Uuid::new_v4().to_string();
        let now = Utc::now();
        if !self
            .store
            .try_acquire_lock(chain_id, &token, self.lock_expiry(now), now)
            .await?
        {
            info!(chain_id, "run lock held elsewhere, skipping pass");
            return Ok(RunReport::skipped());
        }
        info!(chain_id, head, safe, token = %token, "run started");

        let result = self.run_locked(&token, safe).await;
        let finished = Utc::now();
        match &result {
            Ok(report) => {
                self.store
                    .release_lock(chain_id, &token, RunStatus::Success, None, finished)
                    .await?;
                info!(
                    chain_id,
                    from = report.from_block,
                    to = report.to_block,
                    events = report.events,
                    "run finished"
                );
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(release) = self
                    .store
                    .release_lock(chain_id, &token, RunStatus::Failed, Some(&message), finished)
                    .await
                {
                    warn!(chain_id, error = %release, "could not release lock after failure");
                }
                error!(chain_id, error = %e, "run failed");
            }
        }
        result
    }

    async fn run_locked(&mut self, token: &str, safe: u64) -> Result<RunReport, IndexerError> {
        let chain_id = self.config.chain_id;
        let start_block = self.config.start_block;
        let checkpoint = self
            .store
            .cursor(chain_id)
            .await?
            .and_then(|c| c.last_processed_block);
        let from = match checkpoint {
            Some(last) => last.saturating_sub(self.config.reorg_buffer).max(start_block),
            None => start_block,
        };

        let mut report = RunReport {
            from_block: from,
            to_block: safe,
            events: 0,
            skipped: false,
        };
        if from > safe {
            info!(chain_id, from, safe, "nothing to index yet");
            return Ok(report);
        }

        let mut start = from;
        loop {
            let end = start
                .saturating_add(self.config.chunk_size.max(1) - 1)
                .min(safe);
            let events = self.process_range(start, end).await?;
            report.events += events;

            let now = Utc::now();
            self.store
                .checkpoint(chain_id, token, end, self.lock_expiry(now), now)
                .await?;
            info!(chain_id, from = start, to = end, events, "chunk processed");

            if end >= safe {
                break;
            }
            start = end + 1;
        }
        Ok(report)
    }

    /// Roll back and re-derive everything from blocks `[from, to]`.
    /// Returns the number of logs fetched.
    pub async fn process_range(&mut self, from: u64, to: u64) -> Result<usize, IndexerError> {
        self.applier.begin_range();
        self.applier.rollback(from, to).await?;
        self.applier.reset_last_verified(from).await?;

        let mut logs = Vec::new();
        for kind in EventKind::ALL {
            let batch = self
                .fetcher
                .fetch(&self.inbox, &kind.topic0(), from, to)
                .await
                .map_err(rpc_err)?;
            logs.extend(batch.into_iter().map(|log| (kind, log)));
        }
        logs.sort_by_key(|(_, log)| log.position());

        for (kind, log) in &logs {
            if log.is_removed() {
                continue;
            }
            self.applier.apply(*kind, log).await?;
        }
        Ok(logs.len())
    }
}
