use crate::{
    applier::{Effect, EventApplier},
    chain::{ChainLogSource, ProviderError},
    store::{ProjectionStore, SyncCursor},
};
use alloy::primitives::Address;
use backoff::ExponentialBackoff;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, warn, Instrument};

pub const DEFAULT_CHUNK_SIZE: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub contract: Address,
    /// Maximum number of blocks covered by one log request.
    pub chunk_size: u64,
    pub fetch_initial_backoff: Duration,
    /// Total time one chunk fetch may spend retrying before the run stops.
    pub fetch_max_elapsed: Duration,
}

impl SyncConfig {
    pub fn new(contract: Address) -> Self {
        Self {
            contract,
            chunk_size: DEFAULT_CHUNK_SIZE,
            fetch_initial_backoff: Duration::from_millis(400),
            fetch_max_elapsed: Duration::from_secs(30),
        }
    }

    fn fetch_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.fetch_initial_backoff,
            randomization_factor: 0.1,
            multiplier: 2.0,
            max_interval: Duration::from_secs(10),
            max_elapsed_time: Some(self.fetch_max_elapsed),
            ..Default::default()
        }
    }
}

/// Inclusive block range requested in one `eth_getLogs` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub from: u64,
    pub to: u64,
}

/// Splits `(last_block, head]` into consecutive chunks of at most `size` blocks.
#[derive(Debug, Clone)]
pub struct ChunkRange {
    next: u64,
    head: u64,
    size: u64,
    done: bool,
}

impl ChunkRange {
    pub fn new(last_block: u64, head: u64, size: u64) -> Self {
        Self {
            next: last_block.saturating_add(1),
            head,
            size: size.max(1),
            done: last_block >= head,
        }
    }
}

impl Iterator for ChunkRange {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }
        let from = self.next;
        let to = from.saturating_add(self.size - 1).min(self.head);
        match to.checked_add(1) {
            Some(next) if to < self.head => self.next = next,
            _ => self.done = true,
        }
        Some(Chunk { from, to })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Cursor value when the run started.
    pub from_block: u64,
    /// Cursor value when the run finished.
    pub synced_to: u64,
    pub chunks: u64,
    pub events_applied: u64,
    pub logs_skipped: u64,
    /// Lifecycle events that referenced a job with no row.
    pub consistency_gaps: u64,
    pub rejected: u64,
    /// Logs whose audit row already existed.
    pub duplicates: u64,
}

impl SyncReport {
    pub fn caught_up(&self) -> bool {
        self.chunks == 0
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a sync run is already in progress")]
    AlreadyRunning,
    #[error("failed to read chain head: {0}")]
    Head(#[source] ProviderError),
    #[error("failed to fetch logs for blocks {from}..={to}, cursor left at {cursor}: {source}")]
    ChunkFetch {
        from: u64,
        to: u64,
        cursor: u64,
        #[source]
        source: ProviderError,
    },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Drives catch-up from the cursor to the chain head, one chunk at a time.
///
/// A chunk's events are applied before the cursor moves past it. If a chunk
/// cannot be fetched the run stops and the cursor stays on the last fully
/// applied chunk, so the next run starts from the failed range.
pub struct SyncEngine<S, C, P> {
    source: S,
    cursor: C,
    store: P,
    applier: EventApplier,
    config: SyncConfig,
    in_flight: Mutex<()>,
}

impl<S, C, P> SyncEngine<S, C, P>
where
    S: ChainLogSource,
    C: SyncCursor,
    P: ProjectionStore,
{
    pub fn new(source: S, cursor: C, store: P, applier: EventApplier, config: SyncConfig) -> Self {
        Self {
            source,
            cursor,
            store,
            applier,
            config,
            in_flight: Mutex::new(()),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn cursor(&self) -> &C {
        &self.cursor
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    /// Runs one catch-up pass. Overlapping calls fail fast with
    /// [`SyncError::AlreadyRunning`] instead of queueing.
    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            return Err(SyncError::AlreadyRunning);
        };
        let span = info_span!("sync_run", contract = %self.config.contract);
        self.run_locked().instrument(span).await
    }

    async fn run_locked(&self) -> Result<SyncReport, SyncError> {
        let last_block = self.cursor.read().await?;
        let head = self
            .source
            .current_height()
            .await
            .map_err(SyncError::Head)?;

        let mut report = SyncReport {
            from_block: last_block,
            synced_to: last_block,
            ..SyncReport::default()
        };
        if head <= last_block {
            debug!(last_block, head, "Already caught up");
            return Ok(report);
        }
        info!(
            from = last_block + 1,
            head,
            chunk_size = self.config.chunk_size,
            "Starting sync"
        );

        for chunk in ChunkRange::new(last_block, head, self.config.chunk_size) {
            let span = info_span!("sync_chunk", from = chunk.from, to = chunk.to);
            self.sync_chunk(chunk, &mut report).instrument(span).await?;
            report.synced_to = chunk.to;
        }

        info!(
            synced_to = report.synced_to,
            events = report.events_applied,
            skipped = report.logs_skipped,
            gaps = report.consistency_gaps,
            "Sync finished"
        );
        Ok(report)
    }

    async fn sync_chunk(&self, chunk: Chunk, report: &mut SyncReport) -> Result<(), SyncError> {
        let raw_logs = self.fetch_chunk(chunk).await.map_err(|source| {
            error!(error = %source, "Giving up on chunk");
            SyncError::ChunkFetch {
                from: chunk.from,
                to: chunk.to,
                cursor: report.synced_to,
                source,
            }
        })?;

        let mut events = Vec::with_capacity(raw_logs.len());
        for raw in &raw_logs {
            match self.source.decode(raw) {
                Ok(event) => events.push(event),
                Err(err) => {
                    warn!(error = %err, "Skipping undecodable log");
                    report.logs_skipped += 1;
                }
            }
        }
        events.sort_by_key(|event| event.position());

        for event in &events {
            let outcome = self.applier.apply(&self.store, event).await?;
            report.events_applied += 1;
            if !outcome.recorded {
                report.duplicates += 1;
            }
            match outcome.effect {
                Effect::MissingJob => report.consistency_gaps += 1,
                Effect::Rejected(_) => report.rejected += 1,
                _ => {}
            }
        }

        self.cursor.advance(chunk.to).await?;
        report.chunks += 1;
        debug!(events = events.len(), "Chunk applied");
        Ok(())
    }

    async fn fetch_chunk(&self, chunk: Chunk) -> Result<Vec<S::RawLog>, ProviderError> {
        let source = &self.source;
        let contract = self.config.contract;
        backoff::future::retry(self.config.fetch_backoff(), || async move {
            source
                .fetch_logs(contract, chunk.from, chunk.to)
                .await
                .map_err(|err| {
                    debug!(error = %err, "Retrying log fetch");
                    backoff::Error::transient(err)
                })
        })
        .await
    }
}
