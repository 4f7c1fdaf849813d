use crate::app_env::AppEnv;
use indexer::{
    chain::ChainLogSource,
    store::{self, postgres, ProjectionStore, SyncCursor},
    JobStatus, SyncError, SyncReport,
};
use indexer_api::{
    rpc::{IndexerApiServer, INTERNAL_ERROR, INVALID_PARAMS, NOT_FOUND, SYNC_BUSY, UNAUTHORIZED},
    types::{Agent, EventEntry, Job, JobDetail, Stats, StatusCount, SyncStatus, SyncSummary},
};
use jsonrpsee::{
    core::async_trait,
    types::{ErrorObject, ErrorObjectOwned},
};
use std::{
    fmt::Display,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 500;

pub struct IndexerApiImpl {
    pub app_env: Arc<AppEnv>,
}

fn rpc_error(code: i32, message: impl Into<String>) -> ErrorObjectOwned {
    ErrorObject::owned(code, message.into(), None::<()>)
}

/// Logs the cause and hands the caller a message without internal detail.
fn internal(context: &str, err: impl Display) -> ErrorObjectOwned {
    error!("{}: {:#}", context, err);
    rpc_error(INTERNAL_ERROR, "internal error")
}

fn page(limit: Option<u32>, offset: Option<u32>) -> (i64, i64) {
    let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    (i64::from(limit), i64::from(offset.unwrap_or(0)))
}

fn block(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

fn to_api_job(job: store::Job) -> Job {
    Job {
        job_id: job.job_id,
        title: job.title,
        poster_id: job.poster_id,
        claimer_id: job.claimer_id,
        reward: job.reward,
        status: job.status.to_string(),
        submission_hash: job.submission_hash,
        approved: job.approved,
        created_block: block(job.created_block),
        claimed_block: job.claimed_block.map(block),
        submitted_block: job.submitted_block.map(block),
        verified_block: job.verified_block.map(block),
        cancelled_block: job.cancelled_block.map(block),
        updated_at: job.updated_at.to_rfc3339(),
    }
}

fn to_api_agent(agent: store::Agent) -> Agent {
    Agent {
        agent_id: agent.agent_id,
        name: agent.name,
        wallet: agent.wallet,
        registered_block: block(agent.registered_block),
    }
}

fn to_api_event(event: store::EventRecord) -> EventEntry {
    EventEntry {
        event_type: event.event_type,
        job_id: event.job_id,
        agent_id: event.agent_id,
        tx_hash: event.tx_hash,
        block_number: block(event.block_number),
        log_index: block(event.log_index),
        data: event.data,
    }
}

fn to_api_stats(stats: postgres::Stats) -> Stats {
    Stats {
        total_jobs: count(stats.total_jobs),
        by_status: stats
            .by_status
            .into_iter()
            .map(|s| StatusCount {
                status: s.status.to_string(),
                count: count(s.count),
            })
            .collect(),
        total_reward: stats.total_reward,
        agents: count(stats.agents),
        events: count(stats.events),
        last_block: stats.last_block,
    }
}

fn to_summary(report: SyncReport) -> SyncSummary {
    SyncSummary {
        from_block: report.from_block,
        synced_to: report.synced_to,
        chunks: report.chunks,
        events_applied: report.events_applied,
        logs_skipped: report.logs_skipped,
        consistency_gaps: report.consistency_gaps,
    }
}

fn authorized(expected: Option<&str>, given: Option<&str>) -> bool {
    match expected {
        None => true,
        Some(expected) => given == Some(expected),
    }
}

/// Time left before another trigger is accepted, `None` when it may run now.
fn cooldown_remaining(
    last: Option<Instant>,
    now: Instant,
    cooldown: Duration,
) -> Option<Duration> {
    let elapsed = now.saturating_duration_since(last?);
    cooldown.checked_sub(elapsed).filter(|left| !left.is_zero())
}

/// Spaces accepted `triggerSync` calls by a fixed cooldown.
pub struct TriggerGate {
    cooldown: Duration,
    last: Mutex<Option<Instant>>,
}

/// An accepted trigger, remembering the stamp it replaced.
pub struct TriggerStamp {
    at: Instant,
    previous: Option<Instant>,
}

impl TriggerGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last: Mutex::new(None),
        }
    }

    /// Stamps `now`, or returns the time left when the cooldown is running.
    pub async fn acquire(&self, now: Instant) -> Result<TriggerStamp, Duration> {
        let mut last = self.last.lock().await;
        if let Some(left) = cooldown_remaining(*last, now, self.cooldown) {
            return Err(left);
        }
        let previous = last.replace(now);
        Ok(TriggerStamp { at: now, previous })
    }

    /// Undoes a stamp whose sync never started.
    pub async fn release(&self, stamp: TriggerStamp) {
        let mut last = self.last.lock().await;
        if *last == Some(stamp.at) {
            *last = stamp.previous;
        }
    }
}

#[async_trait]
impl IndexerApiServer for IndexerApiImpl {
    async fn list_jobs(
        &self,
        status: Option<String>,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<Job>, ErrorObjectOwned> {
        let status = status
            .map(|s| s.parse::<JobStatus>())
            .transpose()
            .map_err(|err| rpc_error(INVALID_PARAMS, err.to_string()))?;
        let (limit, offset) = page(limit, offset);
        let jobs = self
            .app_env
            .db
            .list_jobs(status, limit, offset)
            .await
            .map_err(|err| internal("Failed to list jobs", err))?;
        Ok(jobs.into_iter().map(to_api_job).collect())
    }

    async fn get_job(&self, job_id: String) -> Result<JobDetail, ErrorObjectOwned> {
        debug!("Getting job {}", job_id);
        let db = &self.app_env.db;
        let job = db
            .get_job(&job_id)
            .await
            .map_err(|err| internal("Failed to load job", err))?
            .ok_or_else(|| rpc_error(NOT_FOUND, "Job not found"))?;
        let events = db
            .job_events(&job_id)
            .await
            .map_err(|err| internal("Failed to load job events", err))?;
        Ok(JobDetail {
            job: to_api_job(job),
            events: events.into_iter().map(to_api_event).collect(),
        })
    }

    async fn list_agents(
        &self,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<Agent>, ErrorObjectOwned> {
        let (limit, offset) = page(limit, offset);
        let agents = self
            .app_env
            .db
            .list_agents(limit, offset)
            .await
            .map_err(|err| internal("Failed to list agents", err))?;
        Ok(agents.into_iter().map(to_api_agent).collect())
    }

    async fn jobs_by_wallet(&self, wallet: String) -> Result<Vec<Job>, ErrorObjectOwned> {
        if wallet.trim().is_empty() {
            return Err(rpc_error(INVALID_PARAMS, "wallet must not be empty"));
        }
        let jobs = self
            .app_env
            .db
            .jobs_by_wallet(&wallet)
            .await
            .map_err(|err| internal("Failed to look up wallet jobs", err))?;
        Ok(jobs.into_iter().map(to_api_job).collect())
    }

    async fn get_stats(&self) -> Result<Stats, ErrorObjectOwned> {
        let stats = self
            .app_env
            .db
            .stats()
            .await
            .map_err(|err| internal("Failed to compute stats", err))?;
        Ok(to_api_stats(stats))
    }

    async fn recent_events(
        &self,
        event_type: Option<String>,
        limit: Option<u32>,
    ) -> Result<Vec<EventEntry>, ErrorObjectOwned> {
        let (limit, _) = page(limit, None);
        let events = self
            .app_env
            .db
            .recent_events(event_type.as_deref(), limit)
            .await
            .map_err(|err| internal("Failed to list events", err))?;
        Ok(events.into_iter().map(to_api_event).collect())
    }

    async fn get_sync_status(&self) -> Result<SyncStatus, ErrorObjectOwned> {
        let engine = &self.app_env.engine;
        let last_block = engine
            .cursor()
            .read()
            .await
            .map_err(|err| internal("Failed to read sync cursor", err))?;
        let chain_head = match engine.source().current_height().await {
            Ok(head) => Some(head),
            Err(err) => {
                warn!("Chain head unavailable: {}", err);
                None
            }
        };
        Ok(SyncStatus {
            last_block,
            chain_head,
            running: engine.is_running(),
        })
    }

    async fn trigger_sync(&self, token: Option<String>) -> Result<SyncSummary, ErrorObjectOwned> {
        let env = &self.app_env;
        if !authorized(env.admin_token.as_deref(), token.as_deref()) {
            warn!("Rejected triggerSync with a bad token");
            return Err(rpc_error(UNAUTHORIZED, "Unauthorized"));
        }
        let stamp = env
            .trigger_gate
            .acquire(Instant::now())
            .await
            .map_err(|left| {
                rpc_error(
                    SYNC_BUSY,
                    format!("Sync was triggered recently, retry in {}s", left.as_secs() + 1),
                )
            })?;

        info!("Manual sync triggered");
        match env.engine.run().await {
            Ok(report) => Ok(to_summary(report)),
            Err(SyncError::AlreadyRunning) => {
                env.trigger_gate.release(stamp).await;
                Err(rpc_error(SYNC_BUSY, "A sync run is already in progress"))
            }
            Err(err) => Err(internal("Manual sync failed", err)),
        }
    }

    async fn health_check(&self) -> Result<(), ErrorObjectOwned> {
        Ok(())
    }
}
