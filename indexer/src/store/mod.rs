use crate::status::{JobStatus, Transition};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub mod memory;
pub mod postgres;
pub mod schema;

// Jobs table representation
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub title: String,
    pub poster_id: String,
    pub claimer_id: Option<String>,
    pub reward: String,
    pub status: JobStatus,
    pub submission_hash: Option<String>,
    pub approved: Option<bool>,
    pub created_block: i64,
    pub claimed_block: Option<i64>,
    pub submitted_block: Option<i64>,
    pub verified_block: Option<i64>,
    pub cancelled_block: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Agents table representation
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub name: String,
    pub wallet: String,
    pub registered_block: i64,
    pub created_at: DateTime<Utc>,
}

// Events (audit) table representation
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub event_type: String,
    pub job_id: Option<String>,
    pub agent_id: Option<String>,
    pub tx_hash: String,
    pub block_number: i64,
    pub log_index: i64,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAgent {
    pub agent_id: String,
    pub name: String,
    pub wallet: String,
    pub registered_block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub job_id: String,
    pub title: String,
    pub poster_id: String,
    pub reward: String,
    pub created_block: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewEventRecord {
    pub event_type: String,
    pub job_id: Option<String>,
    pub agent_id: Option<String>,
    pub tx_hash: String,
    pub block_number: u64,
    pub log_index: u64,
    pub data: serde_json::Value,
}

/// In-place field sets applied to an existing job row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobUpdate {
    Claimed { claimer_id: String, block: u64 },
    Submitted { submission_hash: String, block: u64 },
    Verified { approved: bool, block: u64 },
    Cancelled { block: u64 },
    ClaimExpired,
    VerifyExpired,
    EmergencyReleased,
}

impl JobUpdate {
    pub fn transition(&self) -> Transition {
        match self {
            JobUpdate::Claimed { .. } => Transition::Claim,
            JobUpdate::Submitted { .. } => Transition::Submit,
            JobUpdate::Verified { .. } => Transition::Verify,
            JobUpdate::Cancelled { .. } => Transition::Cancel,
            JobUpdate::ClaimExpired => Transition::ExpireClaim,
            JobUpdate::VerifyExpired => Transition::ExpireVerification,
            JobUpdate::EmergencyReleased => Transition::EmergencyRelease,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.transition().target()
    }
}

/// Durable watermark of the last block whose logs are fully applied.
#[allow(async_fn_in_trait)]
pub trait SyncCursor {
    async fn read(&self) -> Result<u64>;

    /// Moves the watermark to `block_number`. A value below the stored one is
    /// ignored, so an overlapping or stale writer can never rewind progress.
    async fn advance(&self, block_number: u64) -> Result<()>;
}

/// Write side of the jobs/agents/events projection, plus the per-job reads
/// the applier and the job detail view need.
#[allow(async_fn_in_trait)]
pub trait ProjectionStore {
    /// Full replace keyed by `agent_id`.
    async fn upsert_agent(&self, agent: &NewAgent, now: DateTime<Utc>) -> Result<()>;

    /// Full replace keyed by `job_id`; the row restarts as `open`.
    async fn upsert_job(&self, job: &NewJob, now: DateTime<Utc>) -> Result<()>;

    async fn job_status(&self, job_id: &str) -> Result<Option<JobStatus>>;

    /// Returns the number of rows touched, zero when the job is unknown.
    async fn update_job(&self, job_id: &str, update: &JobUpdate, now: DateTime<Utc>)
        -> Result<u64>;

    /// Returns `false` when a record for the same `(tx_hash, log_index)` exists.
    async fn append_event(&self, record: &NewEventRecord, now: DateTime<Utc>) -> Result<bool>;

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>>;

    /// Audit history of one job in chain order.
    async fn job_events(&self, job_id: &str) -> Result<Vec<EventRecord>>;
}

pub(crate) fn to_db_int(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow::anyhow!("value {} does not fit a BIGINT column", value))
}
