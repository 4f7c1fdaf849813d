use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: String,
    pub title: String,
    pub poster_id: String,
    pub claimer_id: Option<String>,
    /// Decimal string, token base units.
    pub reward: String,
    pub status: String,
    pub submission_hash: Option<String>,
    pub approved: Option<bool>,
    pub created_block: u64,
    pub claimed_block: Option<u64>,
    pub submitted_block: Option<u64>,
    pub verified_block: Option<u64>,
    pub cancelled_block: Option<u64>,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub agent_id: String,
    pub name: String,
    pub wallet: String,
    pub registered_block: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEntry {
    pub event_type: String,
    pub job_id: Option<String>,
    pub agent_id: Option<String>,
    pub tx_hash: String,
    pub block_number: u64,
    pub log_index: u64,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetail {
    pub job: Job,
    pub events: Vec<EventEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCount {
    pub status: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_jobs: u64,
    pub by_status: Vec<StatusCount>,
    pub total_reward: String,
    pub agents: u64,
    pub events: u64,
    pub last_block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub last_block: u64,
    pub chain_head: Option<u64>,
    pub running: bool,
}

/// Summary of a sync run started through `triggerSync`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub from_block: u64,
    pub synced_to: u64,
    pub chunks: u64,
    pub events_applied: u64,
    pub logs_skipped: u64,
    pub consistency_gaps: u64,
}
