use super::{
    to_db_int, Agent, EventRecord, Job, JobUpdate, NewAgent, NewEventRecord, NewJob,
    ProjectionStore, SyncCursor,
};
use crate::status::JobStatus;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::Mutex;

#[derive(Default)]
struct State {
    last_block: u64,
    jobs: BTreeMap<String, Job>,
    agents: BTreeMap<String, Agent>,
    events: Vec<EventRecord>,
}

/// Process-local cursor and projection. Clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new(start_block: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                last_block: start_block,
                ..State::default()
            })),
        }
    }

    pub async fn jobs(&self) -> Vec<Job> {
        self.state.lock().await.jobs.values().cloned().collect()
    }

    pub async fn agents(&self) -> Vec<Agent> {
        self.state.lock().await.agents.values().cloned().collect()
    }

    pub async fn events(&self) -> Vec<EventRecord> {
        self.state.lock().await.events.clone()
    }
}

impl SyncCursor for MemoryStore {
    async fn read(&self) -> Result<u64> {
        Ok(self.state.lock().await.last_block)
    }

    async fn advance(&self, block_number: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.last_block = state.last_block.max(block_number);
        Ok(())
    }
}

impl ProjectionStore for MemoryStore {
    async fn upsert_agent(&self, agent: &NewAgent, now: DateTime<Utc>) -> Result<()> {
        let row = Agent {
            agent_id: agent.agent_id.clone(),
            name: agent.name.clone(),
            wallet: agent.wallet.clone(),
            registered_block: to_db_int(agent.registered_block)?,
            created_at: now,
        };
        self.state
            .lock()
            .await
            .agents
            .insert(agent.agent_id.clone(), row);
        Ok(())
    }

    async fn upsert_job(&self, job: &NewJob, now: DateTime<Utc>) -> Result<()> {
        let row = Job {
            job_id: job.job_id.clone(),
            title: job.title.clone(),
            poster_id: job.poster_id.clone(),
            claimer_id: None,
            reward: job.reward.clone(),
            status: JobStatus::Open,
            submission_hash: None,
            approved: None,
            created_block: to_db_int(job.created_block)?,
            claimed_block: None,
            submitted_block: None,
            verified_block: None,
            cancelled_block: None,
            created_at: now,
            updated_at: now,
        };
        self.state.lock().await.jobs.insert(job.job_id.clone(), row);
        Ok(())
    }

    async fn job_status(&self, job_id: &str) -> Result<Option<JobStatus>> {
        Ok(self.state.lock().await.jobs.get(job_id).map(|job| job.status))
    }

    async fn update_job(
        &self,
        job_id: &str,
        update: &JobUpdate,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let block = match update {
            JobUpdate::Claimed { block, .. }
            | JobUpdate::Submitted { block, .. }
            | JobUpdate::Verified { block, .. }
            | JobUpdate::Cancelled { block } => Some(to_db_int(*block)?),
            JobUpdate::ClaimExpired | JobUpdate::VerifyExpired | JobUpdate::EmergencyReleased => None,
        };
        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.get_mut(job_id) else {
            return Ok(0);
        };
        match update {
            JobUpdate::Claimed { claimer_id, .. } => {
                job.claimer_id = Some(claimer_id.clone());
                job.claimed_block = block;
            }
            JobUpdate::Submitted {
                submission_hash, ..
            } => {
                job.submission_hash = Some(submission_hash.clone());
                job.submitted_block = block;
            }
            JobUpdate::Verified { approved, .. } => {
                job.approved = Some(*approved);
                job.verified_block = block;
            }
            JobUpdate::Cancelled { .. } => {
                job.cancelled_block = block;
            }
            JobUpdate::ClaimExpired | JobUpdate::VerifyExpired | JobUpdate::EmergencyReleased => {}
        }
        job.status = update.status();
        job.updated_at = now;
        Ok(1)
    }

    async fn append_event(&self, record: &NewEventRecord, now: DateTime<Utc>) -> Result<bool> {
        let block_number = to_db_int(record.block_number)?;
        let log_index = to_db_int(record.log_index)?;
        let mut state = self.state.lock().await;
        let duplicate = state
            .events
            .iter()
            .any(|e| e.tx_hash == record.tx_hash && e.log_index == log_index);
        if duplicate {
            return Ok(false);
        }
        let id = state.events.len() as i64 + 1;
        state.events.push(EventRecord {
            id,
            event_type: record.event_type.clone(),
            job_id: record.job_id.clone(),
            agent_id: record.agent_id.clone(),
            tx_hash: record.tx_hash.clone(),
            block_number,
            log_index,
            data: record.data.clone(),
            created_at: now,
        });
        Ok(true)
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self.state.lock().await.jobs.get(job_id).cloned())
    }

    async fn job_events(&self, job_id: &str) -> Result<Vec<EventRecord>> {
        let mut events: Vec<EventRecord> = self
            .state
            .lock()
            .await
            .events
            .iter()
            .filter(|e| e.job_id.as_deref() == Some(job_id))
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.block_number, e.log_index, e.id));
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cursor_starts_at_configured_block_and_never_rewinds() {
        let store = MemoryStore::new(42);
        assert_eq!(store.read().await.unwrap(), 42);

        store.advance(5100).await.unwrap();
        assert_eq!(store.read().await.unwrap(), 5100);

        store.advance(100).await.unwrap();
        assert_eq!(store.read().await.unwrap(), 5100);
    }

    #[tokio::test]
    async fn duplicate_audit_rows_are_ignored() {
        let store = MemoryStore::new(0);
        let record = NewEventRecord {
            event_type: "JobCancelled".to_string(),
            job_id: Some("0xaa".to_string()),
            agent_id: None,
            tx_hash: "0x01".to_string(),
            block_number: 7,
            log_index: 2,
            data: serde_json::json!({"event": "JobCancelled"}),
        };
        let now = Utc::now();
        assert!(store.append_event(&record, now).await.unwrap());
        assert!(!store.append_event(&record, now).await.unwrap());
        assert_eq!(store.events().await.len(), 1);
    }

    #[tokio::test]
    async fn out_of_range_block_leaves_job_untouched() {
        let store = MemoryStore::new(0);
        let job = NewJob {
            job_id: "0xaa".to_string(),
            title: "T".to_string(),
            poster_id: "p1".to_string(),
            reward: "1000".to_string(),
            created_block: 500,
        };
        store.upsert_job(&job, Utc::now()).await.unwrap();
        let before = store.get_job("0xaa").await.unwrap();

        let update = JobUpdate::Claimed {
            claimer_id: "p2".to_string(),
            block: u64::MAX,
        };
        assert!(store.update_job("0xaa", &update, Utc::now()).await.is_err());
        assert_eq!(store.get_job("0xaa").await.unwrap(), before);
    }

    #[tokio::test]
    async fn update_of_unknown_job_touches_nothing() {
        let store = MemoryStore::new(0);
        let rows = store
            .update_job("0xaa", &JobUpdate::ClaimExpired, Utc::now())
            .await
            .unwrap();
        assert_eq!(rows, 0);
        assert!(store.jobs().await.is_empty());
    }
}
