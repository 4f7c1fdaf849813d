use super::{
    to_db_int, Agent, EventRecord, Job, JobUpdate, NewAgent, NewEventRecord, NewJob,
    ProjectionStore, SyncCursor,
};
use crate::status::JobStatus;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};

const JOB_COLUMNS: &str = r#"
    job_id, title, poster_id, claimer_id, reward, status,
    submission_hash, approved, created_block, claimed_block,
    submitted_block, verified_block, cancelled_block, created_at, updated_at
"#;

const EVENT_COLUMNS: &str = r#"
    id, event_type, job_id, agent_id, tx_hash, block_number, log_index, data, created_at
"#;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StatusCount {
    pub status: JobStatus,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub total_jobs: i64,
    pub by_status: Vec<StatusCount>,
    pub total_reward: String,
    pub agents: i64,
    pub events: i64,
    pub last_block: u64,
}

// Database management struct
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    /// Seeds the cursor row on first boot; an existing row is left untouched.
    pub async fn init_cursor(&self, start_block: u64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (id, last_block)
            VALUES (1, $1)
            ON CONFLICT (id) DO NOTHING
        "#,
        )
        .bind(to_db_int(start_block)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Job>, sqlx::Error> {
        sqlx::query_as(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE ($1::job_status IS NULL OR status = $1)
            ORDER BY created_block DESC, job_id
            LIMIT $2 OFFSET $3
        "#
        ))
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn list_agents(&self, limit: i64, offset: i64) -> Result<Vec<Agent>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT agent_id, name, wallet, registered_block, created_at
            FROM agents
            ORDER BY registered_block DESC, agent_id
            LIMIT $1 OFFSET $2
        "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    /// Jobs posted or claimed by the agent registered with `wallet`. When no
    /// agent has exactly that wallet, agents whose wallet contains it match.
    pub async fn jobs_by_wallet(&self, wallet: &str) -> Result<Vec<Job>, sqlx::Error> {
        let wallet = wallet.trim().to_lowercase();
        sqlx::query_as(&format!(
            r#"
            WITH exact AS (
                SELECT agent_id FROM agents WHERE wallet = $1
            ),
            matched AS (
                SELECT agent_id FROM exact
                UNION ALL
                SELECT agent_id FROM agents
                WHERE NOT EXISTS (SELECT 1 FROM exact) AND wallet LIKE $2
            )
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE poster_id IN (SELECT agent_id FROM matched)
               OR claimer_id IN (SELECT agent_id FROM matched)
            ORDER BY created_block DESC, job_id
        "#
        ))
        .bind(&wallet)
        .bind(like_pattern(&wallet))
        .fetch_all(&self.pool)
        .await
    }

    pub async fn stats(&self) -> Result<Stats> {
        let by_status: Vec<StatusCount> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*) AS count
            FROM jobs
            GROUP BY status
            ORDER BY status
        "#,
        )
        .fetch_all(&self.pool)
        .await?;
        let total_reward: String =
            sqlx::query_scalar("SELECT COALESCE(SUM(reward::NUMERIC), 0)::TEXT FROM jobs")
                .fetch_one(&self.pool)
                .await?;
        let agents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM agents")
            .fetch_one(&self.pool)
            .await?;
        let events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await?;
        let last_block = self.read().await?;
        Ok(Stats {
            total_jobs: by_status.iter().map(|s| s.count).sum(),
            by_status,
            total_reward,
            agents,
            events,
            last_block,
        })
    }

    /// Newest first.
    pub async fn recent_events(
        &self,
        event_type: Option<&str>,
        limit: i64,
    ) -> Result<Vec<EventRecord>, sqlx::Error> {
        sqlx::query_as(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE ($1::TEXT IS NULL OR event_type = $1)
            ORDER BY block_number DESC, log_index DESC
            LIMIT $2
        "#
        ))
        .bind(event_type)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }
}

fn like_pattern(fragment: &str) -> String {
    let escaped = fragment
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

impl SyncCursor for Database {
    async fn read(&self) -> Result<u64> {
        let last_block: Option<i64> =
            sqlx::query_scalar("SELECT last_block FROM sync_state WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        let last_block = last_block.context("sync cursor has not been initialised")?;
        Ok(u64::try_from(last_block)?)
    }

    async fn advance(&self, block_number: u64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_state
            SET last_block = GREATEST(last_block, $1), updated_at = NOW()
            WHERE id = 1
        "#,
        )
        .bind(to_db_int(block_number)?)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("sync cursor has not been initialised");
        }
        Ok(())
    }
}

impl ProjectionStore for Database {
    async fn upsert_agent(&self, agent: &NewAgent, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agents (agent_id, name, wallet, registered_block, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (agent_id) DO UPDATE SET
                name = EXCLUDED.name,
                wallet = EXCLUDED.wallet,
                registered_block = EXCLUDED.registered_block,
                created_at = EXCLUDED.created_at
        "#,
        )
        .bind(&agent.agent_id)
        .bind(&agent.name)
        .bind(&agent.wallet)
        .bind(to_db_int(agent.registered_block)?)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_job(&self, job: &NewJob, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                job_id, title, poster_id, claimer_id, reward, status,
                submission_hash, approved, created_block, claimed_block,
                submitted_block, verified_block, cancelled_block, created_at, updated_at
            ) VALUES (
                $1, $2, $3, NULL, $4, $5, NULL, NULL, $6, NULL, NULL, NULL, NULL, $7, $7
            )
            ON CONFLICT (job_id) DO UPDATE SET
                title = EXCLUDED.title,
                poster_id = EXCLUDED.poster_id,
                claimer_id = NULL,
                reward = EXCLUDED.reward,
                status = EXCLUDED.status,
                submission_hash = NULL,
                approved = NULL,
                created_block = EXCLUDED.created_block,
                claimed_block = NULL,
                submitted_block = NULL,
                verified_block = NULL,
                cancelled_block = NULL,
                created_at = EXCLUDED.created_at,
                updated_at = EXCLUDED.updated_at
        "#,
        )
        .bind(&job.job_id)
        .bind(&job.title)
        .bind(&job.poster_id)
        .bind(&job.reward)
        .bind(JobStatus::Open)
        .bind(to_db_int(job.created_block)?)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn job_status(&self, job_id: &str) -> Result<Option<JobStatus>> {
        let status = sqlx::query_scalar("SELECT status FROM jobs WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(status)
    }

    async fn update_job(
        &self,
        job_id: &str,
        update: &JobUpdate,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let query = match update {
            JobUpdate::Claimed { claimer_id, block } => sqlx::query(
                r#"
                UPDATE jobs
                SET claimer_id = $4, claimed_block = $5, status = $2, updated_at = $3
                WHERE job_id = $1
            "#,
            )
            .bind(job_id)
            .bind(update.status())
            .bind(now)
            .bind(claimer_id)
            .bind(to_db_int(*block)?),
            JobUpdate::Submitted {
                submission_hash,
                block,
            } => sqlx::query(
                r#"
                UPDATE jobs
                SET submission_hash = $4, submitted_block = $5, status = $2, updated_at = $3
                WHERE job_id = $1
            "#,
            )
            .bind(job_id)
            .bind(update.status())
            .bind(now)
            .bind(submission_hash)
            .bind(to_db_int(*block)?),
            JobUpdate::Verified { approved, block } => sqlx::query(
                r#"
                UPDATE jobs
                SET approved = $4, verified_block = $5, status = $2, updated_at = $3
                WHERE job_id = $1
            "#,
            )
            .bind(job_id)
            .bind(update.status())
            .bind(now)
            .bind(*approved)
            .bind(to_db_int(*block)?),
            JobUpdate::Cancelled { block } => sqlx::query(
                r#"
                UPDATE jobs
                SET cancelled_block = $4, status = $2, updated_at = $3
                WHERE job_id = $1
            "#,
            )
            .bind(job_id)
            .bind(update.status())
            .bind(now)
            .bind(to_db_int(*block)?),
            JobUpdate::ClaimExpired | JobUpdate::VerifyExpired | JobUpdate::EmergencyReleased => {
                sqlx::query("UPDATE jobs SET status = $2, updated_at = $3 WHERE job_id = $1")
                    .bind(job_id)
                    .bind(update.status())
                    .bind(now)
            }
        };
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn append_event(&self, record: &NewEventRecord, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO events (
                event_type, job_id, agent_id, tx_hash,
                block_number, log_index, data, created_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8
            )
            ON CONFLICT (tx_hash, log_index) DO NOTHING
        "#,
        )
        .bind(&record.event_type)
        .bind(&record.job_id)
        .bind(&record.agent_id)
        .bind(&record.tx_hash)
        .bind(to_db_int(record.block_number)?)
        .bind(to_db_int(record.log_index)?)
        .bind(&record.data)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let job = sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn job_events(&self, job_id: &str) -> Result<Vec<EventRecord>> {
        let events = sqlx::query_as(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE job_id = $1
            ORDER BY block_number ASC, log_index ASC, id ASC
        "#
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        app_config::DB, applier::EventApplier, event::DecodedEvent, event::EscrowEvent,
        store::schema::create_schema,
    };

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("0xab"), "%0xab%");
        assert_eq!(like_pattern("a_b%c"), "%a\\_b\\%c%");
    }

    fn count_of(stats: &Stats, status: JobStatus) -> i64 {
        stats
            .by_status
            .iter()
            .find(|s| s.status == status)
            .map_or(0, |s| s.count)
    }

    fn decoded(event: EscrowEvent, block_number: u64, tx_hash: String) -> DecodedEvent {
        DecodedEvent {
            event,
            block_number,
            tx_hash,
            log_index: 0,
        }
    }

    #[tokio::test]
    #[ignore = "requires postgres instance"]
    async fn test_projection_round_trip_and_queries() -> Result<()> {
        let db = Database::new(DB::new_from_environment().await?.pool);
        create_schema(&db.pool()).await?;
        db.init_cursor(0).await?;
        let before = db.stats().await?;

        let nonce = Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
        let job_id = |n: u64| format!("0x{:060x}{:04x}", nonce, n);
        let tx = |n: u64| format!("0x{:060x}{:04x}", nonce, n + 100);
        // Newer than anything an earlier run of this test wrote.
        let block = |n: u64| nonce / 1_000 + n;
        let applier = EventApplier::default();

        // Posted then claimed, with a replay of the claim.
        let posted = decoded(
            EscrowEvent::JobPosted {
                job_id: job_id(1),
                title: "T".to_string(),
                poster_id: "p1".to_string(),
                reward: "1000".to_string(),
            },
            500,
            tx(1),
        );
        let claimed = decoded(
            EscrowEvent::JobClaimed {
                job_id: job_id(1),
                claimer_id: "p2".to_string(),
            },
            510,
            tx(2),
        );
        applier.apply(&db, &posted).await?;
        applier.apply(&db, &claimed).await?;
        let replay = applier.apply(&db, &claimed).await?;
        assert!(!replay.recorded);

        let job = db.get_job(&job_id(1)).await?.expect("job row");
        assert_eq!(job.status, JobStatus::Claimed);
        assert_eq!(job.claimer_id.as_deref(), Some("p2"));
        assert_eq!((job.created_block, job.claimed_block), (500, Some(510)));

        let history = db.job_events(&job_id(1)).await?;
        let types: Vec<_> = history.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, ["JobPosted", "JobClaimed"]);

        // Two agents whose wallets share a prefix: `exact` is a substring of `longer`.
        let exact_agent = format!("agent-{}-a", nonce);
        let longer_agent = format!("agent-{}-b", nonce);
        let exact_wallet = format!("0x{:016x}{}", nonce, "0".repeat(24));
        let longer_wallet = format!("{}ee", exact_wallet);
        for (n, (agent_id, wallet)) in [(&exact_agent, &exact_wallet), (&longer_agent, &longer_wallet)]
            .into_iter()
            .enumerate()
        {
            let register = EscrowEvent::AgentRegistered {
                agent_id: agent_id.clone(),
                name: agent_id.clone(),
                wallet: wallet.clone(),
            };
            applier
                .apply(&db, &decoded(register, block(n as u64), tx(10 + n as u64)))
                .await?;
        }
        let by_exact = EscrowEvent::JobPosted {
            job_id: job_id(2),
            title: "by exact".to_string(),
            poster_id: exact_agent.clone(),
            reward: "250".to_string(),
        };
        let by_longer = EscrowEvent::JobPosted {
            job_id: job_id(3),
            title: "by longer".to_string(),
            poster_id: "p9".to_string(),
            reward: "5".to_string(),
        };
        let claimed_by_longer = EscrowEvent::JobClaimed {
            job_id: job_id(3),
            claimer_id: longer_agent.clone(),
        };
        applier.apply(&db, &decoded(by_exact, 520, tx(20))).await?;
        applier.apply(&db, &decoded(by_longer, 521, tx(21))).await?;
        applier
            .apply(&db, &decoded(claimed_by_longer, 522, tx(22)))
            .await?;

        let ids = |jobs: Vec<Job>| {
            let mut ids: Vec<String> = jobs.into_iter().map(|j| j.job_id).collect();
            ids.sort();
            ids
        };
        // Exact match wins, the longer wallet is not pulled in; case is ignored.
        let exact = db.jobs_by_wallet(&exact_wallet.to_uppercase()).await?;
        assert_eq!(ids(exact), vec![job_id(2)]);
        // No agent owns the fragment exactly, so both wallets match partially.
        let fragment = &exact_wallet[2..18];
        assert_eq!(ids(db.jobs_by_wallet(fragment).await?), vec![job_id(2), job_id(3)]);

        let claimed_jobs = db.list_jobs(Some(JobStatus::Claimed), 1000, 0).await?;
        assert!(claimed_jobs.iter().any(|j| j.job_id == job_id(1)));
        assert!(claimed_jobs.iter().all(|j| j.status == JobStatus::Claimed));
        assert!(!claimed_jobs.iter().any(|j| j.job_id == job_id(2)));

        let recent = db.recent_events(Some("AgentRegistered"), 2).await?;
        let recent_agents: Vec<_> = recent.iter().map(|e| e.agent_id.as_deref()).collect();
        assert_eq!(
            recent_agents,
            [Some(longer_agent.as_str()), Some(exact_agent.as_str())]
        );
        assert!(recent.iter().all(|e| e.event_type == "AgentRegistered"));

        let cursor = before.last_block + 7;
        db.advance(cursor).await?;
        let after = db.stats().await?;
        assert_eq!(after.total_jobs - before.total_jobs, 3);
        assert_eq!(
            count_of(&after, JobStatus::Claimed) - count_of(&before, JobStatus::Claimed),
            2
        );
        assert_eq!(
            count_of(&after, JobStatus::Open) - count_of(&before, JobStatus::Open),
            1
        );
        let reward = |stats: &Stats| stats.total_reward.parse::<u128>().expect("integer sum");
        assert_eq!(reward(&after) - reward(&before), 1_255);
        assert_eq!(after.agents - before.agents, 2);
        assert_eq!(after.events - before.events, 7);
        assert_eq!(after.last_block, cursor);
        Ok(())
    }
}
