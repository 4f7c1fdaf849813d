use sqlx::{Executor, PgPool};
use tracing::info;

/// Creates the projection schema. Every statement is idempotent, so this runs
/// on each server boot as well as from the `create-schema` binary.
pub async fn create_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    pool.execute(sqlx::query(
        r#"
        DO $$ BEGIN
            IF NOT EXISTS (SELECT 1 FROM pg_type WHERE typname = 'job_status') THEN
                CREATE TYPE job_status AS ENUM (
                    'open',
                    'claimed',
                    'submitted',
                    'verified',
                    'cancelled',
                    'claim_expired',
                    'verify_expired',
                    'emergency_released'
                );
            END IF;
        END $$;
    "#,
    ))
    .await?;

    pool.execute(sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            job_id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            poster_id TEXT NOT NULL,
            claimer_id TEXT,
            reward TEXT NOT NULL,
            status job_status NOT NULL,
            submission_hash TEXT,
            approved BOOLEAN,
            created_block BIGINT NOT NULL,
            claimed_block BIGINT,
            submitted_block BIGINT,
            verified_block BIGINT,
            cancelled_block BIGINT,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
    "#,
    ))
    .await?;

    pool.execute(sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agents (
            agent_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            wallet TEXT NOT NULL,
            registered_block BIGINT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
    "#,
    ))
    .await?;

    // (tx_hash, log_index) identifies a log, re-applied logs hit the constraint
    pool.execute(sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id BIGSERIAL PRIMARY KEY,
            event_type TEXT NOT NULL,
            job_id TEXT,
            agent_id TEXT,
            tx_hash TEXT NOT NULL,
            block_number BIGINT NOT NULL,
            log_index BIGINT NOT NULL,
            data JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            CONSTRAINT events_tx_log_unique UNIQUE (tx_hash, log_index)
        )
    "#,
    ))
    .await?;

    pool.execute(sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_state (
            id SMALLINT PRIMARY KEY DEFAULT 1 CHECK (id = 1),
            last_block BIGINT NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
    "#,
    ))
    .await?;

    pool.execute(sqlx::query(
        r#"
        DO $$ BEGIN
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs (status);
            CREATE INDEX IF NOT EXISTS idx_jobs_poster_id ON jobs (poster_id);
            CREATE INDEX IF NOT EXISTS idx_jobs_claimer_id ON jobs (claimer_id);
            CREATE INDEX IF NOT EXISTS idx_agents_wallet ON agents (wallet);
            CREATE INDEX IF NOT EXISTS idx_events_job_id ON events (job_id, block_number, log_index);
            CREATE INDEX IF NOT EXISTS idx_events_event_type ON events (event_type);
            CREATE INDEX IF NOT EXISTS idx_events_block_number ON events (block_number);
        END $$;
    "#,
    ))
    .await?;

    info!("Projection schema is up to date");

    Ok(())
}
