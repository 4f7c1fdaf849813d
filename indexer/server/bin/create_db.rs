use clap::Parser;
use indexer::app_config::{self, AppBaseConfig, DBConfig, DB};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    app_config::init_console_subscriber();
    let config = AppBaseConfig::parse();
    let db_name = config.db_name.clone();

    // The target database may not exist yet, connect through the default one.
    let conn = DB::new(DBConfig {
        dbname: "postgres".to_string(),
        ..config.db_config()
    })
    .await?
    .pool;
    info!("Creating database '{}'", db_name);

    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(&db_name)
            .fetch_one(&conn)
            .await?;

    if exists {
        info!("Database '{}' already exists.", db_name);
        return Ok(());
    }

    sqlx::query(&format!("CREATE DATABASE \"{}\"", db_name.replace('"', "\"\"")))
        .execute(&conn)
        .await?;

    info!("Database '{}' created successfully.", db_name);

    Ok(())
}
