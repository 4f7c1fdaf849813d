use clap::Parser;
use indexer::{
    app_config::{self, AppBaseConfig, DB},
    store::schema::create_schema,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    app_config::init_console_subscriber();
    let config = AppBaseConfig::parse();
    let db = DB::new(config.db_config()).await?;

    match create_schema(&db.pool).await {
        Ok(_) => {
            info!("Database schema setup completed successfully.");
            Ok(())
        }
        Err(e) => {
            error!("Error setting up database schema: {}", e);
            Err(e.into())
        }
    }
}
