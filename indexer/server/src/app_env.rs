use crate::api::TriggerGate;
use anyhow::Result;
use clap::Parser;
use indexer::{
    app_config::{AppBaseConfig, NodeConfig, SyncSettings, DB},
    store::{postgres::Database, schema::create_schema},
    EventApplier, RpcLogSource, SyncEngine,
};
use serde::Serialize;
use std::time::Duration;
use tracing::info;

pub type Engine = SyncEngine<RpcLogSource, Database, Database>;

#[derive(Parser, Serialize)]
#[command(author, version, about, long_about = None)]
pub struct AppConfig {
    #[clap(flatten)]
    pub base_config: AppBaseConfig,

    #[clap(flatten)]
    pub node_config: NodeConfig,

    #[clap(flatten)]
    pub sync_settings: SyncSettings,

    #[arg(long, env = "JSON_RPC_PORT", default_value = "3030")]
    pub json_rpc_port: u16,

    /// Shared secret for `triggerSync`; when unset the trigger is open
    #[arg(long, env = "ADMIN_TOKEN")]
    #[serde(skip_serializing)]
    pub admin_token: Option<String>,

    /// Minimum seconds between two accepted `triggerSync` calls
    #[arg(long, env = "TRIGGER_COOLDOWN_SECS", default_value = "30")]
    pub trigger_cooldown_secs: u64,
}

pub struct AppEnv {
    pub db: Database,
    pub engine: Engine,
    pub sync_interval: Duration,
    pub admin_token: Option<String>,
    pub trigger_gate: TriggerGate,
}

impl AppEnv {
    pub async fn new(app_config: AppConfig) -> Result<Self> {
        let db = {
            let db = DB::new(app_config.base_config.db_config()).await?;
            create_schema(&db.pool).await?;
            Database::new(db.pool)
        };
        let settings = &app_config.sync_settings;
        db.init_cursor(settings.start_block).await?;

        let node_url = app_config.node_config.node_url()?;
        info!(
            "Indexing contract {} through {}",
            settings.contract_address, node_url
        );
        let engine = SyncEngine::new(
            RpcLogSource::new(node_url),
            db.clone(),
            db.clone(),
            EventApplier::new(settings.strict_transitions),
            settings.sync_config(),
        );

        Ok(Self {
            db,
            engine,
            sync_interval: settings.sync_interval(),
            admin_token: app_config.admin_token,
            trigger_gate: TriggerGate::new(Duration::from_secs(app_config.trigger_cooldown_secs)),
        })
    }
}
