use crate::engine::{SyncConfig, DEFAULT_CHUNK_SIZE};
use alloy::primitives::Address;
use anyhow::Result;
use clap::{Args, Parser};
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use time::macros::format_description;
use tracing_subscriber::{
    fmt::{format::FmtSpan, time::UtcTime},
    EnvFilter,
};
use url::Url;

#[derive(Clone)]
pub struct DBConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
}

impl DBConfig {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.dbname
        )
    }
}

#[derive(Clone)]
pub struct DB {
    pub pool: PgPool,
}

impl DB {
    pub async fn new(config: DBConfig) -> Result<Self> {
        let connection_string = config.connection_string();
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&connection_string)
            .await?;
        Ok(Self { pool })
    }

    pub async fn new_from_environment() -> Result<Self> {
        let db_config = DBConfig {
            host: std::env::var("DB_HOST")?,
            port: std::env::var("DB_PORT")?.parse()?,
            user: std::env::var("DB_USER")?,
            password: std::env::var("DB_PASSWORD")?,
            dbname: std::env::var("DB_NAME")?,
        };
        Self::new(db_config).await
    }
}

#[derive(Parser, Debug, Clone, Serialize)]
#[command(author, version, about, long_about = None)]
pub struct AppBaseConfig {
    /// Database host
    #[arg(long, env = "DB_HOST", default_value = "localhost")]
    pub db_host: String,

    /// Database port
    #[arg(long, env = "DB_PORT", default_value = "5432")]
    pub db_port: u16,

    /// Database user
    #[arg(long, env = "DB_USER", default_value = "postgres")]
    pub db_user: String,

    /// Database password
    #[arg(long, env = "DB_PASSWORD")]
    #[serde(skip_serializing)]
    pub db_password: String,

    /// Database name
    #[arg(long, env = "DB_NAME", default_value = "escrow_indexer")]
    pub db_name: String,
}

impl AppBaseConfig {
    /// Get the database configuration
    pub fn db_config(&self) -> DBConfig {
        DBConfig {
            host: self.db_host.clone(),
            port: self.db_port,
            user: self.db_user.clone(),
            password: self.db_password.clone(),
            dbname: self.db_name.clone(),
        }
    }
}

#[derive(Args, Debug, Clone, Serialize)]
pub struct NodeConfig {
    /// Node protocol
    #[arg(long, env = "NODE_PROTOCOL", default_value = "http")]
    pub node_protocol: String,

    /// Node host
    #[arg(long, env = "NODE_HOST", default_value = "localhost")]
    pub node_host: String,

    /// Node port (optional, not needed behind a hosted RPC gateway)
    #[arg(long, env = "NODE_PORT")]
    pub node_port: Option<String>,
}

impl NodeConfig {
    /// Get the node URL
    pub fn node_url(&self) -> Result<Url, url::ParseError> {
        let node_url = match &self.node_port {
            Some(port) => format!("{}://{}:{}", self.node_protocol, self.node_host, port),
            None => format!("{}://{}", self.node_protocol, self.node_host),
        };
        Url::parse(&node_url)
    }
}

#[derive(Args, Debug, Clone, Serialize)]
pub struct SyncSettings {
    /// Escrow contract whose logs are indexed
    #[arg(long, env = "CONTRACT_ADDRESS")]
    pub contract_address: Address,

    /// Cursor value written on first boot; syncing starts at the next block
    #[arg(long, env = "START_BLOCK", default_value_t = 0)]
    pub start_block: u64,

    /// Blocks per eth_getLogs request
    #[arg(
        long,
        env = "CHUNK_SIZE",
        default_value_t = DEFAULT_CHUNK_SIZE,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub chunk_size: u64,

    /// Seconds between scheduled sync runs
    #[arg(
        long,
        env = "SYNC_INTERVAL_SECS",
        default_value_t = 120,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub sync_interval_secs: u64,

    /// How long one chunk fetch keeps retrying before the run gives up
    #[arg(long, env = "FETCH_RETRY_SECS", default_value_t = 30)]
    pub fetch_retry_secs: u64,

    /// Skip lifecycle events the job's current status does not allow
    #[arg(long, env = "STRICT_TRANSITIONS", default_value_t = false)]
    pub strict_transitions: bool,
}

impl SyncSettings {
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            contract: self.contract_address,
            chunk_size: self.chunk_size,
            fetch_max_elapsed: Duration::from_secs(self.fetch_retry_secs),
            ..SyncConfig::new(self.contract_address)
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

pub fn init_console_subscriber() {
    let timer = UtcTime::new(format_description!(
        "[year]-[month]-[day]T[hour repr:24]:[minute]:[second].[subsecond digits:3]Z"
    ));
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_span_events(FmtSpan::CLOSE)
        .with_timer(timer)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_level(true)
        .with_ansi(true)
        .with_writer(std::io::stdout)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Parser)]
    struct TestCli {
        #[clap(flatten)]
        node: NodeConfig,
        #[clap(flatten)]
        sync: SyncSettings,
    }

    #[test]
    fn defaults() {
        let cli = TestCli::try_parse_from([
            "indexer",
            "--contract-address",
            "0x00000000000000000000000000000000000e5c70",
        ])
        .unwrap();
        assert_eq!(cli.sync.chunk_size, 5_000);
        assert_eq!(cli.sync.sync_interval(), Duration::from_secs(120));
        assert!(!cli.sync.strict_transitions);
        assert_eq!(cli.node.node_url().unwrap().as_str(), "http://localhost/");

        let config = cli.sync.sync_config();
        assert_eq!(config.chunk_size, 5_000);
        assert_eq!(config.fetch_max_elapsed, Duration::from_secs(30));
    }

    #[test]
    fn settings_dump_as_json() {
        let cli = TestCli::try_parse_from([
            "indexer",
            "--contract-address",
            "0x00000000000000000000000000000000000e5c70",
            "--start-block",
            "100",
        ])
        .unwrap();
        let json = serde_json::to_value(&cli.sync).unwrap();
        assert_eq!(
            json["contract_address"].as_str().map(str::to_lowercase).as_deref(),
            Some("0x00000000000000000000000000000000000e5c70")
        );
        assert_eq!(json["start_block"], 100);
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let parsed = TestCli::try_parse_from([
            "indexer",
            "--contract-address",
            "0x00000000000000000000000000000000000e5c70",
            "--chunk-size",
            "0",
        ]);
        assert!(parsed.is_err());
    }
}
