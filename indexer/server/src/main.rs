use clap::Parser;
use indexer::app_config::init_console_subscriber;
use indexer_api::rpc::IndexerApiServer;
use jsonrpsee::server::Server;
use std::{net::SocketAddr, sync::Arc};
use tracing::{debug, info};

mod api;
mod app_env;
mod scheduler;

use api::IndexerApiImpl;
use app_env::{AppConfig, AppEnv};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_console_subscriber();
    let cli = AppConfig::parse();
    debug!("{}", serde_json::to_string_pretty(&cli)?);

    let addr = {
        let host = "0.0.0.0";
        let addr = format!("{}:{}", host, cli.json_rpc_port);
        addr.parse::<SocketAddr>()
    }?;

    let app_env = {
        let e = AppEnv::new(cli).await?;
        Arc::new(e)
    };
    let sync_task = scheduler::spawn(app_env.clone());

    let server = Server::builder().build(addr).await?;
    let server_addr: SocketAddr = server.local_addr()?;
    info!("JSON-RPC server started at {}", server_addr);

    let api = IndexerApiImpl { app_env };
    let handle = server.start(api.into_rpc());

    tokio::signal::ctrl_c().await?;

    sync_task.abort();
    handle.stop()?;
    info!("JSON-RPC server stopped");

    Ok(())
}
