use super::types::{Agent, EventEntry, Job, JobDetail, Stats, SyncStatus, SyncSummary};
use jsonrpsee::{proc_macros::rpc, types::ErrorObjectOwned};

/// Generic failure; the detail is logged server side only.
pub const INTERNAL_ERROR: i32 = -32001;
pub const NOT_FOUND: i32 = -32002;
pub const UNAUTHORIZED: i32 = -32003;
/// A sync run is in progress or the trigger cooldown has not elapsed.
pub const SYNC_BUSY: i32 = -32004;
pub const INVALID_PARAMS: i32 = -32602;

#[rpc(server, client)]
pub trait IndexerApi {
    #[method(name = "listJobs")]
    async fn list_jobs(
        &self,
        status: Option<String>,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<Job>, ErrorObjectOwned>;

    #[method(name = "getJob")]
    async fn get_job(&self, job_id: String) -> Result<JobDetail, ErrorObjectOwned>;

    #[method(name = "listAgents")]
    async fn list_agents(
        &self,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<Agent>, ErrorObjectOwned>;

    #[method(name = "jobsByWallet")]
    async fn jobs_by_wallet(&self, wallet: String) -> Result<Vec<Job>, ErrorObjectOwned>;

    #[method(name = "getStats")]
    async fn get_stats(&self) -> Result<Stats, ErrorObjectOwned>;

    #[method(name = "recentEvents")]
    async fn recent_events(
        &self,
        event_type: Option<String>,
        limit: Option<u32>,
    ) -> Result<Vec<EventEntry>, ErrorObjectOwned>;

    #[method(name = "getSyncStatus")]
    async fn get_sync_status(&self) -> Result<SyncStatus, ErrorObjectOwned>;

    #[method(name = "triggerSync")]
    async fn trigger_sync(&self, token: Option<String>) -> Result<SyncSummary, ErrorObjectOwned>;

    #[method(name = "healthCheck")]
    async fn health_check(&self) -> Result<(), ErrorObjectOwned>;
}
