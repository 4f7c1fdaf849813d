use crate::event::{DecodedEvent, EscrowEvent};
use alloy::{
    primitives::Address,
    providers::{Provider, RootProvider},
    rpc::types::{Filter, Log},
    sol,
    sol_types::SolEventInterface,
    transports::{
        http::{Client, Http},
        TransportError,
    },
};
use thiserror::Error;
use url::Url;
use TaskEscrow::TaskEscrowEvents;

sol!(
    #[sol(all_derives)]
    interface TaskEscrow {
        event AgentRegistered(string agentId, string name, address indexed wallet);
        event JobPosted(bytes32 indexed jobId, string title, string posterId, uint256 reward);
        event JobClaimed(bytes32 indexed jobId, string claimerId);
        event WorkSubmitted(bytes32 indexed jobId, bytes32 submissionHash);
        event JobVerified(bytes32 indexed jobId, bool approved);
        event JobCancelled(bytes32 indexed jobId);
        event ClaimExpired(bytes32 indexed jobId);
        event VerifyExpired(bytes32 indexed jobId);
        event EmergencyRelease(bytes32 indexed jobId);
    }
);

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("rpc request failed: {0}")]
    Transport(#[from] TransportError),
    #[error("provider returned unexpected data: {0}")]
    Unexpected(String),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("log has no {0}")]
    Pending(&'static str),
    #[error("log does not match the escrow interface: {0}")]
    Abi(#[from] alloy::sol_types::Error),
    #[error("log was removed by a reorg")]
    Removed,
}

/// Where the sync engine reads contract logs from.
#[allow(async_fn_in_trait)]
pub trait ChainLogSource {
    type RawLog;

    async fn current_height(&self) -> Result<u64, ProviderError>;

    async fn fetch_logs(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Self::RawLog>, ProviderError>;

    fn decode(&self, log: &Self::RawLog) -> Result<DecodedEvent, DecodeError>;
}

pub fn create_provider(node_url: Url) -> RootProvider<Http<Client>> {
    RootProvider::new_http(node_url)
}

/// JSON-RPC backed log source.
#[derive(Clone)]
pub struct RpcLogSource {
    provider: RootProvider<Http<Client>>,
}

impl RpcLogSource {
    pub fn new(node_url: Url) -> Self {
        Self {
            provider: create_provider(node_url),
        }
    }
}

impl ChainLogSource for RpcLogSource {
    type RawLog = Log;

    async fn current_height(&self) -> Result<u64, ProviderError> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn fetch_logs(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, ProviderError> {
        let filter = Filter::new()
            .address(address)
            .from_block(from_block)
            .to_block(to_block);
        let logs = self.provider.get_logs(&filter).await?;
        check_log_addresses(address, &logs)?;
        Ok(logs)
    }

    fn decode(&self, log: &Log) -> Result<DecodedEvent, DecodeError> {
        decode_log(log)
    }
}

/// Rejects a response that carries logs emitted by another contract.
fn check_log_addresses(address: Address, logs: &[Log]) -> Result<(), ProviderError> {
    match logs.iter().find(|log| log.inner.address != address) {
        Some(stray) => Err(ProviderError::Unexpected(format!(
            "log from {:#x} in a query for {:#x}",
            stray.inner.address, address
        ))),
        None => Ok(()),
    }
}

pub fn decode_log(log: &Log) -> Result<DecodedEvent, DecodeError> {
    if log.removed {
        return Err(DecodeError::Removed);
    }
    let block_number = log.block_number.ok_or(DecodeError::Pending("block number"))?;
    let tx_hash = log
        .transaction_hash
        .ok_or(DecodeError::Pending("transaction hash"))?;
    let log_index = log.log_index.ok_or(DecodeError::Pending("log index"))?;
    let decoded = TaskEscrowEvents::decode_log(&log.inner, true)?;
    Ok(DecodedEvent {
        event: decoded.data.into(),
        block_number,
        tx_hash: format!("{:#x}", tx_hash),
        log_index,
    })
}

impl From<TaskEscrowEvents> for EscrowEvent {
    fn from(event: TaskEscrowEvents) -> Self {
        match event {
            TaskEscrowEvents::AgentRegistered(e) => EscrowEvent::AgentRegistered {
                agent_id: e.agentId,
                name: e.name,
                wallet: format!("{:#x}", e.wallet),
            },
            TaskEscrowEvents::JobPosted(e) => EscrowEvent::JobPosted {
                job_id: format!("{:#x}", e.jobId),
                title: e.title,
                poster_id: e.posterId,
                reward: e.reward.to_string(),
            },
            TaskEscrowEvents::JobClaimed(e) => EscrowEvent::JobClaimed {
                job_id: format!("{:#x}", e.jobId),
                claimer_id: e.claimerId,
            },
            TaskEscrowEvents::WorkSubmitted(e) => EscrowEvent::WorkSubmitted {
                job_id: format!("{:#x}", e.jobId),
                submission_hash: format!("{:#x}", e.submissionHash),
            },
            TaskEscrowEvents::JobVerified(e) => EscrowEvent::JobVerified {
                job_id: format!("{:#x}", e.jobId),
                approved: e.approved,
            },
            TaskEscrowEvents::JobCancelled(e) => EscrowEvent::JobCancelled {
                job_id: format!("{:#x}", e.jobId),
            },
            TaskEscrowEvents::ClaimExpired(e) => EscrowEvent::ClaimExpired {
                job_id: format!("{:#x}", e.jobId),
            },
            TaskEscrowEvents::VerifyExpired(e) => EscrowEvent::VerifyExpired {
                job_id: format!("{:#x}", e.jobId),
            },
            TaskEscrowEvents::EmergencyRelease(e) => EscrowEvent::EmergencyRelease {
                job_id: format!("{:#x}", e.jobId),
            },
        }
    }
}
