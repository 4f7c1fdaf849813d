use serde::{Deserialize, Serialize};

/// Escrow contract events, with arguments already converted into the
/// representation the projection stores (hex ids, decimal amounts).
///
/// Serializes as `{"event": <name>, "args": {...}}`, which is the shape
/// kept in the audit table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "args", rename_all_fields = "camelCase")]
pub enum EscrowEvent {
    AgentRegistered {
        agent_id: String,
        name: String,
        wallet: String,
    },
    JobPosted {
        job_id: String,
        title: String,
        poster_id: String,
        reward: String,
    },
    JobClaimed {
        job_id: String,
        claimer_id: String,
    },
    WorkSubmitted {
        job_id: String,
        submission_hash: String,
    },
    JobVerified {
        job_id: String,
        approved: bool,
    },
    JobCancelled {
        job_id: String,
    },
    ClaimExpired {
        job_id: String,
    },
    VerifyExpired {
        job_id: String,
    },
    EmergencyRelease {
        job_id: String,
    },
}

impl EscrowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EscrowEvent::AgentRegistered { .. } => "AgentRegistered",
            EscrowEvent::JobPosted { .. } => "JobPosted",
            EscrowEvent::JobClaimed { .. } => "JobClaimed",
            EscrowEvent::WorkSubmitted { .. } => "WorkSubmitted",
            EscrowEvent::JobVerified { .. } => "JobVerified",
            EscrowEvent::JobCancelled { .. } => "JobCancelled",
            EscrowEvent::ClaimExpired { .. } => "ClaimExpired",
            EscrowEvent::VerifyExpired { .. } => "VerifyExpired",
            EscrowEvent::EmergencyRelease { .. } => "EmergencyRelease",
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        match self {
            EscrowEvent::AgentRegistered { .. } => None,
            EscrowEvent::JobPosted { job_id, .. }
            | EscrowEvent::JobClaimed { job_id, .. }
            | EscrowEvent::WorkSubmitted { job_id, .. }
            | EscrowEvent::JobVerified { job_id, .. }
            | EscrowEvent::JobCancelled { job_id }
            | EscrowEvent::ClaimExpired { job_id }
            | EscrowEvent::VerifyExpired { job_id }
            | EscrowEvent::EmergencyRelease { job_id } => Some(job_id),
        }
    }

    /// The agent an event is about. Claims name the claiming agent so the
    /// audit trail can be searched by either side of a job.
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            EscrowEvent::AgentRegistered { agent_id, .. } => Some(agent_id),
            EscrowEvent::JobPosted { poster_id, .. } => Some(poster_id),
            EscrowEvent::JobClaimed { claimer_id, .. } => Some(claimer_id),
            _ => None,
        }
    }
}

/// A log that decoded into a known event, together with its chain position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedEvent {
    pub event: EscrowEvent,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u64,
}

impl DecodedEvent {
    /// Chain order key.
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}
