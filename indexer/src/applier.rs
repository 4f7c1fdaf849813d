use crate::{
    event::{DecodedEvent, EscrowEvent},
    status::{IllegalTransition, JobStatus},
    store::{JobUpdate, NewAgent, NewEventRecord, NewJob, ProjectionStore},
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// What one event did to the current-state tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    AgentUpserted,
    JobUpserted,
    JobUpdated(JobStatus),
    /// The job row does not exist, usually because its `JobPosted` was missed.
    MissingJob,
    /// Strict mode refused an update the job's current status does not allow.
    Rejected(IllegalTransition),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub effect: Effect,
    /// `false` when the audit row for this log was already present.
    pub recorded: bool,
}

/// Folds decoded events into the projection.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventApplier {
    strict_transitions: bool,
}

impl EventApplier {
    pub fn new(strict_transitions: bool) -> Self {
        Self { strict_transitions }
    }

    pub async fn apply<P: ProjectionStore>(
        &self,
        store: &P,
        event: &DecodedEvent,
    ) -> Result<ApplyOutcome> {
        let now = Utc::now();
        let recorded = store.append_event(&audit_record(event)?, now).await?;
        if !recorded {
            debug!(
                tx_hash = %event.tx_hash,
                log_index = event.log_index,
                "Audit row already present, re-applying projection only"
            );
        }

        let block = event.block_number;
        let (job_id, update) = match &event.event {
            EscrowEvent::AgentRegistered {
                agent_id,
                name,
                wallet,
            } => {
                let agent = NewAgent {
                    agent_id: agent_id.clone(),
                    name: name.clone(),
                    wallet: wallet.clone(),
                    registered_block: block,
                };
                store.upsert_agent(&agent, now).await?;
                return Ok(ApplyOutcome {
                    effect: Effect::AgentUpserted,
                    recorded,
                });
            }
            EscrowEvent::JobPosted {
                job_id,
                title,
                poster_id,
                reward,
            } => {
                let job = NewJob {
                    job_id: job_id.clone(),
                    title: title.clone(),
                    poster_id: poster_id.clone(),
                    reward: reward.clone(),
                    created_block: block,
                };
                store.upsert_job(&job, now).await?;
                return Ok(ApplyOutcome {
                    effect: Effect::JobUpserted,
                    recorded,
                });
            }
            EscrowEvent::JobClaimed { job_id, claimer_id } => (
                job_id,
                JobUpdate::Claimed {
                    claimer_id: claimer_id.clone(),
                    block,
                },
            ),
            EscrowEvent::WorkSubmitted {
                job_id,
                submission_hash,
            } => (
                job_id,
                JobUpdate::Submitted {
                    submission_hash: submission_hash.clone(),
                    block,
                },
            ),
            EscrowEvent::JobVerified { job_id, approved } => (
                job_id,
                JobUpdate::Verified {
                    approved: *approved,
                    block,
                },
            ),
            EscrowEvent::JobCancelled { job_id } => (job_id, JobUpdate::Cancelled { block }),
            EscrowEvent::ClaimExpired { job_id } => (job_id, JobUpdate::ClaimExpired),
            EscrowEvent::VerifyExpired { job_id } => (job_id, JobUpdate::VerifyExpired),
            EscrowEvent::EmergencyRelease { job_id } => (job_id, JobUpdate::EmergencyReleased),
        };

        let effect = self.update_job(store, job_id, &update, event, now).await?;
        Ok(ApplyOutcome { effect, recorded })
    }

    async fn update_job<P: ProjectionStore>(
        &self,
        store: &P,
        job_id: &str,
        update: &JobUpdate,
        event: &DecodedEvent,
        now: DateTime<Utc>,
    ) -> Result<Effect> {
        let Some(current) = store.job_status(job_id).await? else {
            warn!(
                job_id,
                event = event.event.name(),
                block = event.block_number,
                "No job row for lifecycle event, projection left unchanged"
            );
            return Ok(Effect::MissingJob);
        };

        if let Err(illegal) = current.after(update.transition()) {
            warn!(
                job_id,
                event = event.event.name(),
                block = event.block_number,
                %illegal,
                "Lifecycle event out of order"
            );
            if self.strict_transitions {
                return Ok(Effect::Rejected(illegal));
            }
        }

        match store.update_job(job_id, update, now).await? {
            0 => Ok(Effect::MissingJob),
            _ => Ok(Effect::JobUpdated(update.status())),
        }
    }
}

fn audit_record(event: &DecodedEvent) -> Result<NewEventRecord> {
    Ok(NewEventRecord {
        event_type: event.event.name().to_string(),
        job_id: event.event.job_id().map(ToString::to_string),
        agent_id: event.event.agent_id().map(ToString::to_string),
        tx_hash: event.tx_hash.clone(),
        block_number: event.block_number,
        log_index: event.log_index,
        data: serde_json::to_value(&event.event)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{memory::MemoryStore, Job};
    use proptest::prelude::*;

    const JOB: &str = "0xaa00000000000000000000000000000000000000000000000000000000000001";

    fn at(event: EscrowEvent, block_number: u64, log_index: u64) -> DecodedEvent {
        DecodedEvent {
            event,
            block_number,
            tx_hash: format!("0x{:064x}", block_number),
            log_index,
        }
    }

    fn posted(block: u64) -> DecodedEvent {
        at(
            EscrowEvent::JobPosted {
                job_id: JOB.to_string(),
                title: "T".to_string(),
                poster_id: "p1".to_string(),
                reward: "1000".to_string(),
            },
            block,
            0,
        )
    }

    fn claimed(block: u64) -> DecodedEvent {
        at(
            EscrowEvent::JobClaimed {
                job_id: JOB.to_string(),
                claimer_id: "p2".to_string(),
            },
            block,
            0,
        )
    }

    fn verified(block: u64, approved: bool) -> DecodedEvent {
        at(
            EscrowEvent::JobVerified {
                job_id: JOB.to_string(),
                approved,
            },
            block,
            0,
        )
    }

    // Wall-clock columns are display only.
    fn without_clock(mut job: Job) -> Job {
        job.created_at = DateTime::<Utc>::UNIX_EPOCH;
        job.updated_at = DateTime::<Utc>::UNIX_EPOCH;
        job
    }

    #[tokio::test]
    async fn posted_claimed_verified() {
        let store = MemoryStore::new(0);
        let applier = EventApplier::default();
        applier.apply(&store, &posted(500)).await.unwrap();
        applier.apply(&store, &claimed(510)).await.unwrap();
        let outcome = applier.apply(&store, &verified(520, true)).await.unwrap();
        assert_eq!(outcome.effect, Effect::JobUpdated(JobStatus::Verified));

        let job = store.get_job(JOB).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Verified);
        assert_eq!(job.approved, Some(true));
        assert_eq!(job.created_block, 500);
        assert_eq!(job.claimed_block, Some(510));
        assert_eq!(job.verified_block, Some(520));
        assert_eq!(store.events().await.len(), 3);
    }

    #[tokio::test]
    async fn verified_before_posted_only_records_audit() {
        let store = MemoryStore::new(0);
        let applier = EventApplier::default();
        let outcome = applier.apply(&store, &verified(520, true)).await.unwrap();
        assert_eq!(outcome.effect, Effect::MissingJob);
        assert!(outcome.recorded);
        assert!(store.jobs().await.is_empty());
        assert_eq!(store.events().await.len(), 1);
    }

    #[tokio::test]
    async fn claim_for_unknown_job_inserts_exactly_one_event() {
        let store = MemoryStore::new(0);
        let outcome = EventApplier::default()
            .apply(&store, &claimed(510))
            .await
            .unwrap();
        assert_eq!(outcome.effect, Effect::MissingJob);
        assert!(store.jobs().await.is_empty());

        let events = store.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "JobClaimed");
        assert_eq!(events[0].job_id.as_deref(), Some(JOB));
        assert_eq!(events[0].agent_id.as_deref(), Some("p2"));
        assert_eq!(events[0].data["args"]["claimerId"], "p2");
    }

    #[tokio::test]
    async fn applying_twice_matches_applying_once() {
        let once = MemoryStore::new(0);
        let twice = MemoryStore::new(0);
        let applier = EventApplier::default();
        for event in [posted(500), claimed(510)] {
            applier.apply(&once, &event).await.unwrap();
            applier.apply(&twice, &event).await.unwrap();
            let replay = applier.apply(&twice, &event).await.unwrap();
            assert!(!replay.recorded);
        }
        let once_job = once.get_job(JOB).await.unwrap().map(without_clock);
        let twice_job = twice.get_job(JOB).await.unwrap().map(without_clock);
        assert_eq!(once_job, twice_job);
        assert_eq!(twice.events().await.len(), 2);
    }

    #[tokio::test]
    async fn reposting_replaces_stale_row() {
        let store = MemoryStore::new(0);
        let applier = EventApplier::default();
        applier.apply(&store, &posted(500)).await.unwrap();
        applier.apply(&store, &claimed(510)).await.unwrap();
        applier.apply(&store, &posted(530)).await.unwrap();

        let job = store.get_job(JOB).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Open);
        assert_eq!(job.claimer_id, None);
        assert_eq!(job.claimed_block, None);
        assert_eq!(job.created_block, 530);
    }

    #[tokio::test]
    async fn re_registration_overwrites_agent() {
        let store = MemoryStore::new(0);
        let applier = EventApplier::default();
        let register = |name: &str, wallet: &str, block| {
            at(
                EscrowEvent::AgentRegistered {
                    agent_id: "a1".to_string(),
                    name: name.to_string(),
                    wallet: wallet.to_string(),
                },
                block,
                0,
            )
        };
        let first = register("Alice", "0x00000000000000000000000000000000000000a1", 10);
        let second = register("Alice v2", "0x00000000000000000000000000000000000000b2", 20);
        applier.apply(&store, &first).await.unwrap();
        let outcome = applier.apply(&store, &second).await.unwrap();
        assert_eq!(outcome.effect, Effect::AgentUpserted);

        let agents = store.agents().await;
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].name, "Alice v2");
        assert_eq!(agents[0].wallet, "0x00000000000000000000000000000000000000b2");
        assert_eq!(agents[0].registered_block, 20);
    }

    #[tokio::test]
    async fn strict_mode_rejects_skipped_steps() {
        let store = MemoryStore::new(0);
        let applier = EventApplier::new(true);
        applier.apply(&store, &posted(500)).await.unwrap();
        applier.apply(&store, &claimed(510)).await.unwrap();
        let outcome = applier.apply(&store, &verified(520, true)).await.unwrap();
        assert!(matches!(outcome.effect, Effect::Rejected(_)));
        assert!(outcome.recorded);

        let job = store.get_job(JOB).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Claimed);
        assert_eq!(job.verified_block, None);
    }

    #[tokio::test]
    async fn terminal_branches() {
        let store = MemoryStore::new(0);
        let applier = EventApplier::default();
        applier.apply(&store, &posted(500)).await.unwrap();
        let cancel = at(
            EscrowEvent::JobCancelled {
                job_id: JOB.to_string(),
            },
            505,
            1,
        );
        applier.apply(&store, &cancel).await.unwrap();
        let job = store.get_job(JOB).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.cancelled_block, Some(505));

        let release = at(
            EscrowEvent::EmergencyRelease {
                job_id: JOB.to_string(),
            },
            506,
            0,
        );
        applier.apply(&store, &release).await.unwrap();
        let job = store.get_job(JOB).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::EmergencyReleased);
    }

    fn lifecycle_event() -> impl Strategy<Value = EscrowEvent> {
        let job_id = JOB.to_string();
        prop_oneof![
            Just(EscrowEvent::JobPosted {
                job_id: job_id.clone(),
                title: "T".to_string(),
                poster_id: "p1".to_string(),
                reward: "1000".to_string(),
            }),
            Just(EscrowEvent::JobClaimed {
                job_id: job_id.clone(),
                claimer_id: "p2".to_string(),
            }),
            Just(EscrowEvent::WorkSubmitted {
                job_id: job_id.clone(),
                submission_hash: "0x01".to_string(),
            }),
            any::<bool>().prop_map({
                let job_id = job_id.clone();
                move |approved| EscrowEvent::JobVerified {
                    job_id: job_id.clone(),
                    approved,
                }
            }),
            Just(EscrowEvent::JobCancelled {
                job_id: job_id.clone(),
            }),
            Just(EscrowEvent::ClaimExpired {
                job_id: job_id.clone(),
            }),
            Just(EscrowEvent::VerifyExpired {
                job_id: job_id.clone(),
            }),
            Just(EscrowEvent::EmergencyRelease { job_id }),
        ]
    }

    proptest! {
        #[test]
        fn duplicated_stream_projects_like_single_stream(
            events in prop::collection::vec(lifecycle_event(), 1..12),
            strict in any::<bool>(),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (once, twice) = runtime.block_on(async {
                let applier = EventApplier::new(strict);
                let once = MemoryStore::new(0);
                let twice = MemoryStore::new(0);
                for (i, event) in events.into_iter().enumerate() {
                    let decoded = at(event, 100 + i as u64, 0);
                    applier.apply(&once, &decoded).await.unwrap();
                    applier.apply(&twice, &decoded).await.unwrap();
                    applier.apply(&twice, &decoded).await.unwrap();
                }
                (
                    once.get_job(JOB).await.unwrap().map(without_clock),
                    twice.get_job(JOB).await.unwrap().map(without_clock),
                )
            });
            if let Some(job) = &once {
                prop_assert!(JobStatus::ALL.contains(&job.status));
            }
            prop_assert_eq!(once, twice);
        }
    }
}
