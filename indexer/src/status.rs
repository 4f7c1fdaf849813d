use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::{fmt, str::FromStr};
use thiserror::Error;

// Maps to the PostgreSQL `job_status` ENUM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Open,
    Claimed,
    Submitted,
    Verified,
    Cancelled,
    ClaimExpired,
    VerifyExpired,
    EmergencyReleased,
}

/// A lifecycle step driven by one contract event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Claim,
    Submit,
    Verify,
    Cancel,
    ExpireClaim,
    ExpireVerification,
    EmergencyRelease,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{transition:?} is not allowed from status {from}")]
pub struct IllegalTransition {
    pub from: JobStatus,
    pub transition: Transition,
}

impl Transition {
    pub fn target(self) -> JobStatus {
        match self {
            Transition::Claim => JobStatus::Claimed,
            Transition::Submit => JobStatus::Submitted,
            Transition::Verify => JobStatus::Verified,
            Transition::Cancel => JobStatus::Cancelled,
            Transition::ExpireClaim => JobStatus::ClaimExpired,
            Transition::ExpireVerification => JobStatus::VerifyExpired,
            Transition::EmergencyRelease => JobStatus::EmergencyReleased,
        }
    }
}

impl JobStatus {
    pub const ALL: [JobStatus; 8] = [
        JobStatus::Open,
        JobStatus::Claimed,
        JobStatus::Submitted,
        JobStatus::Verified,
        JobStatus::Cancelled,
        JobStatus::ClaimExpired,
        JobStatus::VerifyExpired,
        JobStatus::EmergencyReleased,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Open => "open",
            JobStatus::Claimed => "claimed",
            JobStatus::Submitted => "submitted",
            JobStatus::Verified => "verified",
            JobStatus::Cancelled => "cancelled",
            JobStatus::ClaimExpired => "claim_expired",
            JobStatus::VerifyExpired => "verify_expired",
            JobStatus::EmergencyReleased => "emergency_released",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            JobStatus::Open | JobStatus::Claimed | JobStatus::Submitted
        )
    }

    /// Status after `transition`, or the reason the contract could not have
    /// emitted it from here. Landing on the current status again is always
    /// allowed so that re-applied events stay harmless.
    pub fn after(self, transition: Transition) -> Result<JobStatus, IllegalTransition> {
        let target = transition.target();
        if self == target {
            return Ok(target);
        }
        let legal = match transition {
            Transition::Claim => self == JobStatus::Open,
            Transition::Submit => self == JobStatus::Claimed,
            Transition::Verify => self == JobStatus::Submitted,
            Transition::Cancel => matches!(self, JobStatus::Open | JobStatus::Claimed),
            Transition::ExpireClaim => self == JobStatus::Claimed,
            Transition::ExpireVerification => self == JobStatus::Submitted,
            Transition::EmergencyRelease => !self.is_terminal(),
        };
        if legal {
            Ok(target)
        } else {
            Err(IllegalTransition {
                from: self,
                transition,
            })
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown job status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TRANSITIONS: [Transition; 7] = [
        Transition::Claim,
        Transition::Submit,
        Transition::Verify,
        Transition::Cancel,
        Transition::ExpireClaim,
        Transition::ExpireVerification,
        Transition::EmergencyRelease,
    ];

    #[test]
    fn happy_path() {
        let status = JobStatus::Open
            .after(Transition::Claim)
            .and_then(|s| s.after(Transition::Submit))
            .and_then(|s| s.after(Transition::Verify))
            .unwrap();
        assert_eq!(status, JobStatus::Verified);
    }

    #[test]
    fn alternate_branches() {
        use JobStatus::*;
        use Transition::*;
        let cases = [
            (Claimed, ExpireClaim, ClaimExpired),
            (Submitted, ExpireVerification, VerifyExpired),
            (Open, Cancel, Cancelled),
            (Claimed, Cancel, Cancelled),
            (Open, EmergencyRelease, EmergencyReleased),
            (Claimed, EmergencyRelease, EmergencyReleased),
            (Submitted, EmergencyRelease, EmergencyReleased),
        ];
        for (from, transition, to) in cases {
            assert_eq!(from.after(transition), Ok(to), "{from} via {transition:?}");
        }
    }

    #[test]
    fn rejects_out_of_order_events() {
        assert_eq!(
            JobStatus::Cancelled.after(Transition::Verify),
            Err(IllegalTransition {
                from: JobStatus::Cancelled,
                transition: Transition::Verify
            })
        );
        assert!(JobStatus::Open.after(Transition::Verify).is_err());
        assert!(JobStatus::Submitted.after(Transition::Cancel).is_err());
        assert!(JobStatus::Verified.after(Transition::EmergencyRelease).is_err());
    }

    #[test]
    fn names_round_trip() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                serde_json::Value::String(status.to_string())
            );
        }
        assert!("closed".parse::<JobStatus>().is_err());
    }

    proptest! {
        #[test]
        fn terminal_states_absorb(steps in prop::collection::vec(0..TRANSITIONS.len(), 1..20)) {
            let mut status = JobStatus::Open;
            for step in steps {
                let transition = TRANSITIONS[step];
                match status.after(transition) {
                    Ok(next) => {
                        prop_assert!(JobStatus::ALL.contains(&next));
                        prop_assert!(!status.is_terminal() || next == status);
                        status = next;
                    }
                    Err(illegal) => prop_assert_eq!(illegal.from, status),
                }
            }
        }

        #[test]
        fn reapplying_a_transition_is_a_no_op(step in 0..TRANSITIONS.len(), start in 0..JobStatus::ALL.len()) {
            let transition = TRANSITIONS[step];
            if let Ok(next) = JobStatus::ALL[start].after(transition) {
                prop_assert_eq!(next.after(transition), Ok(next));
            }
        }
    }
}
