use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Generating,
    Auditing,
    Correcting,
    Completed,
    NeedsReview,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Generating => "generating",
            JobStatus::Auditing => "auditing",
            JobStatus::Correcting => "correcting",
            JobStatus::Completed => "completed",
            JobStatus::NeedsReview => "needs_review",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::NeedsReview | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Transition table. Terminal states have no successors; every live state
    /// may fail or be cancelled.
    pub fn successors(&self) -> &'static [JobStatus] {
        use JobStatus::*;
        match self {
            Pending => &[Processing, Failed, Cancelled],
            Processing => &[Generating, Failed, Cancelled],
            Generating => &[Auditing, Failed, Cancelled],
            Auditing => &[Correcting, Completed, NeedsReview, Failed, Cancelled],
            Correcting => &[Generating, Failed, Cancelled],
            Completed | NeedsReview | Failed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        self.successors().contains(&next)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::JobStatus;

    const ALL: [JobStatus; 9] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Generating,
        JobStatus::Auditing,
        JobStatus::Correcting,
        JobStatus::Completed,
        JobStatus::NeedsReview,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    #[test]
    fn terminal_states_have_no_successors() {
        for status in ALL.iter().filter(|status| status.is_terminal()) {
            for next in ALL {
                assert!(
                    !status.can_transition_to(next),
                    "{status} must not move to {next}"
                );
            }
        }
    }

    #[test]
    fn correction_loop_is_the_only_way_back_to_generating() {
        let into_generating: Vec<JobStatus> = ALL
            .into_iter()
            .filter(|status| status.can_transition_to(JobStatus::Generating))
            .collect();
        assert_eq!(
            into_generating,
            vec![JobStatus::Processing, JobStatus::Correcting]
        );
    }

    #[test]
    fn audit_outcomes_leave_auditing() {
        for next in [
            JobStatus::Completed,
            JobStatus::NeedsReview,
            JobStatus::Correcting,
            JobStatus::Failed,
        ] {
            assert!(JobStatus::Auditing.can_transition_to(next));
        }
        assert!(!JobStatus::Generating.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Generating));
    }

    #[test]
    fn status_serializes_as_snake_case() -> anyhow::Result<()> {
        assert_eq!(
            serde_json::to_string(&JobStatus::NeedsReview)?,
            "\"needs_review\""
        );
        Ok(())
    }
}
