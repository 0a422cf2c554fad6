//! Analysis runs - the batch scope for facts, gaps and findings

use crate::ids::RunId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Producers still in flight
    Running,
    /// All domains completed and validated
    Completed,
    /// Some items escalated or a domain exhausted retries; committed data valid
    PartiallyCompleted,
    /// Infrastructure failure ended the run; committed data stays valid
    Failed,
}

/// Groups a batch of facts/gaps/findings produced together. When several runs
/// exist for the same subject, reads are scoped by run ID; there is no
/// "current" cache on the side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRun {
    /// Unique run ID
    pub id: RunId,
    /// What is being analysed, e.g. a target company handle
    pub subject: String,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time, once terminal
    pub finished_at: Option<DateTime<Utc>>,
    /// Current status
    pub status: RunStatus,
    /// Domains this run covers
    pub domains: Vec<String>,
}

impl AnalysisRun {
    /// Start a new run over `domains`.
    #[must_use]
    pub fn start(subject: impl Into<String>, domains: Vec<String>) -> Self {
        Self {
            id: RunId::new(),
            subject: subject.into(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            domains,
        }
    }

    /// Move the run to a terminal status.
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_finishes_once() {
        let mut run = AnalysisRun::start("acme", vec!["network".into(), "hr".into()]);
        assert_eq!(run.status, RunStatus::Running);
        run.finish(RunStatus::PartiallyCompleted);
        assert_eq!(run.status, RunStatus::PartiallyCompleted);
        assert!(run.finished_at.is_some());
    }
}
