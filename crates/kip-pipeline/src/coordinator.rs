//! Re-extraction coordinator.
//!
//! Decides, per failed validation, between targeted regeneration and
//! escalation. Only the offending fact is regenerated, never the whole
//! batch; attempts are hard-capped and backed off so a failing generation
//! dependency is not hammered.

use crate::generate::{readmit_fact, Generator};
use crate::producer::ProducerPool;
use crate::review::HumanReviewQueue;
use kip_core::{
    EntityRef, Fact, FactId, Flag, FlagSeverity, InfraError, InputDefect, KipError, RunId,
    ValidationState,
};
use kip_persist::IncrementalWriter;
use kip_store::{ChainedEvent, KnowledgeStore};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// How an escalation loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Regeneration produced a version that passed re-validation
    Revalidated {
        /// Re-extraction attempts spent
        attempts: u32,
    },
    /// Attempt budget exhausted; item handed to the review queue
    Escalated {
        /// Attempts recorded on the validation record
        attempts: u32,
    },
}

/// Re-validation hook: the coordinator re-runs whichever checks failed and
/// treats `Error`-or-worse flags as another failure.
pub type Revalidate<'a> = &'a (dyn Fn(&Fact) -> Vec<Flag> + Send + Sync);

/// Drives a failed fact through the regenerate/escalate state machine.
pub struct ReextractionCoordinator {
    store: Arc<KnowledgeStore>,
    queue: Arc<HumanReviewQueue>,
    writer: Option<IncrementalWriter>,
    max_attempts: u32,
    backoff_base_ms: u64,
    backoff_cap_ms: u64,
}

impl ReextractionCoordinator {
    /// Coordinator over the store and review queue.
    #[must_use]
    pub fn new(
        store: Arc<KnowledgeStore>,
        queue: Arc<HumanReviewQueue>,
        max_attempts: u32,
        backoff_base_ms: u64,
        backoff_cap_ms: u64,
    ) -> Self {
        Self {
            store,
            queue,
            writer: None,
            max_attempts,
            backoff_base_ms,
            backoff_cap_ms,
        }
    }

    /// Persist every mutation through `writer` as it happens.
    #[must_use]
    pub fn with_writer(mut self, writer: IncrementalWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Resolve a fact whose validation failed. The record must be in
    /// `AiValidated` when called.
    ///
    /// Loops: request re-extraction, back off, regenerate the one offending
    /// fact, re-validate. A pass returns `Revalidated`; exhausting the
    /// attempt budget transitions to `HumanPending`, enqueues, and returns
    /// `Escalated`. The attempt counter never exceeds the configured max.
    ///
    /// # Errors
    /// Input defects from a malformed regeneration candidate and illegal
    /// transitions propagate; transient generation failures are consumed as
    /// failed attempts.
    pub async fn resolve(
        &self,
        generator: &dyn Generator,
        pool: &ProducerPool,
        fact_id: &FactId,
        context: &str,
        revalidate: Revalidate<'_>,
    ) -> Result<Resolution, KipError> {
        let entity = EntityRef::Fact(fact_id.clone());
        let run_id = self
            .store
            .get_fact(fact_id)
            .map(|f| f.run_id)
            .ok_or_else(|| {
                KipError::Input(InputDefect::InvalidCitation {
                    fact_id: fact_id.clone(),
                })
            })?;

        loop {
            let committed = self.store.transition_record(
                &entity,
                ValidationState::ReextractPending,
                "coordinator",
                context,
            )?;
            self.persist_record(run_id, &entity, &committed.events).await?;

            let spent = self
                .store
                .record(&entity)
                .map(|r| r.attempt_count)
                .unwrap_or(0);
            if spent >= self.max_attempts {
                let committed = self.store.transition_record(
                    &entity,
                    ValidationState::HumanPending,
                    "coordinator",
                    "re-extraction attempts exhausted",
                )?;
                self.persist_record(run_id, &entity, &committed.events).await?;
                self.queue.enqueue(entity.clone())?;
                tracing::warn!(%entity, attempts = spent, "escalated to human review");
                return Ok(Resolution::Escalated { attempts: spent });
            }

            let attempt = self.store.increment_attempt(&entity);
            tokio::time::sleep(self.backoff(attempt)).await;

            match pool.regenerate(generator, fact_id, context).await {
                Ok(candidates) => {
                    if let Some(candidate) = candidates.into_iter().next() {
                        let original = self.store.get_fact(fact_id).ok_or_else(|| {
                            KipError::Input(InputDefect::InvalidCitation {
                                fact_id: fact_id.clone(),
                            })
                        })?;
                        let fact = readmit_fact(&original, candidate)?;
                        let committed = self.store.put_fact(fact.clone())?;
                        self.persist_fact(&fact, &committed.events).await?;
                    }
                    let committed = self.store.transition_record(
                        &entity,
                        ValidationState::AiValidated,
                        "coordinator",
                        "regenerated",
                    )?;
                    self.persist_record(run_id, &entity, &committed.events).await?;
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(%entity, attempt, error = %e, "regeneration failed");
                    let committed = self.store.transition_record(
                        &entity,
                        ValidationState::AiValidated,
                        "coordinator",
                        "regeneration failed; will retry or escalate",
                    )?;
                    self.persist_record(run_id, &entity, &committed.events).await?;
                    continue;
                }
                Err(e) => return Err(e),
            }

            let fact = self.store.get_fact(fact_id).ok_or_else(|| {
                KipError::Input(InputDefect::InvalidCitation {
                    fact_id: fact_id.clone(),
                })
            })?;
            let flags = revalidate(&fact);
            let failed = flags.iter().any(|f| f.severity >= FlagSeverity::Error);
            if !failed {
                tracing::info!(%entity, attempt, "re-validation passed");
                return Ok(Resolution::Revalidated { attempts: attempt });
            }
            let committed = self.store.add_flags(&entity, flags);
            self.persist_record(run_id, &entity, &committed.events).await?;
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .backoff_base_ms
            .saturating_mul(1u64 << (attempt.saturating_sub(1)).min(16))
            .min(self.backoff_cap_ms);
        let jitter = rand::rng().random_range(0..=exp / 2);
        Duration::from_millis(exp + jitter)
    }

    async fn persist_fact(&self, fact: &Fact, events: &[ChainedEvent]) -> Result<(), KipError> {
        if let Some(writer) = &self.writer {
            writer
                .write_fact(fact, events)
                .await
                .map_err(|e| InfraError::StorageWrite(e.to_string()))?;
        }
        Ok(())
    }

    async fn persist_record(
        &self,
        run_id: RunId,
        entity: &EntityRef,
        events: &[ChainedEvent],
    ) -> Result<(), KipError> {
        if let Some(writer) = &self.writer {
            if let Some(record) = self.store.record(entity) {
                writer
                    .write_record(run_id, &record, events)
                    .await
                    .map_err(|e| InfraError::StorageWrite(e.to_string()))?;
            }
        }
        Ok(())
    }
}
