//! Human review queue.
//!
//! The only actor that moves a validation record out of `HumanPending`.
//! Reviewer decisions may arrive at any time - during a run or long after
//! its automated pipeline finished - so every method goes straight to the
//! store and stays safe under concurrent pipeline writes.

use chrono::{DateTime, Utc};
use kip_core::{
    Correction, EntityRef, InputDefect, KipError, RunId, ValidationRecord, ValidationState,
};
use kip_store::{Committed, KnowledgeStore};
use parking_lot::Mutex;
use std::sync::Arc;

/// Filters for [`HumanReviewQueue::list_pending`].
#[derive(Debug, Clone, Default)]
pub struct QueueFilter {
    /// Only items from this run
    pub run: Option<RunId>,
    /// Only items from this domain
    pub domain: Option<String>,
}

impl QueueFilter {
    /// No filtering; everything pending.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to one run.
    #[must_use]
    pub fn run(mut self, run: RunId) -> Self {
        self.run = Some(run);
        self
    }

    /// Restrict to one domain.
    #[must_use]
    pub fn domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string());
        self
    }
}

/// One escalated item awaiting a reviewer.
#[derive(Debug, Clone)]
pub struct PendingItem {
    /// The escalated entity
    pub entity: EntityRef,
    /// Its validation record (state, attempts, flags)
    pub record: ValidationRecord,
    /// Domain of the underlying entity, when resolvable
    pub domain: Option<String>,
    /// When it was enqueued
    pub enqueued_at: DateTime<Utc>,
}

/// Queue of items that exhausted automated resolution.
pub struct HumanReviewQueue {
    store: Arc<KnowledgeStore>,
    pending: Mutex<Vec<(EntityRef, DateTime<Utc>)>>,
}

impl HumanReviewQueue {
    /// Queue over the given store.
    #[must_use]
    pub fn new(store: Arc<KnowledgeStore>) -> Self {
        Self {
            store,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Register an escalated entity. The entity's record must already be in
    /// `HumanPending` (the coordinator transitions it before enqueueing).
    ///
    /// # Errors
    /// `InputDefect::MissingField` when no record exists or it is not
    /// pending review.
    pub fn enqueue(&self, entity: EntityRef) -> Result<(), KipError> {
        let record = self.store.record(&entity).ok_or_else(|| {
            KipError::Input(InputDefect::MissingField {
                field: format!("validation record for {entity}"),
            })
        })?;
        if record.state != ValidationState::HumanPending {
            return Err(InputDefect::MissingField {
                field: format!("{entity} is not pending review (state {:?})", record.state),
            }
            .into());
        }
        let mut pending = self.pending.lock();
        if !pending.iter().any(|(e, _)| e == &entity) {
            tracing::info!(%entity, "enqueued for human review");
            pending.push((entity, Utc::now()));
        }
        Ok(())
    }

    /// Items still awaiting a decision, filtered.
    #[must_use]
    pub fn list_pending(&self, filter: &QueueFilter) -> Vec<PendingItem> {
        self.pending
            .lock()
            .iter()
            .filter_map(|(entity, at)| {
                let record = self.store.record(entity)?;
                if record.state != ValidationState::HumanPending {
                    return None;
                }
                let domain = self.entity_domain(entity);
                if let Some(run) = filter.run {
                    if self.entity_run(entity) != Some(run) {
                        return None;
                    }
                }
                if let Some(want) = &filter.domain {
                    if domain.as_deref() != Some(want.as_str()) {
                        return None;
                    }
                }
                Some(PendingItem {
                    entity: entity.clone(),
                    record,
                    domain,
                    enqueued_at: *at,
                })
            })
            .collect()
    }

    /// Reviewer accepts the item as-is.
    ///
    /// # Errors
    /// Illegal transition when the item is not in `HumanPending`.
    pub fn confirm(
        &self,
        entity: &EntityRef,
        actor: &str,
    ) -> Result<Committed<ValidationState>, KipError> {
        let committed = self.store.transition_record(
            entity,
            ValidationState::Confirmed,
            actor,
            "reviewer confirmed",
        )?;
        self.remove(entity);
        Ok(committed)
    }

    /// Reviewer corrects a fact field. A `Correction` records the prior
    /// value; history is never overwritten.
    ///
    /// # Errors
    /// Only facts can be field-corrected; findings are confirmed or
    /// rejected whole.
    pub fn correct(
        &self,
        entity: &EntityRef,
        field: &str,
        new_value: serde_json::Value,
        actor: &str,
        reason: &str,
    ) -> Result<Committed<Correction>, KipError> {
        let EntityRef::Fact(fact_id) = entity else {
            return Err(InputDefect::MissingField {
                field: format!("{entity} is not a correctable fact"),
            }
            .into());
        };
        // The fact must exist before the record moves: a failed edit must
        // never leave a `Corrected` record with no correction behind it.
        if self.store.get_fact(fact_id).is_none() {
            return Err(InputDefect::MissingField {
                field: format!("{entity} has no stored fact to correct"),
            }
            .into());
        }
        let transition = self.store.transition_record(
            entity,
            ValidationState::Corrected,
            actor,
            reason,
        )?;
        let mut committed = self
            .store
            .correct_fact(fact_id, field, new_value, actor, reason)?;
        let mut events = transition.events;
        events.append(&mut committed.events);
        self.remove(entity);
        Ok(Committed {
            value: committed.value,
            events,
        })
    }

    /// Reviewer rejects the item. Terminal and soft: the entity keeps its
    /// row with a `Rejected` status and stays queryable.
    ///
    /// # Errors
    /// Illegal transition when the item is not in `HumanPending`.
    pub fn reject(
        &self,
        entity: &EntityRef,
        actor: &str,
        reason: &str,
    ) -> Result<Committed<()>, KipError> {
        let transition =
            self.store
                .transition_record(entity, ValidationState::Rejected, actor, reason)?;
        let mut events = transition.events;
        match entity {
            EntityRef::Fact(id) => {
                events.append(&mut self.store.reject_fact(id, actor, reason)?.events);
            }
            EntityRef::Finding(id) => {
                events.append(&mut self.store.reject_finding(id, actor, reason)?.events);
            }
            _ => {}
        }
        self.remove(entity);
        Ok(Committed { value: (), events })
    }

    fn remove(&self, entity: &EntityRef) {
        self.pending.lock().retain(|(e, _)| e != entity);
    }

    fn entity_domain(&self, entity: &EntityRef) -> Option<String> {
        match entity {
            EntityRef::Fact(id) => self.store.get_fact(id).map(|f| f.domain),
            EntityRef::Finding(id) => self.store.get_finding(id).map(|f| f.domain),
            EntityRef::Gap(id) => self.store.get_gap(id).map(|g| g.domain),
            _ => None,
        }
    }

    fn entity_run(&self, entity: &EntityRef) -> Option<RunId> {
        match entity {
            EntityRef::Fact(id) => self.store.get_fact(id).map(|f| f.run_id),
            EntityRef::Finding(id) => self.store.get_finding(id).map(|f| f.run_id),
            EntityRef::Gap(id) => self.store.get_gap(id).map(|g| g.run_id),
            EntityRef::Run(id) => Some(*id),
            EntityRef::Correction(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kip_core::FactStatus;
    use kip_store::CitationMode;
    use kip_test_utils::fact_with_run;

    fn escalated_fact(store: &Arc<KnowledgeStore>, run: RunId, item: &str) -> EntityRef {
        let fact = fact_with_run(store, run, "net", "firewalls", item, 0.9);
        let entity = EntityRef::Fact(fact.id.clone());
        store.put_fact(fact).unwrap();
        store
            .transition_record(&entity, ValidationState::AiValidated, "validator", "checked")
            .unwrap();
        store
            .transition_record(&entity, ValidationState::ReextractPending, "coordinator", "failed")
            .unwrap();
        store
            .transition_record(&entity, ValidationState::HumanPending, "coordinator", "exhausted")
            .unwrap();
        entity
    }

    #[test]
    fn enqueue_requires_pending_state() {
        let store = Arc::new(KnowledgeStore::new());
        let run = RunId::new();
        let fact = fact_with_run(&store, run, "net", "firewalls", "ASA", 0.9);
        let entity = EntityRef::Fact(fact.id.clone());
        store.put_fact(fact).unwrap();

        let queue = HumanReviewQueue::new(Arc::clone(&store));
        assert!(queue.enqueue(entity).is_err());
    }

    #[test]
    fn confirm_empties_queue() {
        let store = Arc::new(KnowledgeStore::new());
        let run = RunId::new();
        let entity = escalated_fact(&store, run, "ASA 5516");
        let queue = HumanReviewQueue::new(Arc::clone(&store));
        queue.enqueue(entity.clone()).unwrap();
        assert_eq!(queue.list_pending(&QueueFilter::all()).len(), 1);

        queue.confirm(&entity, "reviewer@example").unwrap();
        assert!(queue.list_pending(&QueueFilter::all()).is_empty());
        assert_eq!(
            store.record(&entity).unwrap().state,
            ValidationState::Confirmed
        );
    }

    #[test]
    fn correct_appends_correction() {
        let store = Arc::new(KnowledgeStore::new());
        let run = RunId::new();
        let entity = escalated_fact(&store, run, "ASA 5516");
        let queue = HumanReviewQueue::new(Arc::clone(&store));
        queue.enqueue(entity.clone()).unwrap();

        let committed = queue
            .correct(
                &entity,
                "details.version",
                serde_json::json!("9.12"),
                "reviewer@example",
                "vendor confirmed the newer release",
            )
            .unwrap();
        assert_eq!(committed.value.field, "details.version");
        assert_eq!(store.corrections().len(), 1);
        assert_eq!(
            store.record(&entity).unwrap().state,
            ValidationState::Corrected
        );
    }

    #[test]
    fn correct_without_stored_fact_leaves_record_pending() {
        let store = Arc::new(KnowledgeStore::new());
        // A record can outlive its fact row, e.g. a partial crash recovery.
        let orphan = EntityRef::Fact(kip_core::FactId::new("net", 9));
        let mut record = ValidationRecord::extracted(orphan.clone());
        record.state = ValidationState::HumanPending;
        store.restore_record(record);

        let queue = HumanReviewQueue::new(Arc::clone(&store));
        queue.enqueue(orphan.clone()).unwrap();
        let err = queue
            .correct(
                &orphan,
                "details.version",
                serde_json::json!("9.12"),
                "reviewer@example",
                "typo",
            )
            .unwrap_err();
        assert!(matches!(err, KipError::Input(_)));

        // The failed edit must not half-apply: still pending, still
        // decidable.
        assert_eq!(
            store.record(&orphan).unwrap().state,
            ValidationState::HumanPending
        );
        queue.confirm(&orphan, "reviewer@example").unwrap();
        assert_eq!(
            store.record(&orphan).unwrap().state,
            ValidationState::Confirmed
        );
    }

    #[test]
    fn reject_is_soft_terminal() {
        let store = Arc::new(KnowledgeStore::new());
        let run = RunId::new();
        let entity = escalated_fact(&store, run, "ASA 5516");
        let queue = HumanReviewQueue::new(Arc::clone(&store));
        queue.enqueue(entity.clone()).unwrap();

        queue
            .reject(&entity, "reviewer@example", "no supporting document")
            .unwrap();
        let EntityRef::Fact(id) = &entity else { unreachable!() };
        let fact = store.get_fact(id).unwrap();
        assert_eq!(fact.status, FactStatus::Rejected);
        // Terminal: no further reviewer action is legal.
        assert!(queue.confirm(&entity, "reviewer@example").is_err());
    }

    #[test]
    fn rejected_fact_no_longer_counts_as_citation() {
        let store = Arc::new(KnowledgeStore::new());
        let run = RunId::new();
        let entity = escalated_fact(&store, run, "ASA 5516");
        let queue = HumanReviewQueue::new(Arc::clone(&store));
        queue.enqueue(entity.clone()).unwrap();
        queue.reject(&entity, "reviewer@example", "bad quote").unwrap();

        let EntityRef::Fact(id) = &entity else { unreachable!() };
        let finding = kip_test_utils::finding_citing(&store, run, "net", vec![id.clone()]);
        assert!(store.put_finding(finding, CitationMode::FailFast).is_err());
    }

    #[test]
    fn filters_scope_by_run_and_domain() {
        let store = Arc::new(KnowledgeStore::new());
        let run_a = RunId::new();
        let run_b = RunId::new();
        let entity_a = escalated_fact(&store, run_a, "ASA 5516");
        let entity_b = escalated_fact(&store, run_b, "PA-220");
        let queue = HumanReviewQueue::new(Arc::clone(&store));
        queue.enqueue(entity_a.clone()).unwrap();
        queue.enqueue(entity_b).unwrap();

        let scoped = queue.list_pending(&QueueFilter::all().run(run_a));
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].entity, entity_a);

        let net = queue.list_pending(&QueueFilter::all().domain("net"));
        assert_eq!(net.len(), 2);
        assert!(queue
            .list_pending(&QueueFilter::all().domain("hr"))
            .is_empty());
    }
}
