//! The Knowledge Store
//!
//! Owns fact/gap/finding lifecycle. ID assignment and duplicate-index
//! mutations are serialized per domain+category shard; producers touching
//! disjoint shards never contend. Every mutation appends exactly one audit
//! event, and mutating calls hand those events back to the caller so the
//! persistence layer can commit entity and audit rows in one transaction.

use crate::audit::{AuditTrail, ChainedEvent};
use crate::conflict::ConflictCheck;
use crate::dedup::{normalized_key, similarity};
use dashmap::DashMap;
use kip_core::{
    AuditAction, AuditEvent, Correction, EntityRef, EntityTag, Fact, FactId, FactStatus, Finding,
    FindingId, FindingStatus, Flag, FlagSeverity, Gap, GapId, GapKind, Impact, InputDefect,
    KipError, LinkKind, RunId, ValidationRecord, ValidationState,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// How citation failures are treated when storing findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CitationMode {
    /// Any invalid citation rejects the finding outright
    #[default]
    FailFast,
    /// Finding is stored but flagged `unverified_citations`
    Permissive,
}

/// Store tuning knobs.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Similarity at or above which two items count as near-duplicates
    pub dup_similarity_threshold: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dup_similarity_threshold: 0.82,
        }
    }
}

/// A value plus the audit events its mutation appended. The caller must hand
/// the events to the persistence layer together with the entity write.
#[derive(Debug, Clone)]
pub struct Committed<T> {
    /// The mutation outcome
    pub value: T,
    /// Audit events appended by this mutation, in order
    pub events: Vec<ChainedEvent>,
}

/// Outcome of `put_fact`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactAcceptance {
    /// Stored; `linked_to` lists near-duplicates now connected by edges
    Accepted {
        /// The stored fact
        id: FactId,
        /// Near-duplicate facts linked via `Overlap` edges
        linked_to: Vec<FactId>,
    },
    /// Identical-key duplicate; one version retained, the other discarded
    /// (audited, never silent)
    Duplicate {
        /// The retained version
        kept: FactId,
        /// The discarded version
        discarded: FactId,
    },
    /// Stored, but it materially disagrees with an existing fact; a conflict
    /// gap links both
    Conflict {
        /// The stored fact
        id: FactId,
        /// The emitted conflict gap
        gap_id: GapId,
    },
}

/// Outcome of `put_finding`.
#[derive(Debug, Clone, PartialEq)]
pub enum FindingAcceptance {
    /// All citations resolved to live facts
    Accepted {
        /// The stored finding
        id: FindingId,
    },
    /// Stored under permissive mode with unresolved citations flagged
    AcceptedWithFlags {
        /// The stored finding
        id: FindingId,
        /// The flags attached to its validation record
        flags: Vec<Flag>,
    },
}

#[derive(Debug, Default)]
struct ShardIndex {
    // (normalized key, raw item, fact id, entity) per stored fact
    entries: Vec<(String, String, FactId, EntityTag)>,
}

type ShardKey = (String, String);

/// Concurrency-safe store of facts, gaps, findings and their validation
/// records, plus the audit trail.
#[derive(Debug, Default)]
pub struct KnowledgeStore {
    config: StoreConfig,
    facts: DashMap<FactId, Fact>,
    gaps: DashMap<GapId, Gap>,
    findings: DashMap<FindingId, Finding>,
    records: DashMap<EntityRef, ValidationRecord>,
    corrections: Mutex<Vec<Correction>>,
    cited_by: DashMap<FactId, Vec<FindingId>>,
    shards: DashMap<ShardKey, Arc<Mutex<ShardIndex>>>,
    fact_seq: DashMap<String, AtomicU32>,
    gap_seq: DashMap<String, AtomicU32>,
    finding_seq: DashMap<String, AtomicU32>,
    trail: AuditTrail,
}

impl KnowledgeStore {
    /// Create a store with default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with explicit config.
    #[must_use]
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// The audit trail.
    #[inline]
    #[must_use]
    pub fn trail(&self) -> &AuditTrail {
        &self.trail
    }

    // ── ID assignment ───────────────────────────────────────────────

    /// Allocate the next fact ID for `domain`. Lock-free; safe under
    /// concurrent producers.
    #[must_use]
    pub fn allocate_fact_id(&self, domain: &str) -> FactId {
        FactId::new(domain, self.next_seq(&self.fact_seq, domain))
    }

    /// Allocate the next gap ID for `domain`.
    #[must_use]
    pub fn allocate_gap_id(&self, domain: &str) -> GapId {
        GapId::new(domain, self.next_seq(&self.gap_seq, domain))
    }

    /// Allocate the next finding ID for `domain`.
    #[must_use]
    pub fn allocate_finding_id(&self, domain: &str) -> FindingId {
        FindingId::new(domain, self.next_seq(&self.finding_seq, domain))
    }

    fn next_seq(&self, seqs: &DashMap<String, AtomicU32>, domain: &str) -> u32 {
        let counter = seqs.entry(domain.to_ascii_uppercase()).or_default();
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn seed_seq(&self, seqs: &DashMap<String, AtomicU32>, domain: &str, seq: u32) {
        let counter = seqs.entry(domain.to_string()).or_default();
        counter.fetch_max(seq, Ordering::Relaxed);
    }

    // ── Recovery ────────────────────────────────────────────────────

    /// Re-seat a fact read back from the durable store: entity map, shard
    /// index and the domain's ID allocator. No audit events; the fact's
    /// history is already durable. Idempotent.
    pub fn restore_fact(&self, fact: Fact) {
        self.seed_seq(&self.fact_seq, fact.id.domain(), fact.id.seq());
        let shard = self
            .shards
            .entry((fact.domain.clone(), fact.category.clone()))
            .or_default()
            .clone();
        let mut index = shard.lock();
        if !index.entries.iter().any(|(_, _, id, _)| *id == fact.id) {
            index.entries.push((
                normalized_key(&fact.item),
                fact.item.clone(),
                fact.id.clone(),
                fact.entity,
            ));
        }
        self.records
            .entry(EntityRef::Fact(fact.id.clone()))
            .or_insert_with(|| ValidationRecord::extracted(EntityRef::Fact(fact.id.clone())));
        self.facts.insert(fact.id.clone(), fact);
    }

    /// Re-seat a gap read back from the durable store.
    pub fn restore_gap(&self, gap: Gap) {
        self.seed_seq(&self.gap_seq, gap.id.domain(), gap.id.seq());
        self.gaps.insert(gap.id.clone(), gap);
    }

    /// Re-seat a finding read back from the durable store, rebuilding the
    /// reverse citation index.
    pub fn restore_finding(&self, finding: Finding) {
        self.seed_seq(&self.finding_seq, finding.id.domain(), finding.id.seq());
        for fact_id in &finding.based_on_facts {
            let mut cited = self.cited_by.entry(fact_id.clone()).or_default();
            if !cited.contains(&finding.id) {
                cited.push(finding.id.clone());
            }
        }
        self.records
            .entry(EntityRef::Finding(finding.id.clone()))
            .or_insert_with(|| {
                ValidationRecord::extracted(EntityRef::Finding(finding.id.clone()))
            });
        self.findings.insert(finding.id.clone(), finding);
    }

    /// Re-seat a validation record, replacing any default the entity
    /// restores above created.
    pub fn restore_record(&self, record: ValidationRecord) {
        self.records.insert(record.entity.clone(), record);
    }

    /// Re-seat a reviewer correction.
    pub fn restore_correction(&self, correction: Correction) {
        let mut corrections = self.corrections.lock();
        if !corrections.iter().any(|c| c.id == correction.id) {
            corrections.push(correction);
        }
    }

    // ── Facts ───────────────────────────────────────────────────────

    /// Store a fact, running the duplicate and conflict checks.
    ///
    /// # Errors
    /// `KipError::Input` for evidence/confidence defects; the fact is
    /// rejected synchronously and never stored.
    pub fn put_fact(&self, mut fact: Fact) -> Result<Committed<FactAcceptance>, KipError> {
        fact.evidence.require_traceable()?;
        if !(0.0..=1.0).contains(&fact.confidence) {
            return Err(InputDefect::ConfidenceOutOfRange {
                value: fact.confidence,
            }
            .into());
        }
        if fact.item.trim().is_empty() {
            return Err(InputDefect::MissingField {
                field: "item".into(),
            }
            .into());
        }

        // Re-put of an existing ID is an update, not a re-extraction.
        if self.facts.contains_key(&fact.id) {
            return Ok(self.update_fact(fact));
        }

        let shard = self
            .shards
            .entry((fact.domain.clone(), fact.category.clone()))
            .or_default()
            .clone();
        let mut index = shard.lock();

        let key = normalized_key(&fact.item);

        // Identical-key match first; it decides between duplicate and conflict.
        let identical = index
            .entries
            .iter()
            .find(|(k, _, _, _)| *k == key)
            .map(|(_, _, id, entity)| (id.clone(), *entity));

        if let Some((existing_id, _)) = identical {
            let existing = self
                .facts
                .get(&existing_id)
                .map(|f| f.clone())
                .expect("shard index points at stored fact");

            let check = ConflictCheck::compare(&existing, &fact);
            if let ConflictCheck::Conflicting { disagreements } = check {
                let outcome = self.admit_conflicting(&mut index, fact, &existing, disagreements);
                return Ok(outcome);
            }

            if existing.entity == fact.entity {
                // True duplicate: retain the higher-confidence version.
                let outcome = self.merge_duplicate(&mut index, key, fact, existing);
                return Ok(outcome);
            }
            // Same item held consistently by both parties: store normally.
        }

        // Near-duplicate scan (same entity only).
        let mut linked_to = Vec::new();
        for (_, existing_item, existing_id, entity) in &index.entries {
            if *entity == fact.entity
                && similarity(&fact.item, existing_item) >= self.config.dup_similarity_threshold
                && normalized_key(existing_item) != key
            {
                linked_to.push(existing_id.clone());
            }
        }

        let mut events = Vec::new();
        for other_id in &linked_to {
            fact.link(other_id.clone(), LinkKind::Overlap);
            if let Some(mut other) = self.facts.get_mut(other_id) {
                other.link(fact.id.clone(), LinkKind::Overlap);
            }
            events.push(self.audit(
                fact.run_id,
                EntityRef::Fact(fact.id.clone()),
                AuditAction::DuplicateMerged,
                "store",
                format!("near-duplicate of {other_id}; linked, both retained"),
            ));
        }

        events.push(self.insert_fact(&mut index, key, fact.clone()));
        Ok(Committed {
            value: FactAcceptance::Accepted {
                id: fact.id,
                linked_to,
            },
            events,
        })
    }

    fn update_fact(&self, fact: Fact) -> Committed<FactAcceptance> {
        let id = fact.id.clone();
        let run_id = fact.run_id;
        self.facts.insert(id.clone(), fact);
        let ev = self.audit(
            run_id,
            EntityRef::Fact(id.clone()),
            AuditAction::Updated,
            "store",
            "re-written with same stable ID",
        );
        Committed {
            value: FactAcceptance::Accepted {
                id,
                linked_to: Vec::new(),
            },
            events: vec![ev],
        }
    }

    fn merge_duplicate(
        &self,
        index: &mut ShardIndex,
        key: String,
        incoming: Fact,
        existing: Fact,
    ) -> Committed<FactAcceptance> {
        let incoming_wins = incoming.confidence > existing.confidence;
        let (kept, discarded) = if incoming_wins {
            (incoming, existing)
        } else {
            (existing, incoming)
        };
        let mut events = Vec::new();

        // The discarded version gets no row of its own; its ID survives in
        // the supersede edge on the retained fact and in the DuplicateMerged
        // audit event below.
        let mut kept_fact = kept.clone();
        kept_fact.link(discarded.id.clone(), LinkKind::Supersedes);
        let run_id = kept_fact.run_id;
        if incoming_wins {
            // Repoint the shard index entry from the discarded version at
            // the incoming one, then store it.
            if let Some(entry) = index.entries.iter_mut().find(|(_, _, id, _)| *id == discarded.id)
            {
                entry.0 = key;
                entry.1 = kept_fact.item.clone();
                entry.2 = kept_fact.id.clone();
                entry.3 = kept_fact.entity;
            }
            self.facts.insert(kept_fact.id.clone(), kept_fact.clone());
            self.records.insert(
                EntityRef::Fact(kept_fact.id.clone()),
                ValidationRecord::extracted(EntityRef::Fact(kept_fact.id.clone())),
            );
            events.push(self.audit(
                run_id,
                EntityRef::Fact(kept_fact.id.clone()),
                AuditAction::Extracted,
                "store",
                "fact stored",
            ));
        } else {
            self.facts.insert(kept_fact.id.clone(), kept_fact.clone());
        }

        events.push(self.audit(
            run_id,
            EntityRef::Fact(kept_fact.id.clone()),
            AuditAction::DuplicateMerged,
            "store",
            format!(
                "duplicate merge: retained {} (confidence {:.2}), discarded {} (confidence {:.2})",
                kept_fact.id, kept_fact.confidence, discarded.id, discarded.confidence
            ),
        ));

        Committed {
            value: FactAcceptance::Duplicate {
                kept: kept_fact.id,
                discarded: discarded.id,
            },
            events,
        }
    }

    fn admit_conflicting(
        &self,
        index: &mut ShardIndex,
        mut fact: Fact,
        existing: &Fact,
        disagreements: Vec<String>,
    ) -> Committed<FactAcceptance> {
        let mut events = Vec::new();

        fact.link(existing.id.clone(), LinkKind::Conflict);
        if let Some(mut other) = self.facts.get_mut(&existing.id) {
            other.link(fact.id.clone(), LinkKind::Conflict);
        }

        let key = normalized_key(&fact.item);
        let fact_id = fact.id.clone();
        let run_id = fact.run_id;
        let domain = fact.domain.clone();
        let category = fact.category.clone();
        let item = fact.item.clone();
        events.push(self.insert_fact(index, key, fact));

        let gap = Gap {
            id: self.allocate_gap_id(&domain),
            run_id,
            domain,
            category,
            kind: GapKind::Conflict,
            related_facts: vec![existing.id.clone(), fact_id.clone()],
            impact: Impact::High,
            guidance: format!("`{item}`: sources disagree on {}", disagreements.join("; ")),
            resolved: false,
            resolution_note: None,
            updated_at: chrono::Utc::now(),
        };
        let gap_id = gap.id.clone();
        self.gaps.insert(gap_id.clone(), gap);
        events.push(self.audit(
            run_id,
            EntityRef::Gap(gap_id.clone()),
            AuditAction::ConflictDetected,
            "store",
            format!("conflict between {} and {fact_id}", existing.id),
        ));

        tracing::warn!(
            fact = %fact_id,
            conflicting_with = %existing.id,
            gap = %gap_id,
            "conflict gap emitted"
        );

        Committed {
            value: FactAcceptance::Conflict {
                id: fact_id,
                gap_id,
            },
            events,
        }
    }

    fn insert_fact(&self, index: &mut ShardIndex, key: String, fact: Fact) -> ChainedEvent {
        let id = fact.id.clone();
        let run_id = fact.run_id;
        index
            .entries
            .push((key, fact.item.clone(), id.clone(), fact.entity));
        self.facts.insert(id.clone(), fact);
        self.records.insert(
            EntityRef::Fact(id.clone()),
            ValidationRecord::extracted(EntityRef::Fact(id.clone())),
        );
        self.audit(
            run_id,
            EntityRef::Fact(id),
            AuditAction::Extracted,
            "store",
            "fact stored",
        )
    }

    /// Fetch a fact by ID.
    #[must_use]
    pub fn get_fact(&self, id: &FactId) -> Option<Fact> {
        self.facts.get(id).map(|f| f.clone())
    }

    // ── Gaps ────────────────────────────────────────────────────────

    /// Store a validator-synthesized or extraction-time gap.
    pub fn put_gap(&self, gap: Gap) -> Committed<GapId> {
        let id = gap.id.clone();
        let run_id = gap.run_id;
        let detail = format!("{:?} gap: {}", gap.kind, gap.guidance);
        self.gaps.insert(id.clone(), gap);
        let ev = self.audit(
            run_id,
            EntityRef::Gap(id.clone()),
            AuditAction::GapRecorded,
            "store",
            detail,
        );
        Committed {
            value: id,
            events: vec![ev],
        }
    }

    /// Fetch a gap by ID.
    #[must_use]
    pub fn get_gap(&self, id: &GapId) -> Option<Gap> {
        self.gaps.get(id).map(|g| g.clone())
    }

    /// Mark a gap addressed.
    pub fn resolve_gap(
        &self,
        id: &GapId,
        actor: &str,
        note: &str,
    ) -> Result<Committed<()>, KipError> {
        let run_id = {
            let mut gap = self.gaps.get_mut(id).ok_or_else(|| {
                KipError::Input(InputDefect::MissingField {
                    field: format!("gap {id}"),
                })
            })?;
            gap.resolve(note);
            gap.run_id
        };
        let ev = self.audit(
            run_id,
            EntityRef::Gap(id.clone()),
            AuditAction::GapResolved,
            actor,
            note,
        );
        Ok(Committed {
            value: (),
            events: vec![ev],
        })
    }

    // ── Runs ────────────────────────────────────────────────────────

    /// Open a validation record for the run itself, so run-scoped flags
    /// (cross-domain ratios, adversarial review) attach to something
    /// queryable.
    pub fn begin_run(&self, run: RunId) -> Committed<()> {
        let entity = EntityRef::Run(run);
        self.records
            .entry(entity.clone())
            .or_insert_with(|| ValidationRecord::extracted(entity.clone()));
        let ev = self.audit(run, entity, AuditAction::RunStatusChanged, "pipeline", "running");
        Committed {
            value: (),
            events: vec![ev],
        }
    }

    /// Audit a run status change.
    pub fn note_run_status(&self, run: RunId, status: &str) -> Committed<()> {
        let ev = self.audit(
            run,
            EntityRef::Run(run),
            AuditAction::RunStatusChanged,
            "pipeline",
            status,
        );
        Committed {
            value: (),
            events: vec![ev],
        }
    }

    // ── Findings ────────────────────────────────────────────────────

    /// Store a finding, enforcing citation integrity against the live store.
    ///
    /// # Errors
    /// - `InputDefect::EmptyCitations` always
    /// - `InputDefect::InvalidCitation` under fail-fast mode
    pub fn put_finding(
        &self,
        finding: Finding,
        mode: CitationMode,
    ) -> Result<Committed<FindingAcceptance>, KipError> {
        if finding.based_on_facts.is_empty() {
            self.audit(
                finding.run_id,
                EntityRef::Finding(finding.id.clone()),
                AuditAction::RejectedAtIntake,
                "store",
                "finding cites no facts",
            );
            return Err(InputDefect::EmptyCitations {
                finding_id: finding.id,
            }
            .into());
        }

        let invalid: Vec<FactId> = finding
            .based_on_facts
            .iter()
            .filter(|id| !self.citation_resolves(id))
            .cloned()
            .collect();

        if !invalid.is_empty() && mode == CitationMode::FailFast {
            let first = invalid[0].clone();
            self.audit(
                finding.run_id,
                EntityRef::Finding(finding.id.clone()),
                AuditAction::RejectedAtIntake,
                "store",
                format!("invalid citations: {}", join_ids(&invalid)),
            );
            return Err(InputDefect::InvalidCitation { fact_id: first }.into());
        }

        let id = finding.id.clone();
        let run_id = finding.run_id;
        for fact_id in &finding.based_on_facts {
            self.cited_by
                .entry(fact_id.clone())
                .or_default()
                .push(id.clone());
        }
        self.findings.insert(id.clone(), finding);

        let mut record = ValidationRecord::extracted(EntityRef::Finding(id.clone()));
        let mut events = vec![self.audit(
            run_id,
            EntityRef::Finding(id.clone()),
            AuditAction::Extracted,
            "store",
            "finding stored",
        )];

        let value = if invalid.is_empty() {
            FindingAcceptance::Accepted { id: id.clone() }
        } else {
            let flag = Flag::new(
                "unverified_citations",
                FlagSeverity::Warning,
                format!("citations did not resolve: {}", join_ids(&invalid)),
                EntityRef::Finding(id.clone()),
            );
            record.flags.push(flag.clone());
            events.push(self.audit(
                run_id,
                EntityRef::Finding(id.clone()),
                AuditAction::Flagged,
                "store",
                flag.message.clone(),
            ));
            FindingAcceptance::AcceptedWithFlags {
                id: id.clone(),
                flags: vec![flag],
            }
        };

        self.records.insert(EntityRef::Finding(id), record);
        Ok(Committed { value, events })
    }

    /// A citation is valid when it resolves to a live, non-rejected fact.
    #[must_use]
    pub fn citation_resolves(&self, id: &FactId) -> bool {
        self.facts.get(id).is_some_and(|f| !f.is_rejected())
    }

    /// Fetch a finding by ID.
    #[must_use]
    pub fn get_finding(&self, id: &FindingId) -> Option<Finding> {
        self.findings.get(id).map(|f| f.clone())
    }

    /// Findings citing `fact_id`, via the reverse index (no scan).
    #[must_use]
    pub fn find_citing(&self, fact_id: &FactId) -> Vec<Finding> {
        self.cited_by
            .get(fact_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|fid| self.get_finding(fid))
                    .collect()
            })
            .unwrap_or_default()
    }

    // ── Validation records & flags ──────────────────────────────────

    /// Fetch the validation record for an entity.
    #[must_use]
    pub fn record(&self, entity: &EntityRef) -> Option<ValidationRecord> {
        self.records.get(entity).map(|r| r.clone())
    }

    /// Transition an entity's validation record, enforcing the legality
    /// table.
    pub fn transition_record(
        &self,
        entity: &EntityRef,
        to: ValidationState,
        actor: &str,
        detail: &str,
    ) -> Result<Committed<ValidationState>, KipError> {
        let mut record = self.records.get_mut(entity).ok_or_else(|| {
            KipError::Input(InputDefect::MissingField {
                field: format!("validation record for {entity}"),
            })
        })?;
        record.transition(to)?;
        drop(record);

        let run_id = self.run_of(entity);
        let action = match to {
            ValidationState::AiValidated => AuditAction::Validated,
            ValidationState::ReextractPending => AuditAction::ReextractRequested,
            ValidationState::HumanPending => AuditAction::Escalated,
            ValidationState::Confirmed => AuditAction::Confirmed,
            ValidationState::Corrected => AuditAction::Corrected,
            ValidationState::Rejected => AuditAction::RejectedByReview,
            ValidationState::Extracted => AuditAction::Extracted,
        };
        let ev = self.audit(run_id, entity.clone(), action, actor, detail);
        Ok(Committed {
            value: to,
            events: vec![ev],
        })
    }

    /// Attach flags to an entity's validation record.
    pub fn add_flags(&self, entity: &EntityRef, flags: Vec<Flag>) -> Committed<usize> {
        let run_id = self.run_of(entity);
        let mut events = Vec::with_capacity(flags.len());
        let count = flags.len();
        if let Some(mut record) = self.records.get_mut(entity) {
            for flag in flags {
                events.push(self.audit(
                    run_id,
                    entity.clone(),
                    AuditAction::Flagged,
                    "validator",
                    format!("[{:?}] {}: {}", flag.severity, flag.code, flag.message),
                ));
                record.flags.push(flag);
            }
        }
        Committed {
            value: count,
            events,
        }
    }

    /// Bump and return the attempt counter on an entity's record.
    #[must_use]
    pub fn increment_attempt(&self, entity: &EntityRef) -> u32 {
        self.records
            .get_mut(entity)
            .map(|mut r| {
                r.attempt_count += 1;
                r.attempt_count
            })
            .unwrap_or(0)
    }

    // ── Review mutations ────────────────────────────────────────────

    /// Apply a reviewer's correction to a fact detail field. Appends a
    /// `Correction`; never overwrites history.
    pub fn correct_fact(
        &self,
        id: &FactId,
        field: &str,
        new_value: serde_json::Value,
        actor: &str,
        reason: &str,
    ) -> Result<Committed<Correction>, KipError> {
        let (original, run_id) = {
            let mut fact = self.facts.get_mut(id).ok_or_else(|| {
                KipError::Input(InputDefect::InvalidCitation { fact_id: id.clone() })
            })?;
            let original = match field {
                "item" => {
                    let old = serde_json::Value::from(fact.item.clone());
                    fact.item = new_value.as_str().unwrap_or_default().to_string();
                    old
                }
                other => {
                    let key = other.strip_prefix("details.").unwrap_or(other);
                    let old = fact
                        .details
                        .insert(key.to_string(), new_value.clone())
                        .unwrap_or(serde_json::Value::Null);
                    old
                }
            };
            fact.updated_at = chrono::Utc::now();
            (original, fact.run_id)
        };

        let correction = Correction::now(
            EntityRef::Fact(id.clone()),
            field,
            original,
            new_value,
            actor,
            reason,
        );
        self.corrections.lock().push(correction.clone());
        let ev = self.audit(
            run_id,
            EntityRef::Fact(id.clone()),
            AuditAction::Corrected,
            actor,
            reason,
        );
        Ok(Committed {
            value: correction,
            events: vec![ev],
        })
    }

    /// Mark a fact rejected (terminal, soft). The fact stays queryable.
    pub fn reject_fact(
        &self,
        id: &FactId,
        actor: &str,
        reason: &str,
    ) -> Result<Committed<()>, KipError> {
        let run_id = {
            let mut fact = self.facts.get_mut(id).ok_or_else(|| {
                KipError::Input(InputDefect::InvalidCitation { fact_id: id.clone() })
            })?;
            fact.status = FactStatus::Rejected;
            fact.updated_at = chrono::Utc::now();
            fact.run_id
        };
        let ev = self.audit(
            run_id,
            EntityRef::Fact(id.clone()),
            AuditAction::RejectedByReview,
            actor,
            reason,
        );
        Ok(Committed {
            value: (),
            events: vec![ev],
        })
    }

    /// Mark a finding rejected (terminal, soft).
    pub fn reject_finding(
        &self,
        id: &FindingId,
        actor: &str,
        reason: &str,
    ) -> Result<Committed<()>, KipError> {
        let run_id = {
            let mut finding = self.findings.get_mut(id).ok_or_else(|| {
                KipError::Input(InputDefect::MissingField {
                    field: format!("finding {id}"),
                })
            })?;
            finding.status = FindingStatus::Rejected;
            finding.updated_at = chrono::Utc::now();
            finding.run_id
        };
        let ev = self.audit(
            run_id,
            EntityRef::Finding(id.clone()),
            AuditAction::RejectedByReview,
            actor,
            reason,
        );
        Ok(Committed {
            value: (),
            events: vec![ev],
        })
    }

    /// All appended corrections (append-only history).
    #[must_use]
    pub fn corrections(&self) -> Vec<Correction> {
        self.corrections.lock().clone()
    }

    // ── Run-scoped queries (no side cache; always the live store) ───

    /// All facts for a run.
    #[must_use]
    pub fn facts_by_run(&self, run: RunId) -> Vec<Fact> {
        self.facts
            .iter()
            .filter(|f| f.run_id == run)
            .map(|f| f.clone())
            .collect()
    }

    /// Facts for one domain within a run.
    #[must_use]
    pub fn facts_by_domain(&self, run: RunId, domain: &str) -> Vec<Fact> {
        self.facts
            .iter()
            .filter(|f| f.run_id == run && f.domain.eq_ignore_ascii_case(domain))
            .map(|f| f.clone())
            .collect()
    }

    /// All gaps for a run.
    #[must_use]
    pub fn gaps_by_run(&self, run: RunId) -> Vec<Gap> {
        self.gaps
            .iter()
            .filter(|g| g.run_id == run)
            .map(|g| g.clone())
            .collect()
    }

    /// All findings for a run.
    #[must_use]
    pub fn findings_by_run(&self, run: RunId) -> Vec<Finding> {
        self.findings
            .iter()
            .filter(|f| f.run_id == run)
            .map(|f| f.clone())
            .collect()
    }

    /// Findings of one kind (`risk`, `work_item`, ...) within a run.
    #[must_use]
    pub fn findings_by_kind(&self, run: RunId, kind: &str) -> Vec<Finding> {
        self.findings
            .iter()
            .filter(|f| f.run_id == run && f.kind.discriminant() == kind)
            .map(|f| f.clone())
            .collect()
    }

    /// All flags of a given severity within a run.
    #[must_use]
    pub fn flags_by_severity(&self, run: RunId, severity: FlagSeverity) -> Vec<Flag> {
        self.records
            .iter()
            .filter(|r| self.run_of(&r.entity) == run)
            .flat_map(|r| {
                r.flags
                    .iter()
                    .filter(|f| f.severity == severity)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Validation records currently in `state` within a run.
    #[must_use]
    pub fn records_in_state(&self, run: RunId, state: ValidationState) -> Vec<ValidationRecord> {
        self.records
            .iter()
            .filter(|r| r.state == state && self.run_of(&r.entity) == run)
            .map(|r| r.clone())
            .collect()
    }

    fn run_of(&self, entity: &EntityRef) -> RunId {
        match entity {
            EntityRef::Fact(id) => self
                .facts
                .get(id)
                .map(|f| f.run_id)
                .unwrap_or(RunId(uuid::Uuid::nil())),
            EntityRef::Gap(id) => self
                .gaps
                .get(id)
                .map(|g| g.run_id)
                .unwrap_or(RunId(uuid::Uuid::nil())),
            EntityRef::Finding(id) => self
                .findings
                .get(id)
                .map(|f| f.run_id)
                .unwrap_or(RunId(uuid::Uuid::nil())),
            EntityRef::Run(id) => *id,
            EntityRef::Correction(_) => RunId(uuid::Uuid::nil()),
        }
    }

    fn audit(
        &self,
        run_id: RunId,
        entity: EntityRef,
        action: AuditAction,
        actor: &str,
        detail: impl Into<String>,
    ) -> ChainedEvent {
        self.trail
            .append(AuditEvent::now(run_id, entity, action, actor, detail))
    }
}

fn join_ids(ids: &[FactId]) -> String {
    ids.iter()
        .map(FactId::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
