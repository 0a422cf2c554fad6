//! Run orchestration.
//!
//! Domain producers run concurrently under the bounded pool; each batch is
//! category-checked and persisted the moment it lands. Cross-domain
//! validation and adversarial review wait behind a barrier until every
//! domain producer is terminal - they read the whole run, so a late
//! producer would invalidate them.

use crate::config::PipelineConfig;
use crate::coordinator::{ReextractionCoordinator, Resolution};
use crate::generate::{admit_fact, admit_finding, CandidateFact, Generator};
use crate::producer::ProducerPool;
use crate::review::HumanReviewQueue;
use kip_core::{
    AnalysisRun, ConfigError, EntityRef, Fact, FactId, Flag, FlagSeverity, InfraError, KipError,
    RunId, RunStatus, ValidationState,
};
use kip_persist::{IncrementalWriter, ProgressTracker};
use kip_store::{ChainedEvent, FactAcceptance, FindingAcceptance, KnowledgeStore};
use kip_validate::{
    AdversarialReviewer, CategoryExpectation, CategoryValidator, CitationValidator,
    CrossDomainValidator, DomainRule, DomainValidator,
};
use std::collections::HashMap;
use std::sync::Arc;

/// One domain's work order.
#[derive(Debug, Clone)]
pub struct DomainJob {
    /// Subject-matter domain, e.g. `network`
    pub domain: String,
    /// Source documents handed to the generator
    pub document_refs: Vec<String>,
}

impl DomainJob {
    /// Work order for `domain` over `document_refs`.
    #[must_use]
    pub fn new(domain: &str, document_refs: Vec<String>) -> Self {
        Self {
            domain: domain.to_string(),
            document_refs,
        }
    }
}

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// The run row, with its terminal status
    pub run: AnalysisRun,
    /// Facts committed (updates and duplicates count once)
    pub facts: usize,
    /// Findings committed
    pub findings: usize,
    /// Gaps recorded (conflicts included)
    pub gaps: usize,
    /// Candidates rejected synchronously at intake
    pub rejected_at_intake: usize,
    /// Items escalated to human review
    pub escalated: usize,
    /// Flags raised across all validation layers
    pub flags: usize,
    /// Domains whose producer failed outright
    pub failed_domains: Vec<String>,
}

#[derive(Debug, Default)]
struct DomainOutcome {
    domain: String,
    facts: usize,
    findings: usize,
    rejected: usize,
    escalated: usize,
    flags: usize,
    failed: Option<String>,
    storage_failed: bool,
}

/// Drives one analysis run end to end.
pub struct PipelineRunner {
    config: PipelineConfig,
    store: Arc<KnowledgeStore>,
    generator: Arc<dyn Generator>,
    writer: IncrementalWriter,
    queue: Arc<HumanReviewQueue>,
    pool: ProducerPool,
    category: CategoryValidator,
    domain: DomainValidator,
    cross: CrossDomainValidator,
    citation: CitationValidator,
    adversarial: AdversarialReviewer,
}

impl PipelineRunner {
    /// Build a runner, validating the whole configuration up front.
    ///
    /// # Errors
    /// `ConfigError` for any misconfiguration - including a citation
    /// validator without a store, which must never degrade to pass-through.
    pub fn new(
        config: PipelineConfig,
        store: Arc<KnowledgeStore>,
        generator: Arc<dyn Generator>,
        writer: IncrementalWriter,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let category = CategoryValidator::new(config.category_expectations.clone())?;
        let domain = DomainValidator::new(config.domain_expectations.clone());
        let cross = CrossDomainValidator::new(config.ratio_bounds.clone())?;
        let citation =
            CitationValidator::new(Some(Arc::clone(&store)), config.citation_mode)?;
        let adversarial = AdversarialReviewer::new(config.adversarial.clone());
        let queue = Arc::new(HumanReviewQueue::new(Arc::clone(&store)));
        let pool = ProducerPool::new(config.max_producers, config.generation_timeout);
        Ok(Self {
            config,
            store,
            generator,
            writer,
            queue,
            pool,
            category,
            domain,
            cross,
            citation,
            adversarial,
        })
    }

    /// Register a domain-specific consistency rule.
    #[must_use]
    pub fn with_domain_rule(mut self, rule: Box<dyn DomainRule>) -> Self {
        self.domain = self.domain.with_rule(rule);
        self
    }

    /// The review queue; reviewer surfaces hold this and call it whenever,
    /// including after the run completes.
    #[must_use]
    pub fn queue(&self) -> Arc<HumanReviewQueue> {
        Arc::clone(&self.queue)
    }

    /// The live store; read paths query it directly, scoped by run.
    #[must_use]
    pub fn store(&self) -> Arc<KnowledgeStore> {
        Arc::clone(&self.store)
    }

    /// Execute one run over the given domains.
    ///
    /// # Errors
    /// `InfraError::StorageWrite` when the run row itself cannot be
    /// created. Later storage failures mark the run `Failed` instead;
    /// everything committed before the failure stays readable.
    pub async fn execute(
        &self,
        subject: &str,
        jobs: Vec<DomainJob>,
    ) -> Result<RunReport, KipError> {
        let run = AnalysisRun::start(
            subject,
            jobs.iter().map(|j| j.domain.clone()).collect(),
        );
        tracing::info!(run = %run.id, subject, domains = jobs.len(), "run started");
        self.writer
            .write_run(&run)
            .await
            .map_err(|e| InfraError::StorageWrite(e.to_string()))?;
        let opened = self.store.begin_run(run.id);
        self.persist_events(&opened.events).await;
        self.drive(run, jobs).await
    }

    /// Resume a run that crashed mid-flight: hydrate the store from the rows
    /// the crashed process committed, then drive the run again under its
    /// original ID. Entity writes are idempotent within a run, so replaying
    /// already-committed work converges on the same rows.
    ///
    /// # Errors
    /// `InfraError::StorageRead` when the run cannot be read back,
    /// `InfraError::StorageWrite` when its row cannot be reopened.
    pub async fn resume(
        &self,
        run_id: RunId,
        jobs: Vec<DomainJob>,
    ) -> Result<RunReport, KipError> {
        let snapshot = self
            .writer
            .load_run(run_id)
            .await
            .map_err(|e| InfraError::StorageRead(e.to_string()))?;
        tracing::info!(
            run = %run_id,
            facts = snapshot.facts.len(),
            findings = snapshot.findings.len(),
            "resuming crashed run"
        );
        // Order matters: records overwrite the defaults the entity restores
        // create, and allocator reseeding must precede any new intake.
        for fact in snapshot.facts {
            self.store.restore_fact(fact);
        }
        for gap in snapshot.gaps {
            self.store.restore_gap(gap);
        }
        for finding in snapshot.findings {
            self.store.restore_finding(finding);
        }
        for record in snapshot.records {
            self.store.restore_record(record);
        }
        for correction in snapshot.corrections {
            self.store.restore_correction(correction);
        }

        let mut run = snapshot.run;
        run.status = RunStatus::Running;
        run.finished_at = None;
        self.writer
            .write_run(&run)
            .await
            .map_err(|e| InfraError::StorageWrite(e.to_string()))?;
        let noted = self.store.note_run_status(run.id, "running");
        self.persist_events(&noted.events).await;
        self.drive(run, jobs).await
    }

    async fn drive(
        &self,
        mut run: AnalysisRun,
        jobs: Vec<DomainJob>,
    ) -> Result<RunReport, KipError> {
        let tracker = ProgressTracker::new(self.writer.clone(), run.id, jobs.len() as u64);

        // Every producer must be terminal before the cross-domain layers run.
        let outcomes = futures::future::join_all(
            jobs.iter().map(|job| self.run_domain(run.id, job, &tracker)),
        )
        .await;

        let mut flags = outcomes.iter().map(|o| o.flags).sum::<usize>();
        for job in &jobs {
            let facts = self.store.facts_by_domain(run.id, &job.domain);
            let domain_flags = self.domain.validate_domain(&job.domain, &facts);
            flags += self.attach_flags(run.id, domain_flags).await;
        }

        let all_facts = self.store.facts_by_run(run.id);
        flags += self
            .attach_flags(run.id, self.cross.validate_run(run.id, &all_facts))
            .await;
        let source_volume: HashMap<String, usize> = jobs
            .iter()
            .map(|j| (j.domain.clone(), j.document_refs.len()))
            .collect();
        flags += self
            .attach_flags(
                run.id,
                self.adversarial.review(run.id, &all_facts, &source_volume),
            )
            .await;

        let storage_failed = outcomes.iter().any(|o| o.storage_failed);
        let failed_domains: Vec<String> = outcomes
            .iter()
            .filter(|o| o.failed.is_some())
            .map(|o| o.domain.clone())
            .collect();
        let escalated = outcomes.iter().map(|o| o.escalated).sum::<usize>();

        let status = if storage_failed {
            RunStatus::Failed
        } else if !failed_domains.is_empty() || escalated > 0 {
            RunStatus::PartiallyCompleted
        } else {
            RunStatus::Completed
        };
        run.finish(status);
        let status_name = serde_json::to_value(status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("{status:?}"));
        let noted = self.store.note_run_status(run.id, &status_name);
        self.persist_events(&noted.events).await;
        if let Err(e) = self.writer.write_run(&run).await {
            tracing::error!(run = %run.id, error = %e, "failed to persist terminal run status");
        }
        // Sweep: audit events are DO NOTHING upserts, so re-sending the
        // whole trail is safe and catches intake rejections that had no
        // entity write of their own.
        self.persist_events(&self.store.trail().events()).await;
        if let Err(e) = tracker.finish().await {
            tracing::warn!(run = %run.id, error = %e, "final progress flush failed");
        }

        tracing::info!(run = %run.id, ?status, escalated, flags, "run finished");
        Ok(RunReport {
            facts: outcomes.iter().map(|o| o.facts).sum(),
            findings: outcomes.iter().map(|o| o.findings).sum(),
            gaps: self.store.gaps_by_run(run.id).len(),
            rejected_at_intake: outcomes.iter().map(|o| o.rejected).sum(),
            escalated,
            flags,
            failed_domains,
            run,
        })
    }

    async fn run_domain(
        &self,
        run: RunId,
        job: &DomainJob,
        tracker: &ProgressTracker,
    ) -> DomainOutcome {
        let mut outcome = DomainOutcome {
            domain: job.domain.clone(),
            ..Default::default()
        };

        let batch = match self
            .pool
            .generate(self.generator.as_ref(), &job.domain, &job.document_refs)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(domain = %job.domain, error = %e, "domain producer failed");
                outcome.failed = Some(e.to_string());
                if let Err(e) = tracker.item_done().await {
                    tracing::warn!(error = %e, "progress update failed");
                }
                return outcome;
            }
        };

        // Preserve arrival order while grouping into category batches.
        let mut by_category: Vec<(String, Vec<CandidateFact>)> = Vec::new();
        for candidate in batch.facts {
            match by_category
                .iter_mut()
                .find(|(c, _)| *c == candidate.category)
            {
                Some((_, group)) => group.push(candidate),
                None => by_category.push((candidate.category.clone(), vec![candidate])),
            }
        }

        for (category, candidates) in by_category {
            if self
                .run_category(run, job, &category, candidates, &mut outcome)
                .await
                .is_err()
            {
                outcome.storage_failed = true;
                return outcome;
            }
        }

        for candidate in batch.findings {
            let finding = admit_finding(&self.store, run, &job.domain, candidate);
            match self.citation.validate_citations(&finding.based_on_facts) {
                Ok(report) => {
                    tracing::debug!(finding = %finding.id, rate = report.rate, "citations checked");
                }
                Err(e) => {
                    tracing::warn!(finding = %finding.id, error = %e, "citation validation failed");
                }
            }
            match self.store.put_finding(finding, self.config.citation_mode) {
                Ok(committed) => {
                    let (id, clean) = match &committed.value {
                        FindingAcceptance::Accepted { id } => (id.clone(), true),
                        FindingAcceptance::AcceptedWithFlags { id, flags } => {
                            outcome.flags += flags.len();
                            (id.clone(), false)
                        }
                    };
                    let Some(stored) = self.store.get_finding(&id) else {
                        continue;
                    };
                    if self.writer.write_finding(&stored, &committed.events).await.is_err() {
                        outcome.storage_failed = true;
                        return outcome;
                    }
                    let entity = EntityRef::Finding(id);
                    if clean {
                        match self.store.transition_record(
                            &entity,
                            ValidationState::AiValidated,
                            "validator:citation",
                            "all citations resolved",
                        ) {
                            Ok(c) => self.persist_record(run, &entity, &c.events).await,
                            Err(e) => tracing::warn!(%entity, error = %e, "transition failed"),
                        }
                    }
                    outcome.findings += 1;
                }
                Err(e) => {
                    tracing::warn!(domain = %job.domain, error = %e, "finding rejected at intake");
                    outcome.rejected += 1;
                }
            }
        }

        if let Err(e) = tracker.item_done().await {
            tracing::warn!(error = %e, "progress update failed");
        }
        outcome
    }

    /// Intake, checkpoint, and resolution for one category batch. A storage
    /// error aborts the domain; everything committed so far stays readable.
    async fn run_category(
        &self,
        run: RunId,
        job: &DomainJob,
        category: &str,
        candidates: Vec<CandidateFact>,
        outcome: &mut DomainOutcome,
    ) -> Result<(), ()> {
        let mut committed_ids: Vec<FactId> = Vec::new();
        for candidate in candidates {
            let fact = match admit_fact(&self.store, run, &job.domain, candidate) {
                Ok(fact) => fact,
                Err(e) => {
                    tracing::warn!(domain = %job.domain, category, error = %e, "candidate rejected at intake");
                    outcome.rejected += 1;
                    continue;
                }
            };
            match self.store.put_fact(fact) {
                Ok(committed) => {
                    let (id, conflict_gap) = match &committed.value {
                        FactAcceptance::Accepted { id, .. } => (id.clone(), None),
                        FactAcceptance::Duplicate { kept, .. } => (kept.clone(), None),
                        FactAcceptance::Conflict { id, gap_id } => {
                            (id.clone(), Some(gap_id.clone()))
                        }
                    };
                    if let Some(stored) = self.store.get_fact(&id) {
                        if self.writer.write_fact(&stored, &committed.events).await.is_err() {
                            return Err(());
                        }
                        outcome.facts += 1;
                    }
                    if let Some(gap_id) = conflict_gap {
                        if let Some(gap) = self.store.get_gap(&gap_id) {
                            if self.writer.write_gap(&gap, &[]).await.is_err() {
                                return Err(());
                            }
                        }
                    }
                    if !committed_ids.contains(&id) {
                        committed_ids.push(id);
                    }
                }
                Err(e) => {
                    tracing::warn!(domain = %job.domain, category, error = %e, "fact rejected at intake");
                    outcome.rejected += 1;
                }
            }
        }

        let facts: Vec<Fact> = committed_ids
            .iter()
            .filter_map(|id| self.store.get_fact(id))
            .collect();
        let flags = self.category.validate_batch(category, &facts);
        outcome.flags += flags.len();

        let mut failing: Vec<FactId> = Vec::new();
        for (entity, group) in group_by_entity(flags) {
            let has_error = group.iter().any(|f| f.severity >= FlagSeverity::Error);
            let committed = self.store.add_flags(&entity, group);
            self.persist_record(run, &entity, &committed.events).await;
            if has_error {
                if let EntityRef::Fact(id) = entity {
                    failing.push(id);
                }
            }
        }

        for id in &committed_ids {
            let entity = EntityRef::Fact(id.clone());
            if self.store.record(&entity).map(|r| r.state)
                == Some(ValidationState::Extracted)
            {
                match self.store.transition_record(
                    &entity,
                    ValidationState::AiValidated,
                    "validator:category",
                    "category checkpoint",
                ) {
                    Ok(c) => self.persist_record(run, &entity, &c.events).await,
                    Err(e) => tracing::warn!(%entity, error = %e, "transition failed"),
                }
            }
        }

        if failing.is_empty() {
            return Ok(());
        }
        let coordinator = ReextractionCoordinator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.queue),
            self.config.max_reextract_attempts,
            self.config.backoff_base_ms,
            self.config.backoff_cap_ms,
        )
        .with_writer(self.writer.clone());
        let expectation = self.category.expectation(category).cloned();
        let revalidate =
            move |fact: &Fact| required_field_flags(expectation.as_ref(), fact);
        for id in failing {
            match coordinator
                .resolve(
                    self.generator.as_ref(),
                    &self.pool,
                    &id,
                    "category validation failed",
                    &revalidate,
                )
                .await
            {
                Ok(Resolution::Escalated { .. }) => outcome.escalated += 1,
                Ok(Resolution::Revalidated { .. }) => {}
                Err(e) if matches!(e, KipError::Infra(_)) => return Err(()),
                Err(e) => {
                    tracing::warn!(fact = %id, error = %e, "re-extraction aborted");
                }
            }
        }
        Ok(())
    }

    /// Attach validator flags to their entities and persist the records.
    /// Returns how many flags were raised.
    async fn attach_flags(&self, run: RunId, flags: Vec<Flag>) -> usize {
        let mut count = 0;
        for (entity, group) in group_by_entity(flags) {
            count += group.len();
            let committed = self.store.add_flags(&entity, group);
            self.persist_record(run, &entity, &committed.events).await;
        }
        count
    }

    async fn persist_record(&self, run: RunId, entity: &EntityRef, events: &[ChainedEvent]) {
        if let Some(record) = self.store.record(entity) {
            if let Err(e) = self.writer.write_record(run, &record, events).await {
                tracing::error!(%entity, error = %e, "record persist failed");
            }
        } else if let Err(e) = self.writer.write_events(events).await {
            tracing::error!(%entity, error = %e, "event persist failed");
        }
    }

    async fn persist_events(&self, events: &[ChainedEvent]) {
        if let Err(e) = self.writer.write_events(events).await {
            tracing::error!(error = %e, "event persist failed");
        }
    }
}

fn group_by_entity(flags: Vec<Flag>) -> Vec<(EntityRef, Vec<Flag>)> {
    let mut groups: Vec<(EntityRef, Vec<Flag>)> = Vec::new();
    for flag in flags {
        match groups.iter_mut().find(|(e, _)| *e == flag.entity) {
            Some((_, group)) => group.push(flag),
            None => groups.push((flag.entity.clone(), vec![flag])),
        }
    }
    groups
}

/// Re-check only the required-field half of a category expectation; item
/// counts are batch properties a single regenerated fact cannot change.
fn required_field_flags(expectation: Option<&CategoryExpectation>, fact: &Fact) -> Vec<Flag> {
    let Some(expectation) = expectation else {
        return Vec::new();
    };
    expectation
        .required_fields
        .iter()
        .filter(|field| {
            !fact
                .details
                .get(field.as_str())
                .map(|v| match v {
                    serde_json::Value::String(s) => !s.trim().is_empty(),
                    serde_json::Value::Null => false,
                    _ => true,
                })
                .unwrap_or(false)
        })
        .map(|field| {
            Flag::new(
                "missing_required_field",
                FlagSeverity::Error,
                format!("fact {} is missing required field `{field}`", fact.id),
                EntityRef::Fact(fact.id.clone()),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::{CandidateFinding, GeneratedBatch, Generator};
    use async_trait::async_trait;
    use kip_core::{FactStatus, FindingKind, Severity};
    use std::time::Duration;

    /// Emits two clean facts and one finding per domain.
    struct CleanGenerator;

    #[async_trait]
    impl Generator for CleanGenerator {
        async fn generate(
            &self,
            domain: &str,
            _document_refs: &[String],
        ) -> Result<GeneratedBatch, KipError> {
            let fact = |item: &str| CandidateFact {
                category: "assets".into(),
                entity: "primary".into(),
                item: item.into(),
                details: serde_json::Map::new(),
                status: FactStatus::Documented,
                source_doc: format!("{domain}-inventory.pdf"),
                quote: format!("{item} listed in the asset register"),
                confidence: 0.9,
            };
            Ok(GeneratedBatch {
                facts: vec![fact("primary server"), fact("backup appliance")],
                findings: vec![],
            })
        }

        async fn regenerate(
            &self,
            _hint: &FactId,
            _context: &str,
        ) -> Result<Vec<CandidateFact>, KipError> {
            Ok(Vec::new())
        }
    }

    async fn runner(config: PipelineConfig) -> PipelineRunner {
        let store = Arc::new(KnowledgeStore::new());
        let writer = IncrementalWriter::open_in_memory().await.unwrap();
        PipelineRunner::new(config, store, Arc::new(CleanGenerator), writer).unwrap()
    }

    #[tokio::test]
    async fn clean_run_completes() {
        let runner = runner(PipelineConfig::default()).await;
        let report = runner
            .execute(
                "acme",
                vec![
                    DomainJob::new("network", vec!["net.pdf".into()]),
                    DomainJob::new("hr", vec!["hr.pdf".into()]),
                ],
            )
            .await
            .unwrap();
        assert_eq!(report.run.status, RunStatus::Completed);
        assert_eq!(report.facts, 4);
        assert_eq!(report.escalated, 0);
        assert!(report.failed_domains.is_empty());
    }

    #[tokio::test]
    async fn hung_domain_is_partial_not_fatal() {
        struct HangingGenerator;
        #[async_trait]
        impl Generator for HangingGenerator {
            async fn generate(
                &self,
                domain: &str,
                _document_refs: &[String],
            ) -> Result<GeneratedBatch, KipError> {
                if domain == "network" {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                Ok(GeneratedBatch::default())
            }
            async fn regenerate(
                &self,
                _hint: &FactId,
                _context: &str,
            ) -> Result<Vec<CandidateFact>, KipError> {
                Ok(Vec::new())
            }
        }

        let store = Arc::new(KnowledgeStore::new());
        let writer = IncrementalWriter::open_in_memory().await.unwrap();
        let config = PipelineConfig {
            generation_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let runner =
            PipelineRunner::new(config, store, Arc::new(HangingGenerator), writer).unwrap();
        let report = runner
            .execute(
                "acme",
                vec![
                    DomainJob::new("network", vec![]),
                    DomainJob::new("hr", vec![]),
                ],
            )
            .await
            .unwrap();
        assert_eq!(report.run.status, RunStatus::PartiallyCompleted);
        assert_eq!(report.failed_domains, vec!["network".to_string()]);
    }

    #[tokio::test]
    async fn finding_citing_earlier_fact_is_stored() {
        struct FactAndFinding;
        #[async_trait]
        impl Generator for FactAndFinding {
            async fn generate(
                &self,
                _domain: &str,
                _document_refs: &[String],
            ) -> Result<GeneratedBatch, KipError> {
                Ok(GeneratedBatch {
                    facts: vec![CandidateFact {
                        category: "firewalls".into(),
                        entity: "primary".into(),
                        item: "ASA 5516".into(),
                        details: serde_json::Map::new(),
                        status: FactStatus::Documented,
                        source_doc: "audit.pdf".into(),
                        quote: "a single ASA 5516".into(),
                        confidence: 0.9,
                    }],
                    findings: vec![CandidateFinding {
                        kind: FindingKind::Risk {
                            severity: Severity::High,
                            likelihood: 0.6,
                        },
                        title: "single firewall".into(),
                        rationale: "no failover pair".into(),
                        cites: vec![FactId::new("network", 1)],
                    }],
                })
            }
            async fn regenerate(
                &self,
                _hint: &FactId,
                _context: &str,
            ) -> Result<Vec<CandidateFact>, KipError> {
                Ok(Vec::new())
            }
        }

        let store = Arc::new(KnowledgeStore::new());
        let writer = IncrementalWriter::open_in_memory().await.unwrap();
        let runner = PipelineRunner::new(
            PipelineConfig::default(),
            Arc::clone(&store),
            Arc::new(FactAndFinding),
            writer,
        )
        .unwrap();
        let report = runner
            .execute("acme", vec![DomainJob::new("network", vec![])])
            .await
            .unwrap();
        assert_eq!(report.findings, 1);
        assert_eq!(store.findings_by_kind(report.run.id, "risk").len(), 1);
    }
}
