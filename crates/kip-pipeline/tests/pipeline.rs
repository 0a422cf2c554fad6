//! End-to-end pipeline scenarios: conflict gaps, citation rejection,
//! escalation, crash recovery and concurrent producers.

use async_trait::async_trait;
use kip_core::{
    AnalysisRun, FactId, FactStatus, FindingKind, GapKind, KipError, RunStatus, Severity,
    ValidationState,
};
use kip_persist::IncrementalWriter;
use kip_pipeline::{
    CandidateFact, CandidateFinding, DomainJob, GeneratedBatch, Generator, PipelineConfig,
    PipelineRunner, QueueFilter,
};
use kip_store::KnowledgeStore;
use kip_validate::CategoryExpectation;
use std::collections::HashMap;
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn candidate(category: &str, entity: &str, item: &str) -> CandidateFact {
    CandidateFact {
        category: category.into(),
        entity: entity.into(),
        item: item.into(),
        details: serde_json::Map::new(),
        status: FactStatus::Documented,
        source_doc: "contract-dataroom.pdf".into(),
        quote: format!("{item} appears in the inventory appendix"),
        confidence: 0.9,
    }
}

fn with_detail(mut c: CandidateFact, key: &str, value: serde_json::Value) -> CandidateFact {
    c.details.insert(key.into(), value);
    c
}

/// Scripted generator: fixed batches per domain, fixed regeneration output.
struct Scripted {
    batches: HashMap<String, GeneratedBatch>,
    regenerated: Vec<CandidateFact>,
}

impl Scripted {
    fn new() -> Self {
        Self {
            batches: HashMap::new(),
            regenerated: Vec::new(),
        }
    }

    fn domain(mut self, domain: &str, batch: GeneratedBatch) -> Self {
        self.batches.insert(domain.to_string(), batch);
        self
    }
}

#[async_trait]
impl Generator for Scripted {
    async fn generate(
        &self,
        domain: &str,
        _document_refs: &[String],
    ) -> Result<GeneratedBatch, KipError> {
        Ok(self.batches.get(domain).cloned().unwrap_or_default())
    }

    async fn regenerate(
        &self,
        _hint: &FactId,
        _context: &str,
    ) -> Result<Vec<CandidateFact>, KipError> {
        Ok(self.regenerated.clone())
    }
}

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        backoff_base_ms: 1,
        backoff_cap_ms: 2,
        ..Default::default()
    }
}

async fn run_pipeline(
    config: PipelineConfig,
    generator: Scripted,
    jobs: Vec<DomainJob>,
) -> (Arc<KnowledgeStore>, PipelineRunner, kip_pipeline::RunReport) {
    init_tracing();
    let store = Arc::new(KnowledgeStore::new());
    let writer = IncrementalWriter::open_in_memory().await.unwrap();
    let runner =
        PipelineRunner::new(config, Arc::clone(&store), Arc::new(generator), writer).unwrap();
    let report = runner.execute("acme", jobs).await.unwrap();
    (store, runner, report)
}

#[tokio::test]
async fn conflicting_parties_emit_a_gap_not_a_silent_drop() {
    let generator = Scripted::new().domain(
        "a",
        GeneratedBatch {
            facts: vec![
                with_detail(
                    candidate("erp", "primary", "X"),
                    "version",
                    serde_json::json!("11"),
                ),
                with_detail(
                    candidate("erp", "counterparty", "X"),
                    "version",
                    serde_json::json!("12"),
                ),
            ],
            findings: vec![],
        },
    );
    let (store, _runner, report) =
        run_pipeline(fast_config(), generator, vec![DomainJob::new("a", vec![])]).await;

    // Both versions stored, plus the conflict gap linking them.
    assert_eq!(report.facts, 2);
    let gaps = store.gaps_by_run(report.run.id);
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0].kind, GapKind::Conflict);
    assert_eq!(
        gaps[0].related_facts,
        vec![FactId::new("a", 1), FactId::new("a", 2)]
    );
}

#[tokio::test]
async fn nonexistent_citation_rejected_and_invisible() {
    let generator = Scripted::new().domain(
        "x",
        GeneratedBatch {
            facts: vec![candidate("assets", "primary", "mainframe")],
            findings: vec![CandidateFinding {
                kind: FindingKind::Risk {
                    severity: Severity::Critical,
                    likelihood: 0.9,
                },
                title: "phantom dependency".into(),
                rationale: "cites a fact nobody extracted".into(),
                cites: vec![FactId::new("x", 999)],
            }],
        },
    );
    let (store, _runner, report) =
        run_pipeline(fast_config(), generator, vec![DomainJob::new("x", vec![])]).await;

    assert_eq!(report.findings, 0);
    assert_eq!(report.rejected_at_intake, 1);
    assert!(store.findings_by_kind(report.run.id, "risk").is_empty());
}

#[tokio::test]
async fn three_strikes_escalates_with_exact_attempt_count() {
    let config = PipelineConfig {
        max_reextract_attempts: 3,
        category_expectations: vec![
            CategoryExpectation::new("firewalls", 0, 10).require_field("version")
        ],
        ..fast_config()
    };
    // The regenerated candidate still lacks the required field, every time.
    let mut generator = Scripted::new().domain(
        "network",
        GeneratedBatch {
            facts: vec![candidate("firewalls", "primary", "ASA 5516")],
            findings: vec![],
        },
    );
    generator.regenerated = vec![candidate("firewalls", "primary", "ASA 5516")];

    let (store, runner, report) = run_pipeline(
        config,
        generator,
        vec![DomainJob::new("network", vec!["net.pdf".into()])],
    )
    .await;

    assert_eq!(report.escalated, 1);
    assert_eq!(report.run.status, RunStatus::PartiallyCompleted);

    let pending = runner.queue().list_pending(&QueueFilter::all());
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].record.attempt_count, 3);
    assert_eq!(pending[0].record.state, ValidationState::HumanPending);

    // The flagged fact is still stored and queryable with its flags.
    let facts = store.facts_by_domain(report.run.id, "network");
    assert_eq!(facts.len(), 1);
}

#[tokio::test]
async fn replaying_a_crashed_run_converges() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kip.db");

    // First process: the run row and one of two facts reach the database,
    // then the process dies before the second fact and the terminal status.
    let run = AnalysisRun::start("acme", vec!["network".into()]);
    {
        let store = KnowledgeStore::new();
        let writer = IncrementalWriter::open(&path).await.unwrap();
        writer.write_run(&run).await.unwrap();
        let fact =
            kip_test_utils::fact_with_run(&store, run.id, "network", "assets", "core switch", 0.9);
        let committed = store.put_fact(fact.clone()).unwrap();
        let stored = store.get_fact(&fact.id).unwrap();
        writer.write_fact(&stored, &committed.events).await.unwrap();
    }

    // Second process: same run ID, full generator output. The replayed fact
    // must merge with the restored one instead of colliding with its row.
    let generator = Scripted::new().domain(
        "network",
        GeneratedBatch {
            facts: vec![
                candidate("assets", "primary", "core switch"),
                candidate("assets", "primary", "edge router"),
            ],
            findings: vec![],
        },
    );
    let store = Arc::new(KnowledgeStore::new());
    let writer = IncrementalWriter::open(&path).await.unwrap();
    let runner = PipelineRunner::new(
        fast_config(),
        Arc::clone(&store),
        Arc::new(generator),
        writer.clone(),
    )
    .unwrap();
    let report = runner
        .resume(run.id, vec![DomainJob::new("network", vec!["net.pdf".into()])])
        .await
        .unwrap();

    assert_eq!(report.run.id, run.id);
    assert_eq!(report.run.status, RunStatus::Completed);
    assert_eq!(store.facts_by_run(run.id).len(), 2);

    let snapshot = writer.load_run(run.id).await.unwrap();
    assert_eq!(snapshot.run.status, RunStatus::Completed);
    assert_eq!(snapshot.facts.len(), 2);
    let items: Vec<&str> = snapshot.facts.iter().map(|f| f.item.as_str()).collect();
    assert!(items.contains(&"core switch"));
    assert!(items.contains(&"edge router"));
    // The fact committed before the crash kept its identity.
    assert!(snapshot.facts.iter().any(|f| f.id == FactId::new("network", 1)));
}

#[tokio::test]
async fn crash_resume_reads_everything_back() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kip.db");

    let generator = Scripted::new().domain(
        "network",
        GeneratedBatch {
            facts: vec![
                candidate("assets", "primary", "core switch"),
                candidate("assets", "primary", "edge router"),
            ],
            findings: vec![CandidateFinding {
                kind: FindingKind::WorkItem {
                    phase: "day-one".into(),
                    effort_days: 3.0,
                },
                title: "inventory reconciliation".into(),
                rationale: "switch and router configs need export".into(),
                cites: vec![FactId::new("network", 1), FactId::new("network", 2)],
            }],
        },
    );

    let store = Arc::new(KnowledgeStore::new());
    let writer = IncrementalWriter::open(&path).await.unwrap();
    let runner = PipelineRunner::new(
        fast_config(),
        Arc::clone(&store),
        Arc::new(generator),
        writer,
    )
    .unwrap();
    let report = runner
        .execute("acme", vec![DomainJob::new("network", vec!["net.pdf".into()])])
        .await
        .unwrap();
    assert_eq!(report.run.status, RunStatus::Completed);
    drop(runner);
    drop(store);

    // A fresh connection - the crash-recovery path - sees the full run.
    let reopened = IncrementalWriter::open(&path).await.unwrap();
    let snapshot = reopened.load_run(report.run.id).await.unwrap();
    assert_eq!(snapshot.run.status, RunStatus::Completed);
    assert_eq!(snapshot.facts.len(), 2);
    assert_eq!(snapshot.findings.len(), 1);
    assert!(!snapshot.events.is_empty());

    // Replaying a write after the "crash" converges to the same row count.
    let before = reopened.fact_count().await.unwrap();
    reopened.write_fact(&snapshot.facts[0], &[]).await.unwrap();
    assert_eq!(reopened.fact_count().await.unwrap(), before);
}

#[tokio::test]
async fn disjoint_shards_lose_no_writes() {
    init_tracing();
    let fact_batch = |category: &str, items: &[&str]| GeneratedBatch {
        facts: items
            .iter()
            .map(|item| candidate(category, "primary", item))
            .collect(),
        findings: vec![],
    };
    let generator = Scripted::new()
        .domain("network", fact_batch("switches", &["nexus", "catalyst", "arista"]))
        .domain("hr", fact_batch("roles", &["cto", "dba", "netops"]))
        .domain("legal", fact_batch("contracts", &["msa", "dpa", "sla"]));

    let store = Arc::new(KnowledgeStore::new());
    let writer = IncrementalWriter::open_in_memory().await.unwrap();
    let runner = PipelineRunner::new(
        fast_config(),
        Arc::clone(&store),
        Arc::new(generator),
        writer.clone(),
    )
    .unwrap();
    let report = runner
        .execute(
            "acme",
            vec![
                DomainJob::new("network", vec![]),
                DomainJob::new("hr", vec![]),
                DomainJob::new("legal", vec![]),
            ],
        )
        .await
        .unwrap();

    // Write-count reconciliation: in-memory, durable and report all agree.
    assert_eq!(report.facts, 9);
    assert_eq!(store.facts_by_run(report.run.id).len(), 9);
    assert_eq!(writer.fact_count().await.unwrap(), 9);
    for domain in ["network", "hr", "legal"] {
        assert_eq!(store.facts_by_domain(report.run.id, domain).len(), 3);
    }
    store.trail().verify_integrity().unwrap();
}

#[tokio::test]
async fn reviewer_decisions_work_after_run_completion() {
    let config = PipelineConfig {
        max_reextract_attempts: 2,
        category_expectations: vec![
            CategoryExpectation::new("firewalls", 0, 10).require_field("version")
        ],
        ..fast_config()
    };
    let mut generator = Scripted::new().domain(
        "network",
        GeneratedBatch {
            facts: vec![candidate("firewalls", "primary", "ASA 5516")],
            findings: vec![],
        },
    );
    generator.regenerated = vec![candidate("firewalls", "primary", "ASA 5516")];

    let (store, runner, report) = run_pipeline(
        config,
        generator,
        vec![DomainJob::new("network", vec![])],
    )
    .await;
    assert_eq!(report.escalated, 1);

    // The automated pipeline is long done; the reviewer acts now.
    let queue = runner.queue();
    let pending = queue.list_pending(&QueueFilter::all().run(report.run.id));
    let entity = pending[0].entity.clone();
    queue
        .correct(
            &entity,
            "details.version",
            serde_json::json!("9.12"),
            "reviewer@acme",
            "version confirmed by vendor call",
        )
        .unwrap();

    assert_eq!(store.corrections().len(), 1);
    assert_eq!(
        store.record(&entity).unwrap().state,
        ValidationState::Corrected
    );
    assert!(queue.list_pending(&QueueFilter::all()).is_empty());
}
