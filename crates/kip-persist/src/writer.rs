//! [`IncrementalWriter`] - the durable, idempotent entity writer.

use crate::encode::{decode_payload, encode_dt, encode_hash, encode_payload};
use crate::error::{Error, Result};
use crate::schema::SCHEMA;
use kip_core::{AnalysisRun, Correction, Fact, Finding, Gap, RunId, ValidationRecord};
use kip_store::ChainedEvent;
use rand::Rng;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Retry and backoff knobs for durable writes.
#[derive(Debug, Clone)]
pub struct PersistConfig {
    /// Attempts per write before giving up (>= 1)
    pub max_write_attempts: u32,
    /// First backoff delay
    pub backoff_base_ms: u64,
    /// Backoff ceiling
    pub backoff_cap_ms: u64,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            max_write_attempts: 3,
            backoff_base_ms: 50,
            backoff_cap_ms: 2_000,
        }
    }
}

/// Everything persisted for one run, read back for crash recovery.
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    /// The run row
    pub run: AnalysisRun,
    /// Committed facts
    pub facts: Vec<Fact>,
    /// Committed gaps
    pub gaps: Vec<Gap>,
    /// Committed findings
    pub findings: Vec<Finding>,
    /// Committed validation records
    pub records: Vec<ValidationRecord>,
    /// All corrections (corrections are global, ordered by time)
    pub corrections: Vec<Correction>,
    /// Committed audit events, in chain order
    pub events: Vec<ChainedEvent>,
}

type TxOp = Arc<
    dyn Fn(&mut rusqlite::Connection) -> std::result::Result<(), tokio_rusqlite::Error>
        + Send
        + Sync,
>;

/// Durable writer over a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted. Every write
/// is an upsert keyed by run plus the entity's stable ID and is committed -
/// together with its audit events - before the call returns. Domain-scoped
/// IDs restart per run, so the run scope is part of the durable key.
#[derive(Clone)]
pub struct IncrementalWriter {
    conn: tokio_rusqlite::Connection,
    config: PersistConfig,
}

impl IncrementalWriter {
    /// Open (or create) the durable store at `path` and run schema init.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open(path).await?;
        Self::init(conn, PersistConfig::default()).await
    }

    /// Open with explicit retry config.
    pub async fn open_with_config(
        path: impl AsRef<Path>,
        config: PersistConfig,
    ) -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open(path).await?;
        Self::init(conn, config).await
    }

    /// In-memory store - useful for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init(conn, PersistConfig::default()).await
    }

    async fn init(conn: tokio_rusqlite::Connection, config: PersistConfig) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn, config })
    }

    // ── Entity writes ───────────────────────────────────────────────

    /// Upsert the run row.
    pub async fn write_run(&self, run: &AnalysisRun) -> Result<()> {
        let run_id = run.id.to_string();
        let subject = run.subject.clone();
        let status = enum_str(&run.status)?;
        let started = encode_dt(run.started_at);
        let finished = run.finished_at.map(encode_dt);
        let payload = encode_payload(run)?;

        self.retrying(&format!("run:{run_id}"), move || {
            let (run_id, subject, status, started, finished, payload) = (
                run_id.clone(),
                subject.clone(),
                status.clone(),
                started.clone(),
                finished.clone(),
                payload.clone(),
            );
            Arc::new(move |conn: &mut rusqlite::Connection| {
                conn.execute(
                    "INSERT INTO runs (run_id, subject, status, started_at, finished_at, payload)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(run_id) DO UPDATE SET
                       status = excluded.status,
                       finished_at = excluded.finished_at,
                       payload = excluded.payload",
                    rusqlite::params![run_id, subject, status, started, finished, payload],
                )?;
                Ok(())
            })
        })
        .await
    }

    /// Upsert a fact and commit its audit events in the same transaction.
    pub async fn write_fact(&self, fact: &Fact, events: &[ChainedEvent]) -> Result<()> {
        let fact_id = fact.id.to_string();
        let run_id = fact.run_id.to_string();
        let domain = fact.domain.clone();
        let category = fact.category.clone();
        let status = enum_str(&fact.status)?;
        let updated = encode_dt(fact.updated_at);
        let payload = encode_payload(fact)?;
        let event_rows = event_rows(events)?;

        self.retrying(&format!("fact:{fact_id}"), move || {
            let (fact_id, run_id, domain, category, status, updated, payload) = (
                fact_id.clone(),
                run_id.clone(),
                domain.clone(),
                category.clone(),
                status.clone(),
                updated.clone(),
                payload.clone(),
            );
            let event_rows = event_rows.clone();
            Arc::new(move |conn: &mut rusqlite::Connection| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO facts (fact_id, run_id, domain, category, status, payload, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(run_id, fact_id) DO UPDATE SET
                       status = excluded.status,
                       payload = excluded.payload,
                       updated_at = excluded.updated_at",
                    rusqlite::params![fact_id, run_id, domain, category, status, payload, updated],
                )?;
                insert_events(&tx, &event_rows)?;
                tx.commit()?;
                Ok(())
            })
        })
        .await
    }

    /// Upsert a gap and its audit events in one transaction.
    pub async fn write_gap(&self, gap: &Gap, events: &[ChainedEvent]) -> Result<()> {
        let gap_id = gap.id.to_string();
        let run_id = gap.run_id.to_string();
        let domain = gap.domain.clone();
        let kind = enum_str(&gap.kind)?;
        let updated = encode_dt(gap.updated_at);
        let payload = encode_payload(gap)?;
        let event_rows = event_rows(events)?;

        self.retrying(&format!("gap:{gap_id}"), move || {
            let (gap_id, run_id, domain, kind, updated, payload) = (
                gap_id.clone(),
                run_id.clone(),
                domain.clone(),
                kind.clone(),
                updated.clone(),
                payload.clone(),
            );
            let event_rows = event_rows.clone();
            Arc::new(move |conn: &mut rusqlite::Connection| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO gaps (gap_id, run_id, domain, kind, payload, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(run_id, gap_id) DO UPDATE SET
                       payload = excluded.payload,
                       updated_at = excluded.updated_at",
                    rusqlite::params![gap_id, run_id, domain, kind, payload, updated],
                )?;
                insert_events(&tx, &event_rows)?;
                tx.commit()?;
                Ok(())
            })
        })
        .await
    }

    /// Upsert a finding and its audit events in one transaction.
    ///
    /// The transaction verifies every cited fact already has a committed
    /// row; a violation fails this write with `Error::CitationOrdering` and
    /// is not retried.
    pub async fn write_finding(&self, finding: &Finding, events: &[ChainedEvent]) -> Result<()> {
        let finding_id = finding.id.clone();
        let id_str = finding.id.to_string();
        let run_id = finding.run_id.to_string();
        let domain = finding.domain.clone();
        let kind = finding.kind.discriminant().to_string();
        let updated = encode_dt(finding.updated_at);
        let payload = encode_payload(finding)?;
        let citations: Vec<String> = finding.based_on_facts.iter().map(|c| c.to_string()).collect();
        let event_rows = event_rows(events)?;

        self.retrying(&format!("finding:{id_str}"), move || {
            let (id_str, run_id, domain, kind, updated, payload) = (
                id_str.clone(),
                run_id.clone(),
                domain.clone(),
                kind.clone(),
                updated.clone(),
                payload.clone(),
            );
            let finding_id = finding_id.clone();
            let citations = citations.clone();
            let event_rows = event_rows.clone();
            Arc::new(move |conn: &mut rusqlite::Connection| {
                let tx = conn.transaction()?;
                for citation in &citations {
                    let committed: bool = tx
                        .query_row(
                            "SELECT 1 FROM facts WHERE run_id = ?1 AND fact_id = ?2",
                            rusqlite::params![run_id, citation],
                            |_| Ok(true),
                        )
                        .map(|_| true)
                        .or_else(|e| match e {
                            rusqlite::Error::QueryReturnedNoRows => Ok(false),
                            other => Err(other),
                        })?;
                    if !committed {
                        let missing = citation
                            .parse()
                            .unwrap_or_else(|_| kip_core::FactId::new("unknown", 0));
                        return Err(tokio_rusqlite::Error::Other(Box::new(
                            Error::CitationOrdering {
                                finding: finding_id.clone(),
                                missing,
                            },
                        )));
                    }
                }
                tx.execute(
                    "INSERT INTO findings (finding_id, run_id, domain, kind, payload, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(run_id, finding_id) DO UPDATE SET
                       payload = excluded.payload,
                       updated_at = excluded.updated_at",
                    rusqlite::params![id_str, run_id, domain, kind, payload, updated],
                )?;
                insert_events(&tx, &event_rows)?;
                tx.commit()?;
                Ok(())
            })
        })
        .await
    }

    /// Upsert a validation record and its audit events in one transaction.
    pub async fn write_record(
        &self,
        run_id: RunId,
        record: &ValidationRecord,
        events: &[ChainedEvent],
    ) -> Result<()> {
        let entity = record.entity.to_string();
        let run_id = run_id.to_string();
        let state = enum_str(&record.state)?;
        let attempts = record.attempt_count;
        let updated = encode_dt(record.updated_at);
        let payload = encode_payload(record)?;
        let event_rows = event_rows(events)?;

        self.retrying(&format!("record:{entity}"), move || {
            let (entity, run_id, state, updated, payload) = (
                entity.clone(),
                run_id.clone(),
                state.clone(),
                updated.clone(),
                payload.clone(),
            );
            let event_rows = event_rows.clone();
            Arc::new(move |conn: &mut rusqlite::Connection| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO validation_records (entity, run_id, state, attempts, payload, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(run_id, entity) DO UPDATE SET
                       state = excluded.state,
                       attempts = excluded.attempts,
                       payload = excluded.payload,
                       updated_at = excluded.updated_at",
                    rusqlite::params![entity, run_id, state, attempts, payload, updated],
                )?;
                insert_events(&tx, &event_rows)?;
                tx.commit()?;
                Ok(())
            })
        })
        .await
    }

    /// Append a correction and its audit events in one transaction.
    pub async fn write_correction(
        &self,
        correction: &Correction,
        events: &[ChainedEvent],
    ) -> Result<()> {
        let id = correction.id.to_string();
        let entity = correction.entity.to_string();
        let actor = correction.actor.clone();
        let at = encode_dt(correction.at);
        let payload = encode_payload(correction)?;
        let event_rows = event_rows(events)?;

        self.retrying(&format!("correction:{id}"), move || {
            let (id, entity, actor, at, payload) = (
                id.clone(),
                entity.clone(),
                actor.clone(),
                at.clone(),
                payload.clone(),
            );
            let event_rows = event_rows.clone();
            Arc::new(move |conn: &mut rusqlite::Connection| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO corrections (correction_id, entity, actor, payload, recorded_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(correction_id) DO NOTHING",
                    rusqlite::params![id, entity, actor, payload, at],
                )?;
                insert_events(&tx, &event_rows)?;
                tx.commit()?;
                Ok(())
            })
        })
        .await
    }

    /// Commit audit events on their own (e.g. intake rejections that have no
    /// entity row).
    pub async fn write_events(&self, events: &[ChainedEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let event_rows = event_rows(events)?;
        let key = format!("events:{}", event_rows[0].0);
        self.retrying(&key, move || {
            let event_rows = event_rows.clone();
            Arc::new(move |conn: &mut rusqlite::Connection| {
                let tx = conn.transaction()?;
                insert_events(&tx, &event_rows)?;
                tx.commit()?;
                Ok(())
            })
        })
        .await
    }

    /// Unthrottled progress row upsert. Callers throttle via
    /// [`ProgressTracker`](crate::ProgressTracker); entity writes never wait
    /// on this.
    pub async fn write_progress(&self, run_id: RunId, done: u64, total: u64) -> Result<()> {
        let run_id = run_id.to_string();
        let at = encode_dt(chrono::Utc::now());
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO progress (run_id, done, total, updated_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(run_id) DO UPDATE SET
                       done = excluded.done,
                       total = excluded.total,
                       updated_at = excluded.updated_at",
                    rusqlite::params![run_id, done, total, at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // ── Recovery reads ──────────────────────────────────────────────

    /// Read back everything committed for `run_id`. Works from a fresh
    /// connection immediately after any write - the crash-recovery path.
    pub async fn load_run(&self, run_id: RunId) -> Result<RunSnapshot> {
        let run_str = run_id.to_string();
        let rows: LoadedRows = self
            .conn
            .call(move |conn| {
                let run: Option<String> = conn
                    .query_row(
                        "SELECT payload FROM runs WHERE run_id = ?1",
                        rusqlite::params![run_str],
                        |r| r.get(0),
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(other),
                    })?;

                let facts = select_payloads(
                    conn,
                    "SELECT payload FROM facts WHERE run_id = ?1 ORDER BY fact_id",
                    &run_str,
                )?;
                let gaps = select_payloads(
                    conn,
                    "SELECT payload FROM gaps WHERE run_id = ?1 ORDER BY gap_id",
                    &run_str,
                )?;
                let findings = select_payloads(
                    conn,
                    "SELECT payload FROM findings WHERE run_id = ?1 ORDER BY finding_id",
                    &run_str,
                )?;
                let records = select_payloads(
                    conn,
                    "SELECT payload FROM validation_records WHERE run_id = ?1 ORDER BY entity",
                    &run_str,
                )?;
                let corrections = {
                    let mut stmt = conn
                        .prepare("SELECT payload FROM corrections ORDER BY recorded_at")?;
                    let rows = stmt
                        .query_map([], |r| r.get::<_, String>(0))?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                };
                let events = select_payloads(
                    conn,
                    "SELECT payload FROM audit_events WHERE run_id = ?1 ORDER BY seq",
                    &run_str,
                )?;
                Ok((run, facts, gaps, findings, records, corrections, events))
            })
            .await?;

        let (run, facts, gaps, findings, records, corrections, events) = rows;
        let run = run.ok_or(Error::RunNotFound(run_id))?;
        Ok(RunSnapshot {
            run: decode_payload(&run)?,
            facts: decode_all(&facts)?,
            gaps: decode_all(&gaps)?,
            findings: decode_all(&findings)?,
            records: decode_all(&records)?,
            corrections: decode_all(&corrections)?,
            events: decode_all(&events)?,
        })
    }

    /// Row count in `facts` - used by write-count reconciliation tests.
    pub async fn fact_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .call(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM facts", [], |r| r.get(0))?)
            })
            .await?;
        Ok(count as u64)
    }

    /// Row count in `audit_events`.
    pub async fn event_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .call(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM audit_events", [], |r| r.get(0))?)
            })
            .await?;
        Ok(count as u64)
    }

    // ── Retry plumbing ──────────────────────────────────────────────

    /// Run `make_op()` with bounded retries and jittered exponential
    /// backoff. Only transient database errors are retried; the same
    /// idempotency key makes a retried write safe.
    async fn retrying<F>(&self, key: &str, make_op: F) -> Result<()>
    where
        F: Fn() -> TxOp,
    {
        let max = self.config.max_write_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let op = make_op();
            let result = self.conn.call(move |conn| op(conn)).await;
            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    let err = normalize(e);
                    if !err.is_transient() {
                        return Err(err);
                    }
                    if attempt >= max {
                        tracing::error!(key, attempts = attempt, error = %err, "write retries exhausted");
                        return Err(Error::RetriesExhausted {
                            key: key.to_string(),
                            attempts: attempt,
                        });
                    }
                    let delay = backoff_delay(
                        attempt,
                        self.config.backoff_base_ms,
                        self.config.backoff_cap_ms,
                    );
                    tracing::warn!(key, attempt, delay_ms = delay.as_millis() as u64, error = %err, "transient write failure; backing off");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

type LoadedRows = (
    Option<String>,
    Vec<String>,
    Vec<String>,
    Vec<String>,
    Vec<String>,
    Vec<String>,
    Vec<String>,
);

fn select_payloads(
    conn: &rusqlite::Connection,
    sql: &str,
    run_id: &str,
) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(rusqlite::params![run_id], |r| r.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn decode_all<T: serde::de::DeserializeOwned>(payloads: &[String]) -> Result<Vec<T>> {
    payloads.iter().map(|p| decode_payload(p)).collect()
}

// (event_id, seq, run_id, entity, action, prev_hash, hash, payload, at)
type EventRow = (String, i64, String, String, String, String, String, String, String);

fn event_rows(events: &[ChainedEvent]) -> Result<Vec<EventRow>> {
    events
        .iter()
        .map(|e| {
            Ok((
                e.event.event_id.to_string(),
                e.seq as i64,
                e.event.run_id.to_string(),
                e.event.entity.to_string(),
                enum_str(&e.event.action)?,
                encode_hash(&e.prev_hash),
                encode_hash(&e.hash),
                encode_payload(e)?,
                encode_dt(e.event.at),
            ))
        })
        .collect()
}

fn insert_events(tx: &rusqlite::Transaction<'_>, rows: &[EventRow]) -> rusqlite::Result<()> {
    for (event_id, seq, run_id, entity, action, prev_hash, hash, payload, at) in rows {
        tx.execute(
            "INSERT INTO audit_events (event_id, seq, run_id, entity, action, prev_hash, hash, payload, at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(event_id) DO NOTHING",
            rusqlite::params![event_id, seq, run_id, entity, action, prev_hash, hash, payload, at],
        )?;
    }
    Ok(())
}

/// Serialize a unit-variant enum to its snake_case wire name.
fn enum_str<T: serde::Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

fn normalize(e: tokio_rusqlite::Error) -> Error {
    match e {
        tokio_rusqlite::Error::Other(boxed) => match boxed.downcast::<Error>() {
            Ok(err) => *err,
            Err(boxed) => Error::Database(tokio_rusqlite::Error::Other(boxed)),
        },
        other => Error::Database(other),
    }
}

fn backoff_delay(attempt: u32, base_ms: u64, cap_ms: u64) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << (attempt - 1).min(16)).min(cap_ms);
    let jitter = rand::rng().random_range(0..=exp / 2);
    Duration::from_millis(exp + jitter)
}
