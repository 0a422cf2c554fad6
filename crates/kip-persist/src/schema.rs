//! SQL schema for the KIP durable store.
//!
//! One table per entity type, each row addressable by run plus stable ID.
//! Domain-scoped IDs restart per run, so the durable key is the pair; a
//! replayed run never collides with rows another run committed. Executed at
//! connection startup; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.

/// Full schema DDL.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS runs (
    run_id      TEXT PRIMARY KEY,
    subject     TEXT NOT NULL,
    status      TEXT NOT NULL,   -- running | completed | partially_completed | failed
    started_at  TEXT NOT NULL,   -- RFC 3339 UTC
    finished_at TEXT,
    payload     TEXT NOT NULL    -- full AnalysisRun JSON
);

CREATE TABLE IF NOT EXISTS facts (
    fact_id    TEXT NOT NULL,    -- F-<DOMAIN>-<SEQ>
    run_id     TEXT NOT NULL REFERENCES runs(run_id),
    domain     TEXT NOT NULL,
    category   TEXT NOT NULL,
    status     TEXT NOT NULL,
    payload    TEXT NOT NULL,    -- full Fact JSON, evidence included
    updated_at TEXT NOT NULL,
    PRIMARY KEY (run_id, fact_id)
);

CREATE TABLE IF NOT EXISTS gaps (
    gap_id     TEXT NOT NULL,
    run_id     TEXT NOT NULL REFERENCES runs(run_id),
    domain     TEXT NOT NULL,
    kind       TEXT NOT NULL,
    payload    TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (run_id, gap_id)
);

CREATE TABLE IF NOT EXISTS findings (
    finding_id TEXT NOT NULL,
    run_id     TEXT NOT NULL REFERENCES runs(run_id),
    domain     TEXT NOT NULL,
    kind       TEXT NOT NULL,    -- risk | work_item | recommendation | strategic_note
    payload    TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (run_id, finding_id)
);

CREATE TABLE IF NOT EXISTS validation_records (
    entity     TEXT NOT NULL,    -- e.g. fact:F-NET-001
    run_id     TEXT NOT NULL,
    state      TEXT NOT NULL,
    attempts   INTEGER NOT NULL DEFAULT 0,
    payload    TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (run_id, entity)
);

CREATE TABLE IF NOT EXISTS corrections (
    correction_id TEXT PRIMARY KEY,
    entity        TEXT NOT NULL,
    actor         TEXT NOT NULL,
    payload       TEXT NOT NULL,
    recorded_at   TEXT NOT NULL
);

-- Audit events are strictly append-only. The upsert is DO NOTHING: a
-- crash-retry may re-send an event, but it may never rewrite one.
CREATE TABLE IF NOT EXISTS audit_events (
    event_id  TEXT PRIMARY KEY,
    seq       INTEGER NOT NULL,
    run_id    TEXT NOT NULL,
    entity    TEXT NOT NULL,
    action    TEXT NOT NULL,
    prev_hash TEXT NOT NULL,     -- hex
    hash      TEXT NOT NULL,     -- hex
    payload   TEXT NOT NULL,
    at        TEXT NOT NULL
);

-- Cosmetic progress signal; throttled by the writer, never load-bearing.
CREATE TABLE IF NOT EXISTS progress (
    run_id     TEXT PRIMARY KEY,
    done       INTEGER NOT NULL,
    total      INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS facts_run_idx      ON facts(run_id);
CREATE INDEX IF NOT EXISTS facts_domain_idx   ON facts(run_id, domain);
CREATE INDEX IF NOT EXISTS gaps_run_idx       ON gaps(run_id);
CREATE INDEX IF NOT EXISTS findings_run_idx   ON findings(run_id);
CREATE INDEX IF NOT EXISTS findings_kind_idx  ON findings(run_id, kind);
CREATE INDEX IF NOT EXISTS records_run_idx    ON validation_records(run_id);
CREATE INDEX IF NOT EXISTS events_run_idx     ON audit_events(run_id);
CREATE INDEX IF NOT EXISTS events_seq_idx     ON audit_events(seq);
";
