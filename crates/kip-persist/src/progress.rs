//! Throttled run-progress reporting.
//!
//! Progress rows are a cosmetic signal for operators watching a long run;
//! they are deliberately decoupled from entity durability. The tracker
//! batches counter updates in memory and flushes at most once per window,
//! so a hot producer loop never queues a database write per fact.

use crate::error::Result;
use crate::writer::IncrementalWriter;
use kip_core::RunId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Default flush window.
pub const DEFAULT_FLUSH_WINDOW: Duration = Duration::from_secs(2);

/// Counts completed work items for a run and writes a progress row at most
/// once per window. [`finish`](Self::finish) flushes unconditionally so the
/// final row is always exact.
pub struct ProgressTracker {
    writer: IncrementalWriter,
    run_id: RunId,
    done: AtomicU64,
    total: AtomicU64,
    window: Duration,
    last_flush: Mutex<Option<Instant>>,
}

impl ProgressTracker {
    /// New tracker with the default window.
    #[must_use]
    pub fn new(writer: IncrementalWriter, run_id: RunId, total: u64) -> Self {
        Self::with_window(writer, run_id, total, DEFAULT_FLUSH_WINDOW)
    }

    /// New tracker with an explicit window (tests use a zero window).
    #[must_use]
    pub fn with_window(
        writer: IncrementalWriter,
        run_id: RunId,
        total: u64,
        window: Duration,
    ) -> Self {
        Self {
            writer,
            run_id,
            done: AtomicU64::new(0),
            total: AtomicU64::new(total),
            window,
            last_flush: Mutex::new(None),
        }
    }

    /// Record one completed item and flush if the window has elapsed.
    /// A skipped flush is free; entity writes never wait on this path.
    pub async fn item_done(&self) -> Result<()> {
        self.done.fetch_add(1, Ordering::Relaxed);
        if self.window_open() {
            self.flush().await?;
        }
        Ok(())
    }

    /// Grow the expected total (a producer discovered more work).
    pub fn add_expected(&self, n: u64) {
        self.total.fetch_add(n, Ordering::Relaxed);
    }

    /// Completed / total counters as currently held in memory.
    #[must_use]
    pub fn counters(&self) -> (u64, u64) {
        (
            self.done.load(Ordering::Relaxed),
            self.total.load(Ordering::Relaxed),
        )
    }

    /// Final, unthrottled flush at run end.
    pub async fn finish(&self) -> Result<()> {
        self.flush().await
    }

    fn window_open(&self) -> bool {
        let mut last = self.last_flush.lock();
        match *last {
            Some(at) if at.elapsed() < self.window => false,
            _ => {
                *last = Some(Instant::now());
                true
            }
        }
    }

    async fn flush(&self) -> Result<()> {
        let (done, total) = self.counters();
        self.writer.write_progress(self.run_id, done, total).await
    }
}
