//! Hash-chained audit trail
//!
//! Append-only. Each event carries the hash of its predecessor, so any
//! tampering or loss in the middle of the chain is detectable with
//! `verify_integrity`.

use kip_core::AuditEvent;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An audit event wrapped with its chain position and hashes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainedEvent {
    /// Position in the chain, starting at 0
    pub seq: u64,
    /// The event itself
    pub event: AuditEvent,
    /// Hash of the previous chained event (zeroes for the first)
    pub prev_hash: [u8; 32],
    /// Hash over this event and `prev_hash`
    pub hash: [u8; 32],
}

/// Chain integrity violation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("audit chain integrity violation at seq {seq}")]
pub struct IntegrityViolation {
    /// First sequence number where the chain breaks
    pub seq: u64,
}

/// Append-only audit log with a SHA-256 hash chain.
#[derive(Debug, Default)]
pub struct AuditTrail {
    inner: Mutex<Vec<ChainedEvent>>,
}

impl AuditTrail {
    /// Create an empty trail.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, chaining it to the current tail.
    pub fn append(&self, event: AuditEvent) -> ChainedEvent {
        let mut guard = self.inner.lock();
        let prev_hash = guard.last().map(|e| e.hash).unwrap_or([0u8; 32]);
        let seq = guard.len() as u64;
        let hash = compute_hash(seq, &event, &prev_hash);
        let chained = ChainedEvent {
            seq,
            event,
            prev_hash,
            hash,
        };
        guard.push(chained.clone());
        chained
    }

    /// Snapshot of all events.
    #[must_use]
    pub fn events(&self) -> Vec<ChainedEvent> {
        self.inner.lock().clone()
    }

    /// Events strictly after `seq` (use for incremental persistence).
    #[must_use]
    pub fn events_since(&self, seq: Option<u64>) -> Vec<ChainedEvent> {
        let guard = self.inner.lock();
        match seq {
            Some(s) => guard.iter().filter(|e| e.seq > s).cloned().collect(),
            None => guard.clone(),
        }
    }

    /// Number of events appended so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True when no events have been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Walk the chain and verify every link and hash.
    pub fn verify_integrity(&self) -> Result<(), IntegrityViolation> {
        let guard = self.inner.lock();
        let mut prev = [0u8; 32];
        for e in guard.iter() {
            if e.prev_hash != prev || compute_hash(e.seq, &e.event, &e.prev_hash) != e.hash {
                return Err(IntegrityViolation { seq: e.seq });
            }
            prev = e.hash;
        }
        Ok(())
    }
}

fn compute_hash(seq: u64, event: &AuditEvent, prev_hash: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(seq.to_le_bytes());
    hasher.update(event.event_id.0.as_bytes());
    hasher.update(event.at.timestamp_micros().to_le_bytes());
    hasher.update(event.run_id.0.as_bytes());
    hasher.update(event.entity.to_string().as_bytes());
    hasher.update([0]);
    hasher.update(format!("{:?}", event.action).as_bytes());
    hasher.update([0]);
    hasher.update(event.actor.as_bytes());
    hasher.update([0]);
    hasher.update(event.detail.as_bytes());
    hasher.update(prev_hash);
    hasher.finalize().into()
}
