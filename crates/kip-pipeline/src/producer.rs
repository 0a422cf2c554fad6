//! Bounded producer pool.
//!
//! External generation calls respect a global in-flight cap (rate limits on
//! the far side) and a mandatory per-call deadline. A hung producer is a
//! producer failure routed into the retry/escalation path, never a stuck
//! worker slot.

use crate::generate::{CandidateFact, GeneratedBatch, Generator};
use kip_core::{FactId, InfraError, KipError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Semaphore-bounded gateway to the generation process.
#[derive(Clone)]
pub struct ProducerPool {
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl ProducerPool {
    /// Pool admitting at most `max_producers` concurrent generation calls.
    #[must_use]
    pub fn new(max_producers: usize, timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_producers)),
            timeout,
        }
    }

    /// Permits currently free (used by pool-saturation tests).
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run one domain's generation call under a permit and the deadline.
    ///
    /// # Errors
    /// `InfraError::GenerationTimeout` when the deadline passes; the
    /// generator's own error otherwise.
    pub async fn generate(
        &self,
        generator: &dyn Generator,
        domain: &str,
        document_refs: &[String],
    ) -> Result<GeneratedBatch, KipError> {
        let _permit = self.acquire().await?;
        tracing::debug!(domain, docs = document_refs.len(), "producer admitted");
        match tokio::time::timeout(self.timeout, generator.generate(domain, document_refs)).await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(domain, timeout_secs = self.timeout.as_secs(), "producer hung");
                Err(InfraError::GenerationTimeout {
                    domain: domain.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                }
                .into())
            }
        }
    }

    /// Run a targeted regeneration under a permit and the deadline.
    ///
    /// # Errors
    /// Same contract as [`generate`](Self::generate).
    pub async fn regenerate(
        &self,
        generator: &dyn Generator,
        hint: &FactId,
        context: &str,
    ) -> Result<Vec<CandidateFact>, KipError> {
        let _permit = self.acquire().await?;
        match tokio::time::timeout(self.timeout, generator.regenerate(hint, context)).await {
            Ok(result) => result,
            Err(_) => Err(InfraError::GenerationTimeout {
                domain: hint.domain().to_string(),
                timeout_secs: self.timeout.as_secs(),
            }
            .into()),
        }
    }

    async fn acquire(&self) -> Result<tokio::sync::OwnedSemaphorePermit, KipError> {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| InfraError::GenerationFailed("producer pool closed".into()).into())
    }
}
