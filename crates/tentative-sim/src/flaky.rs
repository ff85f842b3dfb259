//! Backing store with injected failures

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tentative_core::{BackingStore, CommitRequest, Rejection};
use tentative_record::Record;

/// Rejects a random share of commits as unavailable
pub struct FlakyBackingStore {
    inner: Arc<dyn BackingStore>,
    reject_rate: f64,
    rng: Mutex<StdRng>,
    injected: AtomicU64,
}

impl FlakyBackingStore {
    /// Wrap `inner`, rejecting each commit with probability `reject_rate`
    #[must_use]
    pub fn new(inner: Arc<dyn BackingStore>, reject_rate: f64, seed: u64) -> Self {
        Self {
            inner,
            reject_rate: reject_rate.clamp(0.0, 1.0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            injected: AtomicU64::new(0),
        }
    }

    /// Number of rejections injected so far
    #[must_use]
    pub fn injected(&self) -> u64 {
        self.injected.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for FlakyBackingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlakyBackingStore")
            .field("reject_rate", &self.reject_rate)
            .field("injected", &self.injected())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BackingStore for FlakyBackingStore {
    async fn commit(&self, request: CommitRequest) -> Result<Record, Rejection> {
        let reject = self.rng.lock().gen_bool(self.reject_rate);
        if reject {
            self.injected.fetch_add(1, Ordering::Relaxed);
            return Err(Rejection::Unavailable("injected failure".into()));
        }
        self.inner.commit(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tentative_core::MemoryBackingStore;
    use tentative_record::Fields;

    #[tokio::test]
    async fn rate_bounds() {
        let memory = Arc::new(MemoryBackingStore::new());
        let never = FlakyBackingStore::new(memory.clone(), 0.0, 1);
        let always = FlakyBackingStore::new(memory.clone(), 1.0, 1);

        assert!(never.commit(CommitRequest::Create(Fields::new())).await.is_ok());
        assert_eq!(
            always.commit(CommitRequest::Create(Fields::new())).await,
            Err(Rejection::Unavailable("injected failure".into()))
        );
        assert_eq!(always.injected(), 1);
        assert_eq!(memory.len(), 1);
    }
}
