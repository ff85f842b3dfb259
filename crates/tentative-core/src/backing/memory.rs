//! In-memory backing store
//!
//! Reference [`BackingStore`] used by the simulator and the tests. It assigns
//! sequential durable identities, validates required fields, can add commit
//! latency and can be scripted to reject upcoming commits.

use super::{BackingStore, CommitRequest};
use crate::error::Rejection;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tentative_record::{Fields, Record, RecordId};

/// Backing store kept in process memory
#[derive(Debug)]
pub struct MemoryBackingStore {
    records: Mutex<BTreeMap<RecordId, Fields>>,
    next_id: AtomicU64,
    required: Vec<String>,
    latency: Duration,
    scripted: Mutex<VecDeque<Rejection>>,
    commits: AtomicUsize,
}

impl MemoryBackingStore {
    /// Create empty store
    #[must_use]
    pub fn new() -> Self {
        Self::with_records(std::iter::empty())
    }

    /// Create store holding `records`
    ///
    /// Records without a durable identity are ignored. New identities are
    /// allocated above the highest seeded one.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
        let records: BTreeMap<RecordId, Fields> = records
            .into_iter()
            .filter_map(|r| r.id().map(|id| (id, r.fields)))
            .collect();
        let next_id = records.keys().next_back().map_or(1, |id| id.get() + 1);
        Self {
            records: Mutex::new(records),
            next_id: AtomicU64::new(next_id),
            required: Vec::new(),
            latency: Duration::ZERO,
            scripted: Mutex::new(VecDeque::new()),
            commits: AtomicUsize::new(0),
        }
    }

    /// Reject creations and updates missing any of `fields`
    #[must_use]
    pub fn with_required_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Delay every commit by `latency`
    #[inline]
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Reject the next commit with `rejection`
    ///
    /// Scripted rejections are consumed in the order they were added.
    pub fn reject_next(&self, rejection: Rejection) {
        self.scripted.lock().push_back(rejection);
    }

    /// Stored fields of `id`
    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<Fields> {
        self.records.lock().get(&id).cloned()
    }

    /// All stored records, ordered by identity
    #[must_use]
    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .iter()
            .map(|(id, fields)| Record::new((*id).into(), fields.clone()))
            .collect()
    }

    /// Number of stored records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the store holds no record
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Number of commit calls received, including rejected ones
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    fn validate(&self, fields: &Fields) -> Result<(), Rejection> {
        let required: Vec<&str> = self.required.iter().map(String::as_str).collect();
        let missing = fields.missing(&required);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Rejection::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )))
        }
    }

    fn apply(&self, request: CommitRequest) -> Result<Record, Rejection> {
        let mut records = self.records.lock();
        match request {
            CommitRequest::Create(fields) => {
                self.validate(&fields)?;
                let id = RecordId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
                if records.contains_key(&id) {
                    return Err(Rejection::Conflict(id));
                }
                records.insert(id, fields.clone());
                Ok(Record::new(id.into(), fields))
            }
            CommitRequest::Update(id, fields) => {
                self.validate(&fields)?;
                let stored = records.get_mut(&id).ok_or(Rejection::NotFound(id))?;
                stored.clone_from(&fields);
                Ok(Record::new(id.into(), fields))
            }
            CommitRequest::Delete(id) => records
                .remove(&id)
                .map(|fields| Record::new(id.into(), fields))
                .ok_or(Rejection::NotFound(id)),
        }
    }
}

impl Default for MemoryBackingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BackingStore for MemoryBackingStore {
    async fn commit(&self, request: CommitRequest) -> Result<Record, Rejection> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let scripted = self.scripted.lock().pop_front();
        if let Some(rejection) = scripted {
            tracing::debug!(%rejection, "scripted rejection");
            return Err(rejection);
        }

        self.apply(request)
    }
}
