//! Slot registry with FIFO hand-off
//!
//! Provides [`PendingRegistry`] for exclusive per-identity slots.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Registry errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Another holder owns the slot
    #[error("slot is already held")]
    Occupied,
}

/// Identifies one claim on a slot
///
/// Every acquisition attempt gets a fresh ticket, so a stale guard can never
/// release a slot that has since been handed to someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

/// Registry statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Identities with a current holder
    pub active: usize,
    /// Claims parked behind a holder
    pub waiting: usize,
}

/// Occupied slot: current holder plus the queue of parked claims
struct Slot<H> {
    ticket: Ticket,
    holder: H,
    queue: VecDeque<Waiter<H>>,
}

/// Parked claim, woken when the slot is handed to it
struct Waiter<H> {
    ticket: Ticket,
    holder: H,
    wake: oneshot::Sender<()>,
}

/// Pass the slot to the first live waiter
///
/// Returns `false` when nobody is waiting and the slot should be dropped.
fn hand_off<H>(slot: &mut Slot<H>) -> bool {
    while let Some(next) = slot.queue.pop_front() {
        if next.wake.is_closed() {
            continue;
        }
        slot.ticket = next.ticket;
        slot.holder = next.holder;
        if next.wake.send(()).is_ok() {
            tracing::trace!(ticket = next.ticket.0, "slot handed off");
            return true;
        }
    }
    false
}

struct Inner<K, H> {
    slots: DashMap<K, Slot<H>>,
    next_ticket: AtomicU64,
}

/// Exclusive slot per identity
///
/// Cloning is cheap and yields a handle to the same registry.
///
/// # Guarantees
/// - At most one holder per key at any time
/// - Lookups, claims and releases on one key are linearizable
/// - Different keys never serialize against each other
/// - Parked claims are served in arrival order
pub struct PendingRegistry<K, H> {
    inner: Arc<Inner<K, H>>,
}

impl<K, H> Clone for PendingRegistry<K, H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, H> fmt::Debug for PendingRegistry<K, H>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRegistry")
            .field("active", &self.inner.slots.len())
            .finish_non_exhaustive()
    }
}

impl<K, H> Default for PendingRegistry<K, H>
where
    K: Eq + Hash + Clone,
    H: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, H> PendingRegistry<K, H>
where
    K: Eq + Hash + Clone,
    H: Clone,
{
    /// Create empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: DashMap::new(),
                next_ticket: AtomicU64::new(0),
            }),
        }
    }

    fn next_ticket(&self) -> Ticket {
        Ticket(self.inner.next_ticket.fetch_add(1, Ordering::Relaxed))
    }

    /// Check whether `key` currently has a holder
    #[inline]
    #[must_use]
    pub fn has_active(&self, key: &K) -> bool {
        self.inner.slots.contains_key(key)
    }

    /// Current holder of `key`
    #[must_use]
    pub fn active_command_for(&self, key: &K) -> Option<H> {
        self.inner.slots.get(key).map(|slot| slot.holder.clone())
    }

    /// Claim `key` only if it is free
    ///
    /// # Errors
    /// Returns `RegistryError::Occupied` if another holder owns the slot
    pub fn try_acquire(&self, key: K, holder: H) -> Result<SlotGuard<K, H>, RegistryError> {
        let ticket = self.next_ticket();
        match self.inner.slots.entry(key.clone()) {
            Entry::Occupied(_) => Err(RegistryError::Occupied),
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    ticket,
                    holder,
                    queue: VecDeque::new(),
                });
                Ok(SlotGuard::new(self.clone(), key, ticket))
            }
        }
    }

    /// Claim `key`, waiting for the current holder to release it
    ///
    /// The wait does not poll: the claim is parked and woken by the release
    /// that hands it the slot.
    ///
    /// # Cancel safety
    /// Dropping the returned future withdraws the claim. If the slot had
    /// already been handed over, it is passed on to the next waiter.
    pub async fn acquire(&self, key: K, holder: H) -> SlotGuard<K, H> {
        loop {
            let ticket = self.next_ticket();
            let parked = match self.inner.slots.entry(key.clone()) {
                Entry::Vacant(vacant) => {
                    vacant.insert(Slot {
                        ticket,
                        holder,
                        queue: VecDeque::new(),
                    });
                    return SlotGuard::new(self.clone(), key, ticket);
                }
                Entry::Occupied(mut occupied) => {
                    let (wake, parked) = oneshot::channel();
                    occupied.get_mut().queue.push_back(Waiter {
                        ticket,
                        holder: holder.clone(),
                        wake,
                    });
                    parked
                }
            };

            let mut withdraw = Withdraw {
                registry: self,
                key: &key,
                ticket,
                armed: true,
            };
            let handed = parked.await.is_ok();
            withdraw.armed = false;
            drop(withdraw);

            if handed {
                return SlotGuard::new(self.clone(), key, ticket);
            }
            // Waiter dropped without a hand-off; claim again.
        }
    }

    /// Release whoever holds `key`, handing the slot to the next waiter
    ///
    /// Returns `false` if the slot was free.
    pub fn release(&self, key: &K) -> bool {
        match self.inner.slots.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if !hand_off(occupied.get_mut()) {
                    occupied.remove();
                }
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Release `key` only if `ticket` still holds it
    fn release_ticket(&self, key: &K, ticket: Ticket) -> bool {
        match self.inner.slots.entry(key.clone()) {
            Entry::Occupied(mut occupied) if occupied.get().ticket == ticket => {
                if !hand_off(occupied.get_mut()) {
                    occupied.remove();
                }
                true
            }
            _ => false,
        }
    }

    /// Drop a parked claim, or pass the slot on if it was already handed over
    fn withdraw(&self, key: &K, ticket: Ticket) {
        if let Entry::Occupied(mut occupied) = self.inner.slots.entry(key.clone()) {
            if occupied.get().ticket == ticket {
                if !hand_off(occupied.get_mut()) {
                    occupied.remove();
                }
            } else {
                occupied.get_mut().queue.retain(|w| w.ticket != ticket);
            }
        }
    }

    /// Number of claims parked behind the holder of `key`
    #[must_use]
    pub fn waiting(&self, key: &K) -> usize {
        self.inner
            .slots
            .get(key)
            .map_or(0, |slot| slot.queue.len())
    }

    /// Keys that currently have a holder
    #[must_use]
    pub fn active_keys(&self) -> Vec<K> {
        self.inner.slots.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of held slots
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    /// Whether no slot is held
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    /// Get registry statistics
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.inner
            .slots
            .iter()
            .fold(RegistryStats::default(), |mut stats, slot| {
                stats.active += 1;
                stats.waiting += slot.queue.len();
                stats
            })
    }
}

/// Withdraws a parked claim if the waiting future is dropped
struct Withdraw<'a, K, H>
where
    K: Eq + Hash + Clone,
    H: Clone,
{
    registry: &'a PendingRegistry<K, H>,
    key: &'a K,
    ticket: Ticket,
    armed: bool,
}

impl<K, H> Drop for Withdraw<'_, K, H>
where
    K: Eq + Hash + Clone,
    H: Clone,
{
    fn drop(&mut self) {
        if self.armed {
            self.registry.withdraw(self.key, self.ticket);
        }
    }
}

/// Ownership of one slot
///
/// The slot is released when the guard is dropped or [`SlotGuard::release`]
/// is called. A guard whose slot was force-released through
/// [`PendingRegistry::release`] releases nothing.
#[must_use = "dropping the guard releases the slot"]
pub struct SlotGuard<K, H>
where
    K: Eq + Hash + Clone,
    H: Clone,
{
    registry: PendingRegistry<K, H>,
    key: K,
    ticket: Ticket,
    released: bool,
}

impl<K, H> SlotGuard<K, H>
where
    K: Eq + Hash + Clone,
    H: Clone,
{
    fn new(registry: PendingRegistry<K, H>, key: K, ticket: Ticket) -> Self {
        Self {
            registry,
            key,
            ticket,
            released: false,
        }
    }

    /// Key this guard holds
    #[inline]
    #[must_use]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Ticket of this claim
    #[inline]
    #[must_use]
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    /// Whether this guard still owns its slot
    #[must_use]
    pub fn is_held(&self) -> bool {
        !self.released
            && self
                .registry
                .inner
                .slots
                .get(&self.key)
                .is_some_and(|slot| slot.ticket == self.ticket)
    }

    /// Release the slot now
    ///
    /// Returns `false` if the slot had already been force-released.
    pub fn release(mut self) -> bool {
        self.released = true;
        self.registry.release_ticket(&self.key, self.ticket)
    }
}

impl<K, H> fmt::Debug for SlotGuard<K, H>
where
    K: Eq + Hash + Clone + fmt::Debug,
    H: Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotGuard")
            .field("key", &self.key)
            .field("ticket", &self.ticket)
            .finish()
    }
}

impl<K, H> Drop for SlotGuard<K, H>
where
    K: Eq + Hash + Clone,
    H: Clone,
{
    fn drop(&mut self) {
        if !self.released {
            self.registry.release_ticket(&self.key, self.ticket);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Mutex;

    type Registry = PendingRegistry<u64, &'static str>;

    #[test]
    fn registry_new_empty() {
        let registry = Registry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(!registry.has_active(&1));
    }

    #[test]
    fn try_acquire_and_release() {
        let registry = Registry::new();

        let guard = registry.try_acquire(1, "a").unwrap();
        assert!(registry.has_active(&1));
        assert_eq!(registry.active_command_for(&1), Some("a"));
        assert!(guard.is_held());

        assert_eq!(
            registry.try_acquire(1, "b").unwrap_err(),
            RegistryError::Occupied
        );

        assert!(guard.release());
        assert!(!registry.has_active(&1));
    }

    #[test]
    fn different_keys_do_not_contend() {
        let registry = Registry::new();
        let _a = registry.try_acquire(1, "a").unwrap();
        let _b = registry.try_acquire(2, "b").unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn force_release_invalidates_guard() {
        let registry = Registry::new();
        let stale = registry.try_acquire(1, "a").unwrap();

        assert!(registry.release(&1));
        let fresh = registry.try_acquire(1, "b").unwrap();

        assert!(!stale.is_held());
        assert!(!stale.release());
        assert!(fresh.is_held());
        assert_eq!(registry.active_command_for(&1), Some("b"));
    }

    #[tokio::test]
    async fn acquire_waits_for_release() {
        let registry = Registry::new();
        let first = registry.acquire(1, "first").await;

        let contender = registry.clone();
        let waiter = tokio::spawn(async move {
            let guard = contender.acquire(1, "second").await;
            guard.ticket()
        });

        tokio::task::yield_now().await;
        while registry.waiting(&1) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(registry.active_command_for(&1), Some("first"));
        assert!(!waiter.is_finished());

        drop(first);
        let ticket = waiter.await.unwrap();
        assert_ne!(ticket, Ticket(0));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn waiters_are_served_in_arrival_order() {
        let registry = PendingRegistry::<u64, usize>::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let holder = registry.acquire(7, 0).await;

        let mut tasks = Vec::new();
        for n in 1..=4 {
            let contender = registry.clone();
            let order = Arc::clone(&order);
            tasks.push(tokio::spawn(async move {
                let guard = contender.acquire(7, n).await;
                order.lock().await.push(n);
                tokio::task::yield_now().await;
                drop(guard);
            }));
            while registry.waiting(&7) < n {
                tokio::task::yield_now().await;
            }
        }

        drop(holder);
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(*order.lock().await, vec![1, 2, 3, 4]);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn handed_off_slot_names_new_holder() {
        let registry = Registry::new();
        let first = registry.acquire(3, "first").await;

        let contender = registry.clone();
        let waiter = tokio::spawn(async move { contender.acquire(3, "second").await });
        while registry.waiting(&3) == 0 {
            tokio::task::yield_now().await;
        }

        drop(first);
        assert_eq!(registry.active_command_for(&3), Some("second"));
        let guard = waiter.await.unwrap();
        assert!(guard.is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_waiter_is_withdrawn() {
        let registry = Registry::new();
        let first = registry.acquire(5, "first").await;

        let timed_out =
            tokio::time::timeout(Duration::from_millis(10), registry.acquire(5, "impatient")).await;
        assert!(timed_out.is_err());
        assert_eq!(registry.waiting(&5), 0);

        drop(first);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn dropped_waiter_after_hand_off_passes_slot_on() {
        let registry = Registry::new();
        let first = registry.acquire(5, "first").await;

        let mut parked = Box::pin(registry.acquire(5, "dropped"));
        assert!(futures::poll!(parked.as_mut()).is_pending());

        let contender = registry.clone();
        let third = tokio::spawn(async move { contender.acquire(5, "third").await });
        while registry.waiting(&5) < 2 {
            tokio::task::yield_now().await;
        }

        // Hand the slot to the parked future, then drop it before it observes the hand-off.
        drop(first);
        assert_eq!(registry.active_command_for(&5), Some("dropped"));
        drop(parked);

        let guard = third.await.unwrap();
        assert!(guard.is_held());
        assert_eq!(registry.active_command_for(&5), Some("third"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn contended_keys_never_have_two_holders() {
        let registry = PendingRegistry::<u64, usize>::new();
        let inside: Arc<Vec<AtomicUsize>> = Arc::new((0..3).map(|_| AtomicUsize::new(0)).collect());
        let violations = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for n in 0..60usize {
            let registry = registry.clone();
            let inside = Arc::clone(&inside);
            let violations = Arc::clone(&violations);
            tasks.push(tokio::spawn(async move {
                let key = (n % 3) as u64;
                let guard = registry.acquire(key, n).await;
                let counter = &inside[n % 3];
                if counter.fetch_add(1, Ordering::SeqCst) != 0 {
                    violations.fetch_add(1, Ordering::SeqCst);
                }
                tokio::task::yield_now().await;
                counter.fetch_sub(1, Ordering::SeqCst);
                drop(guard);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(violations.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn stats_count_active_and_waiting() {
        let registry = Registry::new();
        let _a = registry.try_acquire(1, "a").unwrap();
        let _b = registry.try_acquire(2, "b").unwrap();

        let stats = registry.stats();
        assert_eq!(stats.active, 2);
        assert_eq!(stats.waiting, 0);
        assert_eq!(registry.active_keys().len(), 2);
    }
}
