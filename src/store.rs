//! In-memory, per-identity event buffer.
//!
//! `EventStore` is a passive data structure: it exposes no concurrency
//! guarantees of its own. Callers (the scheduler) are responsible for
//! guarding every mutation with the coarse scheduler mutex.

use hashbrown::HashMap;

use crate::event::CustomResourceEvent;
use crate::identity::ResourceKey;
use crate::resource::ReconcileTarget;

/// Per-identity slots: the `EventStore` state per identity.
#[derive(Debug)]
struct IdentitySlots<R: ReconcileTarget> {
    under_processing: Option<CustomResourceEvent<R>>,
    not_scheduled: Option<CustomResourceEvent<R>>,
    last_stored_generation: Option<i64>,
    last_received_event: Option<CustomResourceEvent<R>>,
}

impl<R: ReconcileTarget> Default for IdentitySlots<R> {
    fn default() -> Self {
        Self {
            under_processing: None,
            not_scheduled: None,
            last_stored_generation: None,
            last_received_event: None,
        }
    }
}

impl<R: ReconcileTarget> IdentitySlots<R> {
    fn is_empty(&self) -> bool {
        self.under_processing.is_none()
            && self.not_scheduled.is_none()
            && self.last_stored_generation.is_none()
            && self.last_received_event.is_none()
    }
}

/// `ResourceKey -> Slots` mapping, with O(1) expected operations.
#[derive(Debug)]
pub struct EventStore<R: ReconcileTarget> {
    identities: HashMap<ResourceKey, IdentitySlots<R>>,
}

impl<R: ReconcileTarget> Default for EventStore<R> {
    fn default() -> Self {
        Self {
            identities: HashMap::new(),
        }
    }
}

impl<R: ReconcileTarget> EventStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes every slot for `id`. Used when a DELETE with
    /// `deletionTimestamp` arrives: the API server has already honored the
    /// finalizer removal, so nothing further needs tracking for this
    /// identity.
    pub fn cleanup(&mut self, id: &ResourceKey) {
        self.identities.remove(id);
    }

    pub fn contains_under_processing(&self, id: &ResourceKey) -> bool {
        self.identities
            .get(id)
            .is_some_and(|slots| slots.under_processing.is_some())
    }

    pub fn contains_not_scheduled(&self, id: &ResourceKey) -> bool {
        self.identities
            .get(id)
            .is_some_and(|slots| slots.not_scheduled.is_some())
    }

    /// Promotes `event` to the in-flight slot and bumps
    /// `lastStoredGeneration` so admission control reflects it immediately.
    pub fn add_under_processing_and_update_last_generation(
        &mut self,
        id: ResourceKey,
        event: CustomResourceEvent<R>,
    ) {
        let generation = event.generation();
        let slots = self.identities.entry(id).or_default();
        slots.under_processing = Some(event);
        if let Some(generation) = generation {
            slots.last_stored_generation = Some(generation);
        }
    }

    /// Overwrites the coalescing slot with `event`, also bumping
    /// `lastStoredGeneration` so subsequent same-generation events are
    /// dropped rather than coalesced again.
    pub fn add_or_replace_not_scheduled(&mut self, id: ResourceKey, event: CustomResourceEvent<R>) {
        let generation = event.generation();
        let slots = self.identities.entry(id).or_default();
        slots.not_scheduled = Some(event);
        if let Some(generation) = generation {
            slots.last_stored_generation = Some(generation);
        }
    }

    /// Clones the in-flight event for `id` without removing it, if any.
    pub fn peek_under_processing(&self, id: &ResourceKey) -> Option<CustomResourceEvent<R>> {
        self.identities
            .get(id)
            .and_then(|slots| slots.under_processing.clone())
    }

    pub fn remove_under_processing(&mut self, id: &ResourceKey) -> Option<CustomResourceEvent<R>> {
        let removed = self
            .identities
            .get_mut(id)
            .and_then(|slots| slots.under_processing.take());
        self.prune_if_empty(id);
        removed
    }

    pub fn remove_not_scheduled(&mut self, id: &ResourceKey) -> Option<CustomResourceEvent<R>> {
        let removed = self
            .identities
            .get_mut(id)
            .and_then(|slots| slots.not_scheduled.take());
        self.prune_if_empty(id);
        removed
    }

    /// Caches `event` as the most recently observed payload for `id`, used
    /// to refresh stale retry payloads on failure.
    pub fn add_last_event_for_generation_aware_retry(
        &mut self,
        id: ResourceKey,
        event: CustomResourceEvent<R>,
    ) {
        self.identities.entry(id).or_default().last_received_event = Some(event);
    }

    pub fn last_received_event(&self, id: &ResourceKey) -> Option<&CustomResourceEvent<R>> {
        self.identities
            .get(id)
            .and_then(|slots| slots.last_received_event.as_ref())
    }

    /// Admission-control predicate for generation-aware mode: `true` iff
    /// `event`'s generation is strictly greater than the highest generation
    /// ever admitted for its identity, or no generation has been stored yet.
    pub fn has_larger_generation_than_last_stored(
        &self,
        id: &ResourceKey,
        event: &CustomResourceEvent<R>,
    ) -> bool {
        let Some(generation) = event.generation() else {
            return true;
        };
        match self
            .identities
            .get(id)
            .and_then(|slots| slots.last_stored_generation)
        {
            Some(last_stored) => generation > last_stored,
            None => true,
        }
    }

    fn prune_if_empty(&mut self, id: &ResourceKey) {
        if self.identities.get(id).is_some_and(IdentitySlots::is_empty) {
            self.identities.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::test_support::FakeResource;
    use crate::retry::{GenericRetry, RetryExecution};
    use crate::event::WatchAction;
    use std::sync::Arc;

    fn event(uid: &str, generation: i64) -> CustomResourceEvent<FakeResource> {
        let mut resource = FakeResource::new(uid);
        resource.generation = Some(generation);
        CustomResourceEvent::new(
            WatchAction::Modified,
            resource,
            RetryExecution::new(Arc::new(GenericRetry::default())),
        )
    }

    #[test]
    fn empty_store_has_no_slots() {
        let store: EventStore<FakeResource> = EventStore::new();
        let id = ResourceKey::from_uid("abc");
        assert!(!store.contains_under_processing(&id));
        assert!(!store.contains_not_scheduled(&id));
    }

    #[test]
    fn under_processing_round_trip() {
        let mut store = EventStore::new();
        let id = ResourceKey::from_uid("abc");
        store.add_under_processing_and_update_last_generation(id.clone(), event("abc", 1));
        assert!(store.contains_under_processing(&id));
        let removed = store.remove_under_processing(&id);
        assert!(removed.is_some());
        assert!(!store.contains_under_processing(&id));
    }

    #[test]
    fn not_scheduled_replace_keeps_only_latest() {
        let mut store = EventStore::new();
        let id = ResourceKey::from_uid("abc");
        store.add_or_replace_not_scheduled(id.clone(), event("abc", 1));
        store.add_or_replace_not_scheduled(id.clone(), event("abc", 2));
        let removed = store.remove_not_scheduled(&id).unwrap();
        assert_eq!(removed.generation(), Some(2));
    }

    #[test]
    fn generation_filter_rejects_non_increasing_generation() {
        let mut store = EventStore::new();
        let id = ResourceKey::from_uid("abc");
        store.add_under_processing_and_update_last_generation(id.clone(), event("abc", 5));
        assert!(!store.has_larger_generation_than_last_stored(&id, &event("abc", 5)));
        assert!(store.has_larger_generation_than_last_stored(&id, &event("abc", 6)));
    }

    #[test]
    fn cleanup_removes_all_slots() {
        let mut store = EventStore::new();
        let id = ResourceKey::from_uid("abc");
        store.add_under_processing_and_update_last_generation(id.clone(), event("abc", 1));
        store.add_or_replace_not_scheduled(id.clone(), event("abc", 2));
        store.cleanup(&id);
        assert!(!store.contains_under_processing(&id));
        assert!(!store.contains_not_scheduled(&id));
        assert!(store.last_received_event(&id).is_none());
    }
}
