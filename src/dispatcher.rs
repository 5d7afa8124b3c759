//! Finalizer-mediated reconciliation state machine.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DispatchError;
use crate::event::{CustomResourceEvent, WatchAction};
use crate::finalizer;
use crate::resource::{self, ReconcileTarget};

#[cfg(feature = "metrics")]
use crate::metrics;

/// User-supplied reconciliation logic. The only collaborator the dispatcher
/// calls into for business decisions.
#[async_trait]
pub trait ResourceController<R: ReconcileTarget>: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create or update whatever external state `resource` describes.
    /// Returning `Some(resource)` asks the dispatcher to persist the
    /// (possibly mutated) resource; `None` means no persistence is needed.
    async fn create_or_update_resource(&self, resource: R) -> Result<Option<R>, Self::Error>;

    /// Tear down whatever external state `resource` owns. Returning `true`
    /// authorizes finalizer removal; `false` means the controller is not
    /// ready to release the resource and the finalizer must remain.
    async fn delete_resource(&self, resource: &R) -> Result<bool, Self::Error>;
}

/// Persists a resource with optimistic-lock semantics: applies iff the
/// server-side `resourceVersion` still matches, else fails.
#[async_trait]
pub trait ReplaceClient<R: ReconcileTarget>: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn replace_with_lock(&self, resource: R) -> Result<(), Self::Error>;
}

#[async_trait]
impl<R, T> ResourceController<R> for Arc<T>
where
    R: ReconcileTarget,
    T: ResourceController<R> + ?Sized,
{
    type Error = T::Error;

    async fn create_or_update_resource(&self, resource: R) -> Result<Option<R>, Self::Error> {
        (**self).create_or_update_resource(resource).await
    }

    async fn delete_resource(&self, resource: &R) -> Result<bool, Self::Error> {
        (**self).delete_resource(resource).await
    }
}

#[async_trait]
impl<R, T> ReplaceClient<R> for Arc<T>
where
    R: ReconcileTarget,
    T: ReplaceClient<R> + ?Sized,
{
    type Error = T::Error;

    async fn replace_with_lock(&self, resource: R) -> Result<(), Self::Error> {
        (**self).replace_with_lock(resource).await
    }
}

/// Drives the finalizer protocol and the user controller for a single event.
///
/// Stateless beyond its collaborators: the four-way branch below is derived
/// entirely from the event's resource metadata, not from anything the
/// dispatcher itself remembers.
pub struct EventDispatcher<C, P> {
    controller: C,
    replace_client: P,
    finalizer: String,
}

impl<C, P> EventDispatcher<C, P> {
    pub fn new(controller: C, replace_client: P) -> Self {
        Self {
            controller,
            replace_client,
            finalizer: finalizer::DEFAULT_FINALIZER.to_owned(),
        }
    }

    /// Overrides the finalizer name, as per-controller declarative metadata
    /// allows.
    pub fn with_finalizer(mut self, finalizer: impl Into<String>) -> Self {
        self.finalizer = finalizer.into();
        self
    }
}

impl<R, C, P> EventDispatcher<C, P>
where
    R: ReconcileTarget,
    C: ResourceController<R>,
    P: ReplaceClient<R>,
{
    /// Runs one tick of the reconciliation state machine for `event`.
    pub async fn reconcile(
        &self,
        event: &CustomResourceEvent<R>,
    ) -> Result<(), DispatchError<C::Error, P::Error>> {
        if event.resource.uid().is_none() {
            return Err(DispatchError::MalformedEvent);
        }

        let is_deleting = resource::deleted(&event.resource);
        let has_finalizer = finalizer::contains(&event.resource, &self.finalizer);

        let (namespace, name) = resource::namespaced_name(&event.resource);
        tracing::debug!(
            namespace,
            name,
            action = ?event.action,
            is_deleting,
            has_finalizer,
            "reconciling resource"
        );

        match (is_deleting, has_finalizer) {
            (false, false) => self.apply_adding_finalizer(event).await,
            (false, true) => self.apply_with_finalizer_present(event).await,
            (true, true) => self.delete_and_remove_finalizer(event).await,
            (true, false) => self.delete_opportunistically(event).await,
        }
    }

    /// `deletionTimestamp = null ∧ DEFAULT_FINALIZER ∉ finalizers`: add the
    /// finalizer, call the controller, and persist whichever of the two
    /// happened.
    async fn apply_adding_finalizer(
        &self,
        event: &CustomResourceEvent<R>,
    ) -> Result<(), DispatchError<C::Error, P::Error>> {
        let mut resource = event.resource.clone();
        let added_finalizer = finalizer::add(&mut resource, &self.finalizer);

        let controller_result = self
            .controller
            .create_or_update_resource(resource.clone())
            .await
            .map_err(DispatchError::Controller)?;

        let to_persist = controller_result.or(added_finalizer.then_some(resource));
        self.persist(to_persist).await?;
        self.record_success();
        Ok(())
    }

    /// `deletionTimestamp = null ∧ DEFAULT_FINALIZER ∈ finalizers`: call the
    /// controller, persisting only if it hands back a mutated resource.
    async fn apply_with_finalizer_present(
        &self,
        event: &CustomResourceEvent<R>,
    ) -> Result<(), DispatchError<C::Error, P::Error>> {
        let controller_result = self
            .controller
            .create_or_update_resource(event.resource.clone())
            .await
            .map_err(DispatchError::Controller)?;

        self.persist(controller_result).await?;
        self.record_success();
        Ok(())
    }

    /// `deletionTimestamp ≠ null ∧ DEFAULT_FINALIZER ∈ finalizers`: call
    /// delete; remove the finalizer and persist only if the controller
    /// authorizes it.
    async fn delete_and_remove_finalizer(
        &self,
        event: &CustomResourceEvent<R>,
    ) -> Result<(), DispatchError<C::Error, P::Error>> {
        let authorized = self
            .controller
            .delete_resource(&event.resource)
            .await
            .map_err(DispatchError::Controller)?;

        if !authorized {
            tracing::debug!("delete vetoed by controller, keeping finalizer");
            return Ok(());
        }

        let mut resource = event.resource.clone();
        finalizer::remove(&mut resource, &self.finalizer);
        self.persist(Some(resource)).await?;
        self.record_success();
        Ok(())
    }

    /// `deletionTimestamp ≠ null ∧ DEFAULT_FINALIZER ∉ finalizers`: the
    /// finalizer never took hold. Still call delete opportunistically, but
    /// there is nothing left to persist.
    async fn delete_opportunistically(
        &self,
        event: &CustomResourceEvent<R>,
    ) -> Result<(), DispatchError<C::Error, P::Error>> {
        let _ = self
            .controller
            .delete_resource(&event.resource)
            .await
            .map_err(DispatchError::Controller)?;
        self.record_success();
        Ok(())
    }

    async fn persist(
        &self,
        resource: Option<R>,
    ) -> Result<(), DispatchError<C::Error, P::Error>> {
        let Some(resource) = resource else {
            return Ok(());
        };
        self.replace_client
            .replace_with_lock(resource)
            .await
            .map_err(DispatchError::Persistence)
    }

    fn record_success(&self) {
        #[cfg(feature = "metrics")]
        metrics::RECONCILIATION_SUCCESS.inc();
    }
}

/// `true` iff `action` is a DELETED watch event with a set
/// `deletionTimestamp`, the shortcut case the scheduler intercepts before
/// the dispatcher ever sees the event.
pub fn is_finalizer_honored_delete<R: ReconcileTarget>(
    action: WatchAction,
    resource: &R,
) -> bool {
    matches!(action, WatchAction::Deleted) && resource::deleted(resource)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::test_support::FakeResource;
    use crate::retry::{GenericRetry, RetryExecution};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct StubController {
        create_calls: AtomicUsize,
        delete_calls: AtomicUsize,
        authorize_delete: bool,
        mutate: bool,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("stub controller error")]
    struct StubControllerError;

    #[async_trait]
    impl ResourceController<FakeResource> for StubController {
        type Error = StubControllerError;

        async fn create_or_update_resource(
            &self,
            resource: FakeResource,
        ) -> Result<Option<FakeResource>, Self::Error> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.mutate.then_some(resource))
        }

        async fn delete_resource(&self, _resource: &FakeResource) -> Result<bool, Self::Error> {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.authorize_delete)
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("stub persistence error")]
    struct StubReplaceError;

    #[derive(Default)]
    struct StubReplaceClient {
        persisted: Mutex<Vec<FakeResource>>,
    }

    #[async_trait]
    impl ReplaceClient<FakeResource> for StubReplaceClient {
        type Error = StubReplaceError;

        async fn replace_with_lock(&self, resource: FakeResource) -> Result<(), Self::Error> {
            self.persisted.lock().unwrap().push(resource);
            Ok(())
        }
    }

    fn event(resource: FakeResource, action: WatchAction) -> CustomResourceEvent<FakeResource> {
        CustomResourceEvent::new(
            action,
            resource,
            RetryExecution::new(Arc::new(GenericRetry::default())),
        )
    }

    #[tokio::test]
    async fn create_adds_finalizer_and_persists_once() {
        let controller = StubController::default();
        let replace_client = StubReplaceClient::default();
        let dispatcher = EventDispatcher::new(controller, replace_client);

        let resource = FakeResource::new("abc");
        dispatcher
            .reconcile(&event(resource, WatchAction::Added))
            .await
            .unwrap();

        assert_eq!(
            dispatcher.controller.create_calls.load(Ordering::SeqCst),
            1
        );
        let persisted = dispatcher.replace_client.persisted.lock().unwrap();
        assert_eq!(persisted.len(), 1);
        assert!(finalizer::contains(&persisted[0], finalizer::DEFAULT_FINALIZER));
    }

    #[tokio::test]
    async fn apply_with_finalizer_present_does_not_persist_without_mutation() {
        let controller = StubController {
            mutate: false,
            ..Default::default()
        };
        let replace_client = StubReplaceClient::default();
        let dispatcher = EventDispatcher::new(controller, replace_client);

        let mut resource = FakeResource::new("abc");
        finalizer::add(&mut resource, finalizer::DEFAULT_FINALIZER);
        dispatcher
            .reconcile(&event(resource, WatchAction::Modified))
            .await
            .unwrap();

        assert!(dispatcher.replace_client.persisted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_vetoed_keeps_finalizer_and_does_not_persist() {
        let controller = StubController {
            authorize_delete: false,
            ..Default::default()
        };
        let replace_client = StubReplaceClient::default();
        let dispatcher = EventDispatcher::new(controller, replace_client);

        let mut resource = FakeResource::new("abc");
        finalizer::add(&mut resource, finalizer::DEFAULT_FINALIZER);
        resource.deletion_timestamp = Some("2026-01-01T00:00:00Z".to_owned());

        dispatcher
            .reconcile(&event(resource, WatchAction::Modified))
            .await
            .unwrap();

        assert_eq!(dispatcher.controller.delete_calls.load(Ordering::SeqCst), 1);
        assert!(dispatcher.replace_client.persisted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_authorized_removes_finalizer_and_persists() {
        let controller = StubController {
            authorize_delete: true,
            ..Default::default()
        };
        let replace_client = StubReplaceClient::default();
        let dispatcher = EventDispatcher::new(controller, replace_client);

        let mut resource = FakeResource::new("abc");
        finalizer::add(&mut resource, finalizer::DEFAULT_FINALIZER);
        resource.deletion_timestamp = Some("2026-01-01T00:00:00Z".to_owned());

        dispatcher
            .reconcile(&event(resource, WatchAction::Modified))
            .await
            .unwrap();

        let persisted = dispatcher.replace_client.persisted.lock().unwrap();
        assert_eq!(persisted.len(), 1);
        assert!(!finalizer::contains(&persisted[0], finalizer::DEFAULT_FINALIZER));
    }

    #[tokio::test]
    async fn deleting_without_finalizer_calls_delete_but_never_persists() {
        let controller = StubController {
            authorize_delete: true,
            ..Default::default()
        };
        let replace_client = StubReplaceClient::default();
        let dispatcher = EventDispatcher::new(controller, replace_client);

        let mut resource = FakeResource::new("abc");
        resource.deletion_timestamp = Some("2026-01-01T00:00:00Z".to_owned());

        dispatcher
            .reconcile(&event(resource, WatchAction::Modified))
            .await
            .unwrap();

        assert_eq!(dispatcher.controller.delete_calls.load(Ordering::SeqCst), 1);
        assert!(dispatcher.replace_client.persisted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_event_without_uid_is_rejected() {
        let controller = StubController::default();
        let replace_client = StubReplaceClient::default();
        let dispatcher = EventDispatcher::new(controller, replace_client);

        let mut resource = FakeResource::new("abc");
        resource.uid = None;

        let result = dispatcher
            .reconcile(&event(resource, WatchAction::Added))
            .await;
        assert!(matches!(result, Err(DispatchError::MalformedEvent)));
    }
}
