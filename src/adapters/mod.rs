//! Concrete `kube-rs`-backed adapters (feature `kube-client`).
//!
//! These are thin translation shims over `kube::Api`/`kube::runtime::watcher`
//! — they carry no business logic of their own, leaving adapters as
//! contracts-only glue. The core engine
//! (`EventStore`/`EventScheduler`/`EventDispatcher`) never depends on `kube`
//! directly; it is generic over any type satisfying
//! [`crate::resource::ReconcileTarget`], which this module implements for
//! every `kube::Resource`.

pub mod kube_client;
pub mod watch;

use kube::{Resource, ResourceExt};

use crate::resource::ReconcileTarget;

/// Blanket implementation of [`ReconcileTarget`] for any concrete
/// Kubernetes resource type, reusing `k8s-openapi`'s `ObjectMeta` instead of
/// re-declaring the metadata fields the engine reads — the same convention
/// the operator's own `svc/k8s/resource.rs` and `svc/k8s/finalizer.rs`
/// helpers build on top of `kube::Resource`/`ResourceExt`.
impl<R> ReconcileTarget for R
where
    R: Resource<DynamicType = ()> + Clone + Send + Sync + std::fmt::Debug + 'static,
{
    fn uid(&self) -> Option<&str> {
        self.meta().uid.as_deref()
    }

    fn namespace(&self) -> Option<&str> {
        self.meta().namespace.as_deref()
    }

    fn name(&self) -> Option<&str> {
        self.meta().name.as_deref()
    }

    fn generation(&self) -> Option<i64> {
        self.meta().generation
    }

    fn resource_version(&self) -> Option<&str> {
        self.meta().resource_version.as_deref()
    }

    fn deletion_timestamp_set(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }

    fn finalizers(&self) -> &[String] {
        ResourceExt::finalizers(self)
    }

    fn finalizers_mut(&mut self) -> &mut Vec<String> {
        self.meta_mut().finalizers.get_or_insert_with(Vec::new)
    }
}
