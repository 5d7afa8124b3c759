//! Minimal resource-metadata contract and the predicates built on top of it.
//!
//! The core engine is generic over any resource payload that can answer a
//! handful of metadata questions, so it does not require the `kube-client`
//! feature to compile or to be tested. When that feature is enabled, a
//! blanket implementation wires up real `kube::Resource` types (see
//! `adapters::kube_client`).

/// Everything the scheduler and dispatcher need to know about a resource's
/// Kubernetes object metadata.
///
/// Deliberately narrower than `kube::Resource`/`ResourceExt`: it exposes only
/// the fields the reconciliation engine reads or mutates.
pub trait ReconcileTarget: Clone + Send + Sync + std::fmt::Debug + 'static {
    fn uid(&self) -> Option<&str>;
    fn namespace(&self) -> Option<&str>;
    fn name(&self) -> Option<&str>;
    fn generation(&self) -> Option<i64>;
    fn resource_version(&self) -> Option<&str>;
    /// `true` iff the API server has recorded a deletion request (i.e.
    /// `metadata.deletionTimestamp` is set).
    fn deletion_timestamp_set(&self) -> bool;
    fn finalizers(&self) -> &[String];
    fn finalizers_mut(&mut self) -> &mut Vec<String>;
}

/// `true` iff the API server has recorded a deletion request for `target`.
pub fn deleted<T: ReconcileTarget>(target: &T) -> bool {
    target.deletion_timestamp_set()
}

/// `(namespace, name)` pair, each defaulting to an empty string when absent
/// (cluster-scoped resources have no namespace).
pub fn namespaced_name<T: ReconcileTarget>(target: &T) -> (String, String) {
    (
        target.namespace().unwrap_or_default().to_owned(),
        target.name().unwrap_or_default().to_owned(),
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::ReconcileTarget;

    #[derive(Debug, Clone, Default)]
    pub struct FakeResource {
        pub uid: Option<String>,
        pub namespace: Option<String>,
        pub name: Option<String>,
        pub generation: Option<i64>,
        pub resource_version: Option<String>,
        pub deletion_timestamp: Option<String>,
        pub finalizers: Vec<String>,
    }

    impl FakeResource {
        pub fn new(uid: &str) -> Self {
            Self {
                uid: Some(uid.to_owned()),
                name: Some(uid.to_owned()),
                generation: Some(1),
                resource_version: Some("1".to_owned()),
                ..Default::default()
            }
        }
    }

    impl ReconcileTarget for FakeResource {
        fn uid(&self) -> Option<&str> {
            self.uid.as_deref()
        }

        fn namespace(&self) -> Option<&str> {
            self.namespace.as_deref()
        }

        fn name(&self) -> Option<&str> {
            self.name.as_deref()
        }

        fn generation(&self) -> Option<i64> {
            self.generation
        }

        fn resource_version(&self) -> Option<&str> {
            self.resource_version.as_deref()
        }

        fn deletion_timestamp_set(&self) -> bool {
            self.deletion_timestamp.is_some()
        }

        fn finalizers(&self) -> &[String] {
            &self.finalizers
        }

        fn finalizers_mut(&mut self) -> &mut Vec<String> {
            &mut self.finalizers
        }
    }
}
