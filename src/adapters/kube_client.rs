//! [`ReplaceClient`] backed by `kube::Api::replace`.

use async_trait::async_trait;
use kube::api::PostParams;
use kube::{Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::dispatcher::ReplaceClient;

/// Errors from submitting a resource through [`KubeReplaceClient`].
#[derive(Debug, thiserror::Error)]
pub enum KubeReplaceError {
    #[error("resource has no name, cannot replace it")]
    Unnamed,
    #[error("failed to replace resource: {0}")]
    Replace(#[source] kube::Error),
}

/// [`ReplaceClient`] implementation over `kube::Api<R>::replace`, which
/// already enforces optimistic-lock semantics server-side when the
/// submitted object carries a `resourceVersion`. Submits the resource
/// directly rather than diffing and sending a JSON patch, and maps
/// `kube::Error` through `thiserror`.
pub struct KubeReplaceClient<R: Resource> {
    api: Api<R>,
}

impl<R> KubeReplaceClient<R>
where
    R: Resource<DynamicType = ()> + Clone + DeserializeOwned + std::fmt::Debug + Send + Sync,
{
    pub fn new(api: Api<R>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl<R> ReplaceClient<R> for KubeReplaceClient<R>
where
    R: Resource<DynamicType = ()>
        + Serialize
        + DeserializeOwned
        + Clone
        + std::fmt::Debug
        + Send
        + Sync
        + 'static,
{
    type Error = KubeReplaceError;

    async fn replace_with_lock(&self, resource: R) -> Result<(), Self::Error> {
        let name = resource.name_any();
        if name.is_empty() {
            return Err(KubeReplaceError::Unnamed);
        }

        self.api
            .replace(&name, &PostParams::default(), &resource)
            .await
            .map(|_| ())
            .map_err(KubeReplaceError::Replace)
    }
}
