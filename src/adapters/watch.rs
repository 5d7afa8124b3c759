//! [`WatchSource`] backed by `kube::runtime::watcher`.

use async_trait::async_trait;
use futures::StreamExt;
use kube::runtime::watcher::{self, Event};
use kube::{Api, Resource};
use serde::de::DeserializeOwned;

use crate::error::WatchError;
use crate::event::WatchAction;
use crate::resource::ReconcileTarget;
use crate::scheduler::EventScheduler;
use crate::watch::WatchSource;

/// Translates a `kube::runtime::watcher` stream into
/// [`EventScheduler::on_event`] calls, matching the operator's own
/// `svc/k8s/mod.rs::Watcher::watch` loop: `try_next` inside a loop, logging
/// and surfacing `on_close` only when the stream itself terminates, since
/// the `watcher` combinator already retries transient connection faults
/// internally.
pub struct KubeWatchSource<R: Resource> {
    api: Api<R>,
    config: watcher::Config,
}

impl<R> KubeWatchSource<R>
where
    R: Resource<DynamicType = ()> + Clone + DeserializeOwned + std::fmt::Debug + Send + Sync + 'static,
{
    pub fn new(api: Api<R>, config: watcher::Config) -> Self {
        Self { api, config }
    }
}

#[async_trait]
impl<R> WatchSource<R> for KubeWatchSource<R>
where
    R: ReconcileTarget
        + Resource<DynamicType = ()>
        + DeserializeOwned
        + Clone
        + std::fmt::Debug
        + Send
        + Sync
        + 'static,
{
    async fn run(self, scheduler: &EventScheduler<R>) -> Result<(), WatchError> {
        let mut stream = watcher::watcher(self.api, self.config).boxed();

        loop {
            match stream.next().await {
                Some(Ok(Event::Applied(resource))) => {
                    scheduler.on_event(WatchAction::Modified, resource);
                }
                Some(Ok(Event::Deleted(resource))) => {
                    scheduler.on_event(WatchAction::Deleted, resource);
                }
                Some(Ok(Event::Restarted(resources))) => {
                    for resource in resources {
                        scheduler.on_event(WatchAction::Modified, resource);
                    }
                }
                Some(Err(error)) => {
                    tracing::error!(error = %error, "watch stream reported an unrecoverable error");
                    return Err(scheduler.on_close(error));
                }
                None => {
                    tracing::debug!("watch stream ended without error");
                    return Ok(());
                }
            }
        }
    }
}
