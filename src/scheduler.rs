//! Ingests watch events, enforces single-flight-per-identity reconciliation,
//! schedules retries, and owns the single dedicated timer executor.

use std::collections::HashMap as StdHashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::time::delay_queue;
use tokio_util::time::DelayQueue;

use crate::dispatcher::{is_finalizer_honored_delete, EventDispatcher, ReplaceClient, ResourceController};
#[cfg(feature = "metrics")]
use crate::error::DispatchError;
use crate::error::WatchError;
use crate::event::{CustomResourceEvent, WatchAction};
use crate::identity::ResourceKey;
use crate::resource::{self, ReconcileTarget};
use crate::retry::{RetryExecution, RetryPolicy};
use crate::store::EventStore;

enum TimerCommand {
    Arm { id: ResourceKey, delay: Duration },
    Cancel { id: ResourceKey },
}

enum IngressOutcome {
    Coalesced,
    DroppedStaleGeneration,
    Parked,
    ReadyToSchedule(Option<Duration>),
}

/// Shared state between the public [`EventScheduler`] handle and the
/// executor task it spawns.
struct SchedulerCore<R: ReconcileTarget> {
    store: Mutex<EventStore<R>>,
    generation_aware: bool,
    retry_policy: Arc<dyn RetryPolicy>,
    timer_tx: mpsc::UnboundedSender<TimerCommand>,
}

impl<R: ReconcileTarget> SchedulerCore<R> {
    fn on_event(&self, action: WatchAction, resource: R) {
        let Some(uid) = resource.uid().map(str::to_owned) else {
            tracing::warn!("skipping malformed watch event with no resource uid");
            return;
        };
        let id = ResourceKey::from_uid(uid);
        let event = CustomResourceEvent::new(action, resource, RetryExecution::new(self.retry_policy.clone()));

        // Finalizer-honored delete shortcut: the server only emits DELETED
        // after every finalizer is removed, so the dispatcher already ran
        // the delete path on an earlier MODIFIED.
        if is_finalizer_honored_delete(action, &event.resource) {
            let had_under_processing = {
                let mut store = self.store.lock().expect("event store mutex poisoned");
                let had = store.contains_under_processing(&id);
                store.cleanup(&id);
                had
            };
            if had_under_processing {
                let _ = self.timer_tx.send(TimerCommand::Cancel { id });
            }
            return;
        }

        // Deletion requests never bump `generation` (it tracks spec changes,
        // not metadata), so the generation filter must not apply to the
        // delete path: otherwise a DELETE that lands at the same generation
        // as the last reconciled event would be silently dropped and the
        // finalizer's delete callback would never run.
        let is_delete_path = resource::deleted(&event.resource);

        // The entire decision, including the store write for the
        // "ready to schedule" case, happens under one lock acquisition so a
        // concurrent `on_event` for the same identity cannot also observe an
        // empty in-flight slot and schedule a second, overwriting event.
        let outcome = {
            let mut store = self.store.lock().expect("event store mutex poisoned");

            if self.generation_aware {
                store.add_last_event_for_generation_aware_retry(id.clone(), event.clone());
            }

            if store.contains_not_scheduled(&id) {
                store.add_or_replace_not_scheduled(id.clone(), event);
                IngressOutcome::Coalesced
            } else if self.generation_aware
                && !is_delete_path
                && !store.has_larger_generation_than_last_stored(&id, &event)
            {
                IngressOutcome::DroppedStaleGeneration
            } else if store.contains_under_processing(&id) {
                store.add_or_replace_not_scheduled(id.clone(), event);
                IngressOutcome::Parked
            } else {
                IngressOutcome::ReadyToSchedule(Self::schedule_locked(&mut store, &id, event))
            }
        };

        match outcome {
            IngressOutcome::Coalesced => {
                #[cfg(feature = "metrics")]
                crate::metrics::EVENTS_COALESCED.inc();
            }
            IngressOutcome::DroppedStaleGeneration | IngressOutcome::Parked => {}
            IngressOutcome::ReadyToSchedule(Some(delay)) => {
                let _ = self.timer_tx.send(TimerCommand::Arm { id, delay });
            }
            IngressOutcome::ReadyToSchedule(None) => {}
        }
    }

    /// Computes `event`'s next delay and, if it has not exhausted its retry
    /// policy, writes it into the in-flight slot for `id`. Drops it with a
    /// warning otherwise.
    ///
    /// Must be called with `store`'s lock already held by the caller, so
    /// that the caller's "is anything else in flight for `id`" check and
    /// this write land in the same critical section.
    fn schedule_locked(
        store: &mut EventStore<R>,
        id: &ResourceKey,
        event: CustomResourceEvent<R>,
    ) -> Option<Duration> {
        let Some(delay) = event.retry.next_delay() else {
            tracing::warn!(identity = %id, "retry policy exhausted, dropping event");
            #[cfg(feature = "metrics")]
            crate::metrics::RETRIES_EXHAUSTED.inc();
            return None;
        };
        store.add_under_processing_and_update_last_generation(id.clone(), event);
        Some(delay)
    }

    /// Arms a timer for `event`, or drops it with a warning if its retry
    /// policy is already exhausted. Acquires the store lock itself; callers
    /// that already hold it (the ingress path) use [`Self::schedule_locked`]
    /// directly instead.
    fn schedule_event_for_execution(&self, id: ResourceKey, event: CustomResourceEvent<R>) {
        let delay = {
            let mut store = self.store.lock().expect("event store mutex poisoned");
            Self::schedule_locked(&mut store, &id, event)
        };
        if let Some(delay) = delay {
            let _ = self.timer_tx.send(TimerCommand::Arm { id, delay });
        }
    }

    fn promote_not_scheduled(&self, id: &ResourceKey) -> Option<CustomResourceEvent<R>> {
        let mut store = self.store.lock().expect("event store mutex poisoned");
        let parked = store.remove_not_scheduled(id)?;
        drop(store);
        Some(CustomResourceEvent::new(
            parked.action,
            parked.resource,
            RetryExecution::new(self.retry_policy.clone()),
        ))
    }

    fn on_success(&self, id: &ResourceKey) {
        {
            let mut store = self.store.lock().expect("event store mutex poisoned");
            store.remove_under_processing(id);
        }
        if let Some(fresh) = self.promote_not_scheduled(id) {
            self.schedule_event_for_execution(id.clone(), fresh);
        }
    }

    fn on_failure(&self, id: &ResourceKey, failed_event: CustomResourceEvent<R>) {
        {
            let mut store = self.store.lock().expect("event store mutex poisoned");
            store.remove_under_processing(id);
        }

        if let Some(fresh) = self.promote_not_scheduled(id) {
            // A newer spec supersedes the one that failed: its retry clock
            // is discarded entirely.
            self.schedule_event_for_execution(id.clone(), fresh);
            return;
        }

        let mut retrying = failed_event;
        retrying.retry.advance();

        if self.generation_aware {
            let store = self.store.lock().expect("event store mutex poisoned");
            if let Some(last) = store.last_received_event(id) {
                if last.resource.resource_version() != retrying.resource.resource_version() {
                    retrying.resource = last.resource.clone();
                }
            }
        }

        self.schedule_event_for_execution(id.clone(), retrying);
    }
}

/// Public handle to a running scheduler. Dropping it stops the executor
/// task.
pub struct EventScheduler<R: ReconcileTarget> {
    core: Arc<SchedulerCore<R>>,
    executor: tokio::task::JoinHandle<()>,
}

impl<R: ReconcileTarget> EventScheduler<R> {
    /// Spawns the dedicated executor task and returns a handle wired
    /// against `dispatcher`.
    pub fn spawn<C, P>(
        dispatcher: EventDispatcher<C, P>,
        generation_aware: bool,
        retry_policy: Arc<dyn RetryPolicy>,
    ) -> Self
    where
        C: ResourceController<R> + 'static,
        P: ReplaceClient<R> + 'static,
    {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let core = Arc::new(SchedulerCore {
            store: Mutex::new(EventStore::new()),
            generation_aware,
            retry_policy,
            timer_tx,
        });

        let executor_core = core.clone();
        let dispatcher = Arc::new(dispatcher);
        let executor = tokio::spawn(run_executor(executor_core, dispatcher, timer_rx));

        Self { core, executor }
    }

    /// Watch sink entry point: `onEvent`.
    pub fn on_event(&self, action: WatchAction, resource: R) {
        self.core.on_event(action, resource);
    }

    /// Watch sink entry point: `onClose`. Logs at error
    /// level and returns a [`WatchError`] the embedding binary is expected
    /// to turn into a nonzero process exit.
    pub fn on_close(
        &self,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> WatchError {
        tracing::error!(error = %error, "watch stream closed with an unrecoverable error");
        WatchError::Closed(Box::new(error))
    }
}

impl<R: ReconcileTarget> Drop for EventScheduler<R> {
    fn drop(&mut self) {
        self.executor.abort();
    }
}

async fn run_executor<R, C, P>(
    core: Arc<SchedulerCore<R>>,
    dispatcher: Arc<EventDispatcher<C, P>>,
    mut commands: mpsc::UnboundedReceiver<TimerCommand>,
) where
    R: ReconcileTarget,
    C: ResourceController<R>,
    P: ReplaceClient<R>,
{
    let mut queue: DelayQueue<ResourceKey> = DelayQueue::new();
    let mut keys: StdHashMap<ResourceKey, delay_queue::Key> = StdHashMap::new();

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(TimerCommand::Arm { id, delay }) => {
                        if let Some(existing) = keys.remove(&id) {
                            queue.remove(&existing);
                        }
                        let key = queue.insert(id.clone(), delay);
                        keys.insert(id, key);
                    }
                    Some(TimerCommand::Cancel { id }) => {
                        if let Some(existing) = keys.remove(&id) {
                            queue.remove(&existing);
                        }
                    }
                    None => break,
                }
            }
            expired = queue.next(), if !queue.is_empty() => {
                if let Some(expired) = expired {
                    let id = expired.into_inner();
                    keys.remove(&id);
                    dispatch_one(&core, &dispatcher, id).await;
                }
            }
        }
    }
}

/// Exactly one reconciliation runs at a time: `dispatch_one` is only ever
/// invoked from `run_executor`'s single loop, and it is awaited to
/// completion before the next `select!` iteration begins.
async fn dispatch_one<R, C, P>(
    core: &Arc<SchedulerCore<R>>,
    dispatcher: &Arc<EventDispatcher<C, P>>,
    id: ResourceKey,
) where
    R: ReconcileTarget,
    C: ResourceController<R>,
    P: ReplaceClient<R>,
{
    let event = {
        let store = core.store.lock().expect("event store mutex poisoned");
        store.peek_under_processing(&id)
    };
    let Some(event) = event else {
        // Cancelled between expiry and now; nothing to do.
        return;
    };

    match dispatcher.reconcile(&event).await {
        Ok(()) => core.on_success(&id),
        Err(error) => {
            tracing::warn!(identity = %id, error = %error, "reconciliation failed");
            #[cfg(feature = "metrics")]
            crate::metrics::RECONCILIATION_FAILED
                .with_label_values(&[dispatch_error_kind(&error)])
                .inc();
            core.on_failure(&id, event);
        }
    }
}

#[cfg(feature = "metrics")]
fn dispatch_error_kind<C, P>(error: &DispatchError<C, P>) -> &'static str
where
    C: std::error::Error + 'static,
    P: std::error::Error + 'static,
{
    match error {
        DispatchError::Controller(_) => "controller",
        DispatchError::Persistence(_) => "persistence",
        DispatchError::MalformedEvent => "malformed_event",
    }
}
