//! Error kinds surfaced by the dispatcher and scheduler.

use thiserror::Error;

/// Errors a [`crate::dispatcher::EventDispatcher`] can report back to the
/// scheduler. Both variants are treated identically by the scheduler's
/// failure path: the event is retried per its
/// [`crate::retry::RetryExecution`] until exhaustion.
#[derive(Debug, Error)]
pub enum DispatchError<C, P>
where
    C: std::error::Error + 'static,
    P: std::error::Error + 'static,
{
    #[error("controller failed to reconcile resource: {0}")]
    Controller(#[source] C),

    #[error("failed to persist resource: {0}")]
    Persistence(#[source] P),

    #[error("event has no resource uid, skipping")]
    MalformedEvent,
}

/// Errors surfaced out of the scheduler's watch sink, corresponding to
/// a fatal watch closure.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watch stream closed with an unrecoverable error: {0}")]
    Closed(#[source] Box<dyn std::error::Error + Send + Sync>),
}
