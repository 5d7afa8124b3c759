//! External watch-source contract: delivers
//! `(action, resource)` tuples into an [`EventScheduler`] and signals
//! unrecoverable stream closure.

use async_trait::async_trait;

use crate::error::WatchError;
use crate::resource::ReconcileTarget;
use crate::scheduler::EventScheduler;

/// Drives watch notifications into an [`EventScheduler`] until the
/// underlying connection closes for good.
///
/// Implementations are expected to reconnect silently during normal
/// operation: the watch client is assumed to handle transparent
/// reconnection internally, so `run` should only return once the stream
/// truly cannot continue. At that point it reports the terminal error via
/// [`EventScheduler::on_close`] and propagates it to the caller, which is
/// expected to exit the process, since rebuilding scheduler state requires
/// a full re-list this crate does not perform on its own.
#[async_trait]
pub trait WatchSource<R: ReconcileTarget>: Send {
    /// Feeds `scheduler` until the watch stream ends or becomes
    /// unrecoverable.
    async fn run(self, scheduler: &EventScheduler<R>) -> Result<(), WatchError>;
}
