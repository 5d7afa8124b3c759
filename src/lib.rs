//! # kube-reconcile-core
//!
//! Event scheduling and finalizer-aware dispatch engine for building
//! Kubernetes custom-resource operators.
//!
//! Two tightly coupled subsystems do the work: [`scheduler::EventScheduler`]
//! enforces at-most-one in-flight reconciliation per resource identity,
//! coalesces superseded events and schedules retries with exponential
//! backoff; [`dispatcher::EventDispatcher`] owns the finalizer protocol and
//! invokes the embedding operator's [`dispatcher::ResourceController`].
//!
//! The crate does not watch a Kubernetes API server, run an HTTP client, or
//! register CRDs itself — those are external collaborators
//! ([`watch::WatchSource`], [`dispatcher::ReplaceClient`]) whose contracts
//! this crate defines but does not fulfil, except optionally behind the
//! `kube-client` feature (see [`adapters`]).

pub mod dispatcher;
pub mod error;
pub mod event;
pub mod finalizer;
pub mod identity;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod registration;
pub mod resource;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod watch;

#[cfg(feature = "kube-client")]
pub mod adapters;

pub use dispatcher::{EventDispatcher, ReplaceClient, ResourceController};
pub use error::{DispatchError, WatchError};
pub use event::{CustomResourceEvent, WatchAction};
pub use finalizer::DEFAULT_FINALIZER;
pub use identity::ResourceKey;
pub use registration::{ControllerRegistration, NamespaceFilter, RetryConfig};
pub use resource::ReconcileTarget;
pub use retry::{GenericRetry, RetryExecution, RetryPolicy};
pub use scheduler::EventScheduler;
pub use watch::WatchSource;
