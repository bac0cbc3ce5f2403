//! Souk client runtime
//!
//! Executes the actions produced by [`souk_core`] against a real-time
//! transport on tokio. The state machines decide; this crate performs the
//! I/O, owns the event channel and drives the timers.
//!
//! # Components
//!
//! - [`ChatService`]: connection lifecycle, cache synchronizer and
//!   notification facade wired to a [`Transport`]
//! - [`SessionCoordinator`]: identity-switch ordering driven by a session
//!   watch channel
//! - [`Transport`]: the real-time channel capability
//! - [`Presenter`], [`HistorySource`], [`KeyValueStore`], [`ScreenTracker`]:
//!   host collaborators
//! - [`SystemEnv`]: production environment (system clocks, OS RNG)
//!
//! # Driving
//!
//! Transport callbacks only enqueue. Either spawn
//! [`SessionCoordinator::run`] with the session provider's watch receiver,
//! or call [`ChatService::poll`] in a loop alongside user operations.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod collaborators;
mod coordinator;
mod service;
mod system_env;
mod transport;

pub use collaborators::{
    HistoryError, HistorySource, KeyValueStore, Presenter, ScreenTracker, SharedScreen, StoreError,
};
pub use coordinator::SessionCoordinator;
pub use service::{ChatService, Collaborators, FailedSend, Inbound, ServiceEvent, Wakeup};
pub use souk_core::{Environment, Session, SyncConfig, SyncError};
pub use system_env::SystemEnv;
pub use transport::{
    Detach, InboundHandler, LifecycleEvent, LifecycleHandler, Transport, TransportError,
    TransportState,
};
