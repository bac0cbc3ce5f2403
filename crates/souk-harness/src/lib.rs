//! Deterministic simulation harness for the Souk chat sync core.
//!
//! In-process implementations of the transport and every host collaborator,
//! plus a [`SimEnv`] on tokio's pausable clock, so whole sessions (connect,
//! traffic, drops, backoff, identity switches) run reproducibly in virtual
//! time.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks behavioral properties against snapshots of
//! a running service. Use [`InvariantRegistry::standard()`] after every step
//! of a scenario.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fake_transport;
pub mod fakes;
pub mod invariants;
pub mod sim_env;
pub mod wire;
pub mod world;

pub use fake_transport::{FakeTransport, Invocation};
pub use fakes::{FakeHistory, MemoryStore, RecordingPresenter};
pub use invariants::{
    ClientSnapshot, Invariant, InvariantRegistry, InvariantResult, SystemSnapshot, Violation,
};
pub use sim_env::SimEnv;
pub use world::{SimCoordinator, SimService, SimWorld, session};
