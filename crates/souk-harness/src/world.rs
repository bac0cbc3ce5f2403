//! A simulated host: one environment, one transport and one set of
//! in-memory collaborators, wired into services on demand.

use std::sync::Arc;

use souk_client::{ChatService, Collaborators, SessionCoordinator, SharedScreen};
use souk_core::{Credential, Environment, Session, SyncConfig, SyncError, UserId};

use crate::{
    fake_transport::FakeTransport,
    fakes::{FakeHistory, MemoryStore, RecordingPresenter},
    invariants::{ClientSnapshot, SystemSnapshot},
    sim_env::SimEnv,
};

/// Default history page size.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Service type every harness scenario drives.
pub type SimService = ChatService<FakeTransport, SimEnv>;

/// Coordinator type every harness scenario drives.
pub type SimCoordinator = SessionCoordinator<FakeTransport, SimEnv>;

/// Simulated host.
#[derive(Clone)]
pub struct SimWorld {
    /// Virtual clock and seeded RNG
    pub env: SimEnv,
    /// Server side of the real-time channel
    pub transport: FakeTransport,
    /// Notification presenter
    pub presenter: RecordingPresenter,
    /// Server-side message history
    pub history: FakeHistory,
    /// Persisted key-value store
    pub store: MemoryStore,
    /// Conversation on screen
    pub screen: SharedScreen,
}

impl SimWorld {
    /// Fresh host seeded with `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            env: SimEnv::with_seed(seed),
            transport: FakeTransport::new(),
            presenter: RecordingPresenter::new(),
            history: FakeHistory::new(DEFAULT_PAGE_SIZE),
            store: MemoryStore::new(),
            screen: SharedScreen::new(),
        }
    }

    /// Collaborators backed by this world's fakes.
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            presenter: Arc::new(self.presenter.clone()),
            history: Arc::new(self.history.clone()),
            screen: Arc::new(self.screen.clone()),
        }
    }

    /// A stopped service wired to this world.
    ///
    /// # Errors
    ///
    /// - `SyncError::Configuration` if `config` fails validation
    pub fn service(&self, config: SyncConfig) -> Result<SimService, SyncError> {
        ChatService::new(self.transport.clone(), self.env.clone(), self.collaborators(), config)
    }

    /// A coordinator around a fresh service.
    ///
    /// # Errors
    ///
    /// - `SyncError::Configuration` if `config` fails validation
    pub fn coordinator(&self, config: SyncConfig) -> Result<SimCoordinator, SyncError> {
        let service = self.service(config)?;
        Ok(SessionCoordinator::new(service, Arc::new(self.store.clone()), self.env.clone()))
    }

    /// A service already connected as `identity` (credential `tok-{identity}`),
    /// with the connect-time invocations cleared and events drained.
    ///
    /// # Errors
    ///
    /// - `SyncError::Configuration` for a blank identity
    pub async fn connected_service(&self, identity: &str) -> Result<SimService, SyncError> {
        let mut service = self.service(SyncConfig::default())?;
        service.begin_session(session(identity, &format!("tok-{identity}"))?).await?;
        service.take_events();
        self.transport.clear_invocations();
        Ok(service)
    }

    /// Snapshot `service` for invariant checks.
    pub fn snapshot<E: Environment>(
        &self,
        service: &ChatService<FakeTransport, E>,
    ) -> SystemSnapshot {
        SystemSnapshot::single(ClientSnapshot::capture("client", service, &self.presenter))
    }
}

/// Session for `identity` with credential `token`.
///
/// # Errors
///
/// - `SyncError::Configuration` if either part is blank
pub fn session(identity: &str, token: &str) -> Result<Session, SyncError> {
    Session::new(UserId::new(identity), Credential::new(token))
}
