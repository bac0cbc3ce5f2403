//! Identity-switch coordinator.
//!
//! Watches the session provider and executes [`IdentityTracker`] decisions
//! against the service and the persisted store. While idle between session
//! changes it drives the service's event loop, so a host only needs to spawn
//! [`SessionCoordinator::run`].
//!
//! ```text
//!   session A ──► B:  teardown(A) ── settle ──► start(B)
//!                                      │
//!                            C arrives │ abandon start(B)
//!                                      ▼
//!                               settle ──► start(C)
//! ```

use std::sync::Arc;

use souk_core::{
    Environment, IdentityTracker, Session, SessionAction, SessionConfig, SyncError, UserId,
};
use tokio::sync::watch;

use crate::{collaborators::KeyValueStore, service::ChatService, transport::Transport};

/// How a batch of session actions ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    /// Every action ran.
    Done,
    /// The session changed during a settle delay.
    Superseded,
    /// The session provider went away.
    Closed,
}

/// Orders teardown, settle and start across identity changes.
pub struct SessionCoordinator<T, E: Environment> {
    service: ChatService<T, E>,
    tracker: IdentityTracker,
    store: Arc<dyn KeyValueStore>,
    config: SessionConfig,
    env: E,
}

impl<T: Transport, E: Environment> SessionCoordinator<T, E> {
    /// Wrap `service`. The session settings come from the service's config.
    pub fn new(service: ChatService<T, E>, store: Arc<dyn KeyValueStore>, env: E) -> Self {
        let config = service.config().session.clone();
        Self { tracker: IdentityTracker::new(config.settle_delay), service, store, config, env }
    }

    /// The coordinated service.
    pub fn service(&self) -> &ChatService<T, E> {
        &self.service
    }

    /// The coordinated service, for user operations.
    pub fn service_mut(&mut self) -> &mut ChatService<T, E> {
        &mut self.service
    }

    /// Apply one session value and run the resulting actions to completion,
    /// including any settle delay.
    ///
    /// # Errors
    ///
    /// - `SyncError::Configuration` or `SyncError::ReconnectExhausted` if the
    ///   new session cannot be started
    pub async fn apply(&mut self, session: Option<Session>) -> Result<(), SyncError> {
        let actions = self.tracker.observe(session);
        self.execute(actions, None).await.map(|_| ())
    }

    /// Follow `sessions` until the provider is dropped, driving the service
    /// in between. The last identity is torn down before returning.
    pub async fn run(&mut self, sessions: &mut watch::Receiver<Option<Session>>) {
        let mut observe = true;

        loop {
            if observe {
                observe = false;
                let session = sessions.borrow_and_update().clone();
                let actions = self.tracker.observe(session);

                match self.execute(actions, Some(&mut *sessions)).await {
                    Ok(Progress::Done) => {},
                    Ok(Progress::Superseded) => {
                        self.tracker.interrupt();
                        observe = true;
                        continue;
                    },
                    Ok(Progress::Closed) => break,
                    Err(err) => tracing::warn!(error = %err, "session start failed"),
                }
            }

            tokio::select! {
                changed = sessions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    observe = true;
                },
                wakeup = self.service.next_wakeup() => self.service.handle_wakeup(wakeup).await,
            }
        }

        tracing::info!("session provider closed");
        self.service.teardown().await;
    }

    async fn execute(
        &mut self,
        actions: Vec<SessionAction>,
        mut sessions: Option<&mut watch::Receiver<Option<Session>>>,
    ) -> Result<Progress, SyncError> {
        for action in actions {
            match action {
                SessionAction::Teardown { identity } => {
                    tracing::info!(%identity, "tearing down identity");
                    self.service.teardown().await;
                },
                SessionAction::ClearPersisted { identity } => self.clear_persisted(&identity).await,
                SessionAction::Settle(delay) => {
                    tracing::debug!(?delay, "settling before restart");
                    let Some(rx) = sessions.as_deref_mut() else {
                        self.env.sleep(delay).await;
                        continue;
                    };
                    tokio::select! {
                        () = self.env.sleep(delay) => {},
                        changed = rx.changed() => {
                            return Ok(match changed {
                                Ok(()) => {
                                    tracing::info!("identity switch superseded");
                                    Progress::Superseded
                                },
                                Err(_) => Progress::Closed,
                            });
                        },
                    }
                },
                SessionAction::Start(session) => self.service.begin_session(session).await?,
                SessionAction::RefreshCredential(session) => {
                    self.service.refresh_credential(session);
                },
            }
        }
        Ok(Progress::Done)
    }

    async fn clear_persisted(&self, identity: &UserId) {
        let namespace = self.config.identity_namespace(identity);
        if let Err(err) = self.store.clear_prefix(&namespace).await {
            tracing::warn!(%identity, error = %err, "clearing persisted keys failed");
        }
        let active = self.config.active_conversation_key();
        if let Err(err) = self.store.delete(&active).await {
            tracing::warn!(%identity, error = %err, "clearing active conversation failed");
        }
        self.service.set_active_conversation(None);
    }
}
