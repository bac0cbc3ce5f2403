//! Souk sync core
//!
//! Pure state machines for the real-time chat connection and synchronization
//! layer. Nothing here performs I/O or reads a clock: time is passed in, and
//! every decision comes back as a list of actions for a driver to execute.
//! The same code runs in production and under deterministic simulation.
//!
//! # Components
//!
//! - [`Connection`]: connection lifecycle, backoff and heartbeat timers
//! - [`MessageCache`]: per-partner message cache with derived views
//! - [`Notifier`]: notification facade with screen filter and [`Deduplicator`]
//! - [`IdentityTracker`]: identity-switch decisions
//! - [`protocol`]: inbound event normalization and outbound calls

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cache;
pub mod config;
pub mod connection;
pub mod dedup;
pub mod env;
pub mod error;
pub mod notify;
pub mod protocol;
pub mod session;
pub mod types;

pub use cache::{MessageCache, PartnerSummary, UnreadCounter};
pub use config::SyncConfig;
pub use connection::{Backoff, Connection, ConnectionAction, ConnectionConfig, ConnectionState};
pub use dedup::{DedupKey, Deduplicator};
pub use env::{Environment, Timepoint};
pub use error::{PayloadError, SyncError};
pub use notify::{
    DedupPolicy, NotificationData, NotificationId, NotificationRecord, NotificationRequest,
    NotificationSource, Notifier, NotifierAction, NotifierConfig, ShowContext, ShowOutcome,
};
pub use protocol::{InboundEvent, InboundKind, MessageNotice, OutboundCall};
pub use session::{IdentityTracker, SessionAction, SessionConfig};
pub use types::{ChatMessage, Credential, MessageId, Session, UserId};
