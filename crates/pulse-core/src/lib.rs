//! Core data model for the Pulse measurement beacon SDK
//!
//! This crate holds the pure, I/O-free half of the SDK:
//!
//! - [`ConfigDocument`]: the server-delivered configuration document,
//!   merged (not replaced) across refreshes
//! - [`DefinitionTables`]: the name-to-wire-label mappings for custom
//!   metrics, timers and dimensions, rebuilt wholesale on every parse
//! - [`QueuedEvent`]: one buffered measurement with the app state that
//!   was current at enqueue time
//! - [`BeaconParams`]: the ordered, percent-encodable parameter map a
//!   beacon is serialized from
//! - Session state and the session-id helpers
//!
//! The runtime half (transport, configuration manager, queue drainer,
//! app facade, registry) lives in `pulse-client`.

pub mod beacon;
pub mod config;
pub mod error;
pub mod event;
pub mod session;

pub use beacon::{resolve_event, BeaconParams};
pub use config::{ConfigDocument, DefinitionTables};
pub use error::{PulseError, PulseResult};
pub use event::{is_valid_ab_bucket, EventKind, QueuedEvent};
pub use session::{generate_session_id, BoomerangSession, SessionState};
