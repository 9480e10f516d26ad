//! Pulse measurement beacon client
//!
//! This crate is the runtime half of the Pulse SDK. It records timing and
//! metric measurements for named applications and relays them as
//! asynchronous beacons (HTTP GETs with query-encoded parameters) to a
//! remote collection endpoint.
//!
//! The moving parts:
//!
//! - [`Transport`]: the abstract "GET a URL" capability, with a
//!   reqwest-backed [`HttpTransport`] for production and an in-memory
//!   [`MemoryTransport`] for tests
//! - the configuration manager inside [`App`]: fetches, merges and
//!   periodically refreshes the remote configuration document, gating
//!   beacon readiness
//! - the beacon queue and drainer inside [`App`]: buffers measurements
//!   until configuration is ready, then drains them FIFO, one at a time
//! - [`Pulse`]: the registry owning app instances, with a default app
//!   set to the first one created
//!
//! Nothing is ever sent synchronously inline with the triggering call:
//! every send happens on a fresh task.
//!
//! ```no_run
//! use pulse_client::{AppOptions, Pulse};
//!
//! # async fn demo() {
//! let pulse = Pulse::new();
//! let app = pulse
//!     .init("api-key", Some("secret-key"), AppOptions::default())
//!     .await;
//!
//! let timer = app.start_timer("checkout").await;
//! // ... the measured work ...
//! app.stop_timer(timer).await;
//! app.send_metric("conversion", None).await;
//! # }
//! ```

pub mod app;
pub mod registry;
pub mod signer;
pub mod transport;

pub use app::{App, BeaconEvent, TimingConfig};
pub use registry::{AppOptions, Pulse, DEFAULT_CONFIG_URL};
pub use signer::sign_config_request;
pub use transport::{FetchRecord, HttpTransport, MemoryTransport, Transport};

// Re-export the core data model at the crate root.
pub use pulse_core::{
    BeaconParams, BoomerangSession, ConfigDocument, DefinitionTables, EventKind, PulseError,
    PulseResult, QueuedEvent, SessionState,
};
