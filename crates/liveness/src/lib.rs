//! Backend liveness probe.
//!
//! Independent of any feature connection: answers only "is the backend
//! reachable at all" by running a periodic HTTP readiness check and a
//! dedicated heartbeat socket in parallel, both feeding one combined
//! tri-state. The UI shell consumes the disconnect/reconnect callbacks to
//! toggle its fallback overlay; this crate owns no UI state.

pub mod probe;
pub(crate) mod http;
pub(crate) mod socket;
pub mod tracker;
pub mod types;

pub use probe::LivenessProbe;
pub use tracker::{LivenessTransition, ProbeTracker};
pub use types::{LivenessState, ProbeConfig};
