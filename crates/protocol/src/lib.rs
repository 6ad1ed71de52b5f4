//! Wire protocol for the Pulsedesk real-time channels.
//!
//! Defines the message envelope shared by every channel, the reserved
//! frame types and close codes, and the endpoint path builders.

pub mod channels;
pub mod constants;
pub mod envelope;

pub use envelope::Frame;
