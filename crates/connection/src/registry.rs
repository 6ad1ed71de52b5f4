//! Inbound frame dispatch.
//!
//! One [`HandlerRegistry`] per connection, owned by the manager, shared
//! with the read pump, surviving reconnects and session substitution.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use tracing::{trace, warn};

use pulsedesk_protocol::Frame;

/// Key under which a handler receives every frame regardless of type.
pub const WILDCARD: &str = "*";

/// Callback invoked with each matching inbound frame.
pub type Handler = Arc<dyn Fn(&Frame) + Send + Sync>;

struct Entry {
    frame_type: String,
    key: String,
    handler: Handler,
}

/// Ordered mapping from frame type to registered handlers.
///
/// Handlers are identified by a caller-chosen key per type; registering the
/// same `(type, key)` again replaces the handler in place, so one identity
/// is never invoked twice for the same frame. Invocation follows
/// registration order, type-matched handlers first, then wildcard handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: Mutex<Vec<Entry>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a frame type (or [`WILDCARD`]).
    pub fn register(&self, frame_type: &str, key: &str, handler: Handler) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries
            .iter_mut()
            .find(|e| e.frame_type == frame_type && e.key == key)
        {
            entry.handler = handler;
            return;
        }
        entries.push(Entry {
            frame_type: frame_type.to_string(),
            key: key.to_string(),
            handler,
        });
    }

    /// Removes a handler. Returns `true` if it was registered.
    pub fn unregister(&self, frame_type: &str, key: &str) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|e| !(e.frame_type == frame_type && e.key == key));
        entries.len() != before
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Parses and dispatches a raw inbound frame.
    ///
    /// Malformed JSON is logged and dropped; nothing propagates across the
    /// transport boundary.
    pub fn dispatch(&self, raw: &str, forward_control: bool) {
        let frame: Frame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("failed to parse frame: {e}");
                return;
            }
        };
        self.dispatch_frame(&frame, forward_control);
    }

    /// Dispatches a decoded frame to matching handlers, then wildcards.
    pub fn dispatch_frame(&self, frame: &Frame, forward_control: bool) {
        if frame.is_control() && !forward_control {
            trace!(frame_type = %frame.frame_type, "control frame consumed");
            return;
        }

        // Snapshot under the lock so handlers can register/unregister for
        // the next frame without deadlocking this dispatch.
        let matching: Vec<Handler> = {
            let entries = self.entries.lock().unwrap();
            entries
                .iter()
                .filter(|e| e.frame_type == frame.frame_type)
                .chain(entries.iter().filter(|e| e.frame_type == WILDCARD))
                .map(|e| e.handler.clone())
                .collect()
        };

        if matching.is_empty() {
            trace!(frame_type = %frame.frame_type, "no handler registered");
            return;
        }

        for handler in matching {
            // A panicking handler must not take down the read pump or the
            // remaining handlers.
            if catch_unwind(AssertUnwindSafe(|| handler(frame))).is_err() {
                warn!(frame_type = %frame.frame_type, "handler panicked");
            }
        }
    }
}
