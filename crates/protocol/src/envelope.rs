use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants;

/// Envelope for all real-time channel traffic.
///
/// The `data` field uses `serde_json::value::RawValue` to defer payload
/// deserialization to the handler that actually knows the payload shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<serde_json::value::RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Session announcements (`connection_established`, substitution
    /// notices) carry the server-assigned session id at the top level.
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Frame {
    /// Creates a new frame with the given type and payload, stamped now.
    pub fn new<T: Serialize>(
        frame_type: impl Into<String>,
        data: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        let raw = match data {
            Some(d) => {
                let json = serde_json::to_string(d)?;
                Some(serde_json::value::RawValue::from_string(json)?)
            }
            None => None,
        };
        Ok(Self {
            frame_type: frame_type.into(),
            data: raw,
            timestamp: Some(Utc::now()),
            session_id: None,
        })
    }

    /// Creates a bare control frame (`ping`, `pong`, `heartbeat`).
    pub fn control(frame_type: impl Into<String>) -> Self {
        Self {
            frame_type: frame_type.into(),
            data: None,
            timestamp: None,
            session_id: None,
        }
    }

    /// Deserializes the payload into the given type.
    pub fn parse_data<T: for<'de> Deserialize<'de>>(
        &self,
    ) -> Result<Option<T>, serde_json::Error> {
        match &self.data {
            Some(raw) => Ok(Some(serde_json::from_str(raw.get())?)),
            None => Ok(None),
        }
    }

    /// Whether this is a reserved control frame, consumed by the transport
    /// layer rather than forwarded to feature handlers.
    pub fn is_control(&self) -> bool {
        matches!(
            self.frame_type.as_str(),
            constants::TYPE_PING | constants::TYPE_PONG | constants::TYPE_HEARTBEAT
        )
    }
}
