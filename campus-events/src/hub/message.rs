//! Notification envelope pushed to subscribers

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Immutable notification pushed through the hub
///
/// Serialized once per send as `{"type": kind, "data": data}` and shared
/// by reference across every recipient mailbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Event kind, e.g. `"schedule.updated"`
    #[serde(rename = "type")]
    pub kind: String,
    /// Arbitrary structured payload
    pub data: serde_json::Value,
}

impl EventMessage {
    /// Create a new message
    #[must_use]
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Create a message with JSON-serialized data
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn json<T: Serialize>(kind: impl Into<String>, data: &T) -> Result<Self> {
        Ok(Self {
            kind: kind.into(),
            data: serde_json::to_value(data)?,
        })
    }

    /// Encode the wire envelope
    pub(crate) fn encode(&self) -> Result<Arc<str>> {
        Ok(Arc::from(serde_json::to_string(self)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_shape() {
        let msg = EventMessage::new("grade.posted", json!({"course": 12, "grade": "A"}));
        let encoded = msg.encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["type"], "grade.posted");
        assert_eq!(value["data"]["course"], 12);
        assert!(value.get("kind").is_none());
    }

    #[test]
    fn test_json_constructor() {
        #[derive(Serialize)]
        struct Notice {
            title: &'static str,
        }
        let msg = EventMessage::json("notice", &Notice { title: "Exam moved" }).unwrap();
        assert_eq!(msg.data["title"], "Exam moved");
    }
}
