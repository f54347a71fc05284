//! Wire protocol for client-server communication.

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_core::{EventChannel, EventRecord, SessionId};

/// Frame from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Create a new session and start its process.
    Create {
        kind: String,
        workspace: String,
        #[serde(default)]
        options: HashMap<String, Value>,
    },
    /// Attach to a session's event stream, replaying everything after
    /// the cursor first.
    Attach {
        session_id: SessionId,
        #[serde(default)]
        last_seen_sequence: u64,
    },
    /// Drop the event subscription. The session keeps running.
    Detach { session_id: SessionId },
    /// Input data for the session's process (base64 encoded).
    Input { session_id: SessionId, data: String },
    /// Resize the session's terminal.
    Resize {
        session_id: SessionId,
        cols: u16,
        rows: u16,
    },
    /// Terminate the session.
    Close { session_id: SessionId },
    /// Ping for keepalive.
    Ping,
}

impl ClientFrame {
    /// Create an input frame from raw bytes.
    #[must_use]
    pub fn input(session_id: SessionId, data: &[u8]) -> Self {
        Self::Input {
            session_id,
            data: BASE64.encode(data),
        }
    }

    /// Decode input data from base64.
    #[must_use]
    pub fn decode_input(&self) -> Option<Vec<u8>> {
        if let Self::Input { data, .. } = self {
            BASE64.decode(data).ok()
        } else {
            None
        }
    }
}

/// Frame from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Session created and running.
    Created { session_id: SessionId },
    /// Attach accepted; replay follows, through `latest_sequence` and
    /// beyond as the session stays live.
    Attached {
        session_id: SessionId,
        latest_sequence: u64,
    },
    /// One session event, in sequence order.
    Event {
        session_id: SessionId,
        sequence: u64,
        channel: EventChannel,
        kind: String,
        payload: Value,
        timestamp: i64,
    },
    /// A client operation completed.
    Ack { op: String, session_id: SessionId },
    /// Attachment removed.
    Detached { session_id: SessionId },
    /// Error message.
    Error { message: String },
    /// Pong response.
    Pong,
}

impl From<EventRecord> for ServerFrame {
    fn from(record: EventRecord) -> Self {
        Self::Event {
            session_id: record.session_id,
            sequence: record.sequence,
            channel: record.channel,
            kind: record.kind,
            payload: record.payload,
            timestamp: record.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tether_core::types::epoch_millis;

    use super::*;

    #[test]
    fn test_input_roundtrip() {
        let id = uuid::Uuid::new_v4();
        let original = b"echo hi\n";
        let msg = ClientFrame::input(id, original);
        let decoded = msg.decode_input().unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_attach_cursor_defaults_to_zero() {
        let id = uuid::Uuid::new_v4();
        let json = format!(r#"{{"type":"attach","session_id":"{id}"}}"#);
        let parsed: ClientFrame = serde_json::from_str(&json).unwrap();
        if let ClientFrame::Attach {
            session_id,
            last_seen_sequence,
        } = parsed
        {
            assert_eq!(session_id, id);
            assert_eq!(last_seen_sequence, 0);
        } else {
            panic!("Wrong frame type");
        }
    }

    #[test]
    fn test_frame_serialization() {
        let msg = ClientFrame::Resize {
            session_id: uuid::Uuid::new_v4(),
            cols: 80,
            rows: 24,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("resize"));

        let parsed: ClientFrame = serde_json::from_str(&json).unwrap();
        if let ClientFrame::Resize { cols, rows, .. } = parsed {
            assert_eq!(cols, 80);
            assert_eq!(rows, 24);
        } else {
            panic!("Wrong frame type");
        }
    }

    #[test]
    fn test_event_frame_from_record() {
        let record = EventRecord {
            session_id: uuid::Uuid::new_v4(),
            sequence: 7,
            channel: EventChannel::Stdout,
            kind: "output".to_string(),
            payload: json!({ "data": "aGk=" }),
            timestamp: epoch_millis(),
        };
        let frame = ServerFrame::from(record);
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"event""#));
        assert!(json.contains(r#""sequence":7"#));
        assert!(json.contains(r#""channel":"stdout""#));
    }
}
