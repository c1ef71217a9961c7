//! Presence Protocol Payloads
//!
//! JSON bodies carried inside frames. The client sends exactly two kinds of
//! payload: the `Handshake` (opcode `Handshake`) and a `SET_ACTIVITY`
//! `Command` (opcode `Frame`). Everything the peer sends back is parsed as a
//! loosely-typed `Response`.

use serde::{Deserialize, Serialize};

/// IPC protocol version sent in the handshake
pub const PROTOCOL_VERSION: u32 = 1;

/// Peer error code meaning "unknown application identifier"
pub const INVALID_CLIENT_ID: i64 = 4000;

/// Command name for setting (or clearing) the current activity
pub const SET_ACTIVITY: &str = "SET_ACTIVITY";

/// Event name the peer uses to acknowledge a handshake
pub const EVT_READY: &str = "READY";

/// Event name the peer uses to report a failed command
pub const EVT_ERROR: &str = "ERROR";

/// Client → peer handshake body
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Protocol version
    pub v: u32,
    /// Application registration identifier
    pub client_id: String,
}

impl Handshake {
    /// Handshake for the given application identifier
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            client_id: client_id.into(),
        }
    }
}

/// Activity start/end timestamps (epoch seconds)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    /// Elapsed-time origin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
}

/// Activity artwork
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assets {
    /// Uploaded asset key for the large image
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub large_image: String,
    /// Hover text for the large image
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub large_text: String,
}

impl Assets {
    /// Whether neither field is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.large_image.is_empty() && self.large_text.is_empty()
    }
}

/// The activity object shown by the peer
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    /// Second line (e.g. the file name)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
    /// First line (e.g. "Editing a project")
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
    /// Elapsed-time origin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<Timestamps>,
    /// Artwork
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets: Option<Assets>,
}

/// Arguments of `SET_ACTIVITY`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetActivityArgs {
    /// Process id of the application the activity belongs to
    pub pid: u32,
    /// New activity; absent clears the current one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<Activity>,
}

/// Client → peer command
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Command name
    pub cmd: String,
    /// Command arguments
    pub args: SetActivityArgs,
    /// Unique nonce echoed back by the peer
    pub nonce: String,
}

impl Command {
    /// `SET_ACTIVITY` with a fresh nonce; `None` clears the activity
    #[must_use]
    pub fn set_activity(pid: u32, activity: Option<Activity>) -> Self {
        Self {
            cmd: SET_ACTIVITY.to_string(),
            args: SetActivityArgs { pid, activity },
            nonce: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Error body sent by the peer (inside a `Close` frame or an `ERROR` event)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerError {
    /// Numeric error code
    pub code: i64,
    /// Human-readable reason
    #[serde(default)]
    pub message: String,
}

impl PeerError {
    /// Whether the peer rejected our application identifier
    #[must_use]
    pub fn is_invalid_client_id(&self) -> bool {
        self.code == INVALID_CLIENT_ID
    }
}

/// What the handshake acknowledgement told us about the peer
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeerInfo {
    /// Peer process id, when the ack carries one
    pub process_id: Option<u32>,
    /// Logged-in user name, when the ack carries one
    pub username: Option<String>,
}

/// Peer → client message, parsed loosely
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Command this responds to (`DISPATCH` for unsolicited events)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    /// Event name, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evt: Option<String>,
    /// Event or command data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Nonce of the command this answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl Response {
    /// A handshake acknowledgement, as the peer would send it
    #[must_use]
    pub fn ready(process_id: Option<u32>, username: &str) -> Self {
        let mut data = serde_json::json!({
            "v": PROTOCOL_VERSION,
            "user": { "username": username },
        });
        if let Some(pid) = process_id {
            data["pid"] = serde_json::json!(pid);
        }
        Self {
            cmd: Some("DISPATCH".to_string()),
            evt: Some(EVT_READY.to_string()),
            data: Some(data),
            nonce: None,
        }
    }

    /// An `ERROR` event, as the peer would send it
    #[must_use]
    pub fn error(code: i64, message: &str) -> Self {
        Self {
            cmd: Some("DISPATCH".to_string()),
            evt: Some(EVT_ERROR.to_string()),
            data: Some(serde_json::json!({ "code": code, "message": message })),
            nonce: None,
        }
    }

    /// Whether this is the handshake acknowledgement
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.evt.as_deref() == Some(EVT_READY)
    }

    /// The peer error carried by an `ERROR` event
    #[must_use]
    pub fn peer_error(&self) -> Option<PeerError> {
        if self.evt.as_deref() != Some(EVT_ERROR) {
            return None;
        }
        self.data
            .clone()
            .and_then(|data| serde_json::from_value(data).ok())
    }

    /// Peer details from a `READY` event
    #[must_use]
    pub fn peer_info(&self) -> PeerInfo {
        let Some(data) = self.data.as_ref() else {
            return PeerInfo::default();
        };
        PeerInfo {
            process_id: data
                .get("pid")
                .and_then(serde_json::Value::as_u64)
                .and_then(|pid| u32::try_from(pid).ok()),
            username: data
                .pointer("/user/username")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_handshake_shape() {
        let json = serde_json::to_value(Handshake::new("674448359850901546")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"v": 1, "client_id": "674448359850901546"})
        );
    }

    #[test]
    fn test_set_activity_payload_keys() {
        let activity = Activity {
            state: "scene.blend".to_string(),
            details: "Editing a project".to_string(),
            timestamps: Some(Timestamps {
                start: Some(1_700_000_000),
            }),
            assets: Some(Assets {
                large_image: "blender".to_string(),
                large_text: "4.2 Release".to_string(),
            }),
        };
        let cmd = Command::set_activity(4242, Some(activity));
        let json = serde_json::to_value(&cmd).unwrap();

        assert_eq!(json["cmd"], "SET_ACTIVITY");
        assert_eq!(json["args"]["pid"], 4242);
        assert_eq!(json["args"]["activity"]["state"], "scene.blend");
        assert_eq!(json["args"]["activity"]["details"], "Editing a project");
        assert_eq!(json["args"]["activity"]["timestamps"]["start"], 1_700_000_000);
        assert_eq!(json["args"]["activity"]["assets"]["large_image"], "blender");
        assert_eq!(json["args"]["activity"]["assets"]["large_text"], "4.2 Release");
        assert!(!cmd.nonce.is_empty());
    }

    #[test]
    fn test_clear_omits_activity() {
        let json = serde_json::to_value(Command::set_activity(7, None)).unwrap();
        assert_eq!(json["args"], serde_json::json!({"pid": 7}));
    }

    #[test]
    fn test_empty_fields_are_omitted() {
        let json = serde_json::to_value(Activity {
            details: "Editing an unsaved file".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"details": "Editing an unsaved file"}));
    }

    #[test]
    fn test_nonces_are_unique() {
        let a = Command::set_activity(1, None);
        let b = Command::set_activity(1, None);
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_ready_response_peer_info() {
        let ready = Response::ready(Some(99), "tester");
        assert!(ready.is_ready());
        assert!(ready.peer_error().is_none());
        assert_eq!(
            ready.peer_info(),
            PeerInfo {
                process_id: Some(99),
                username: Some("tester".to_string()),
            }
        );

        let bare: Response =
            serde_json::from_str(r#"{"cmd":"DISPATCH","evt":"READY"}"#).unwrap();
        assert!(bare.is_ready());
        assert_eq!(bare.peer_info(), PeerInfo::default());
    }

    #[test]
    fn test_error_response() {
        let err = Response::error(INVALID_CLIENT_ID, "Invalid Client ID");
        assert!(!err.is_ready());
        let peer_error = err.peer_error().unwrap();
        assert!(peer_error.is_invalid_client_id());
        assert_eq!(peer_error.message, "Invalid Client ID");
    }

    #[test]
    fn test_close_body_parses_as_peer_error() {
        let body: PeerError =
            serde_json::from_str(r#"{"code":4000,"message":"Invalid Client ID"}"#).unwrap();
        assert!(body.is_invalid_client_id());
    }
}
