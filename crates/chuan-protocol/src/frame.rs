//! Signaling frame envelope
//!
//! Text frames over a room WebSocket carry
//! `{ "type": <tag>, "payload": <any>, "channel": <string?> }`.
//! The server reserves two tags, `peer-joined` (server-originated)
//! and `disconnection`, and forwards everything else untouched.
//! Inbound frames are never re-serialized: the relay peeks at the tag
//! with [`peek_tag`] and forwards the original text, so key order and
//! whitespace survive end to end.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::role::Role;

/// Server-originated: the other slot became occupied.
pub const TAG_PEER_JOINED: &str = "peer-joined";

/// Farewell; forwarded to the peer, then the sender is detached.
pub const TAG_DISCONNECTION: &str = "disconnection";

/// Reason carried by a server-originated disconnection frame.
pub const REASON_PEER_LEFT: &str = "peer-left";

/// The signaling envelope, used to build server-originated frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Frame tag; all but the reserved set are application-defined.
    #[serde(rename = "type")]
    pub tag: String,
    /// Opaque payload, forwarded verbatim.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    /// Client-scoped routing hint; preserved, never interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl Envelope {
    /// Frame announcing that the peer holding `role` is now attached.
    pub fn peer_joined(role: Role) -> Self {
        Envelope {
            tag: TAG_PEER_JOINED.to_string(),
            payload: json!({ "role": role.as_str() }),
            channel: None,
        }
    }

    /// Server-originated farewell with the given reason.
    pub fn disconnection(reason: &str) -> Self {
        Envelope {
            tag: TAG_DISCONNECTION.to_string(),
            payload: json!({ "reason": reason }),
            channel: None,
        }
    }

    /// Serialize to the JSON text sent on the wire.
    pub fn to_text(&self) -> String {
        // Envelope contains only JSON-representable data
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Shallow probe used to classify inbound text frames.
#[derive(Deserialize)]
struct TagProbe {
    #[serde(rename = "type")]
    tag: String,
}

/// Read the `type` field of a text frame without touching the rest.
///
/// Returns `None` for anything that is not a JSON object with a string
/// `type`; such frames are dropped by the relay, not forwarded.
pub fn peek_tag(text: &str) -> Option<String> {
    serde_json::from_str::<TagProbe>(text).ok().map(|p| p.tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_joined_carries_other_role() {
        let frame = Envelope::peer_joined(Role::Receiver);
        let v: Value = serde_json::from_str(&frame.to_text()).unwrap();
        assert_eq!(v["type"], "peer-joined");
        assert_eq!(v["payload"]["role"], "receiver");
        // channel is omitted, not null
        assert!(v.get("channel").is_none());
    }

    #[test]
    fn disconnection_carries_reason() {
        let frame = Envelope::disconnection(REASON_PEER_LEFT);
        let v: Value = serde_json::from_str(&frame.to_text()).unwrap();
        assert_eq!(v["type"], "disconnection");
        assert_eq!(v["payload"]["reason"], "peer-left");
    }

    #[test]
    fn peek_reads_only_the_tag() {
        let text = r#"{"type":"offer","payload":{"sdp":"v=0..."},"channel":"files"}"#;
        assert_eq!(peek_tag(text).as_deref(), Some("offer"));
        // unknown application tags are fine
        assert_eq!(peek_tag(r#"{"type":"progress","payload":7}"#).as_deref(), Some("progress"));
    }

    #[test]
    fn peek_rejects_malformed_frames() {
        assert!(peek_tag("not json").is_none());
        assert!(peek_tag("{}").is_none());
        assert!(peek_tag(r#"{"type":42}"#).is_none());
        assert!(peek_tag("[1,2,3]").is_none());
    }

    #[test]
    fn envelope_roundtrip_keeps_channel() {
        let text = r#"{"type":"text-message","payload":"hi","channel":"chat-1"}"#;
        let env: Envelope = serde_json::from_str(text).unwrap();
        assert_eq!(env.channel.as_deref(), Some("chat-1"));
        let back: Value = serde_json::from_str(&env.to_text()).unwrap();
        assert_eq!(back["channel"], "chat-1");
    }
}
