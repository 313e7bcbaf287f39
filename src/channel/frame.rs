//! Phoenix channel frames (V1 JSON serializer).
//!
//! Every websocket text message is one object:
//! `{"topic": .., "event": .., "payload": .., "ref": .., "join_ref": ..}`.

use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use crate::types::Jwt;

/// Topic reserved for socket-level traffic (heartbeats).
pub const PHOENIX_TOPIC: &str = "phoenix";

pub const PHX_JOIN: &str = "phx_join";
pub const PHX_REPLY: &str = "phx_reply";
pub const PHX_ERROR: &str = "phx_error";
pub const PHX_CLOSE: &str = "phx_close";
pub const HEARTBEAT: &str = "heartbeat";
pub const PROFILE_UPDATE: &str = "profile_update";

/// Reply reasons meaning the token is fine but its user is gone.
pub const INVALID_SESSION_REASONS: [&str; 2] = ["join crashed", "user not found"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: JsonValue,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub join_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Ok,
    Error,
}

/// What an inbound frame means to the channel client.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Reply {
        reference: Option<String>,
        status: ReplyStatus,
        response: JsonValue,
    },
    /// `profile_update`; carries the raw payload (`{"user": ..}`).
    ProfileUpdate(JsonValue),
    ChannelError,
    ChannelClosed,
    Other(String),
}

impl Frame {
    /// Join request. The session token is the whole join payload.
    #[must_use]
    pub fn join(topic: &str, jwt: &Jwt, reference: &str) -> Self {
        Self {
            topic: topic.to_owned(),
            event: PHX_JOIN.to_owned(),
            payload: JsonValue::String(jwt.as_str().to_owned()),
            reference: Some(reference.to_owned()),
            join_ref: Some(reference.to_owned()),
        }
    }

    #[must_use]
    pub fn heartbeat(reference: &str) -> Self {
        Self {
            topic: PHOENIX_TOPIC.to_owned(),
            event: HEARTBEAT.to_owned(),
            payload: json!({}),
            reference: Some(reference.to_owned()),
            join_ref: None,
        }
    }

    #[must_use]
    pub fn encode(&self) -> String {
        json!({
            "topic": self.topic,
            "event": self.event,
            "payload": self.payload,
            "ref": self.reference,
            "join_ref": self.join_ref,
        })
        .to_string()
    }

    /// Parse a text message. Anything that is not a frame yields `None`.
    #[must_use]
    pub fn decode(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    #[must_use]
    pub fn classify(&self) -> Inbound {
        match self.event.as_str() {
            PHX_REPLY => {
                let status = match self.payload.get("status").and_then(JsonValue::as_str) {
                    Some("ok") => ReplyStatus::Ok,
                    _ => ReplyStatus::Error,
                };
                Inbound::Reply {
                    reference: self.reference.clone(),
                    status,
                    response: self.payload.get("response").cloned().unwrap_or(JsonValue::Null),
                }
            }
            PROFILE_UPDATE => Inbound::ProfileUpdate(self.payload.clone()),
            PHX_ERROR => Inbound::ChannelError,
            PHX_CLOSE => Inbound::ChannelClosed,
            other => Inbound::Other(other.to_owned()),
        }
    }
}

/// `response.reason`, if it says the session's user no longer exists.
#[must_use]
pub fn invalid_session_reason(response: &JsonValue) -> Option<&str> {
    response
        .get("reason")
        .and_then(JsonValue::as_str)
        .filter(|reason| INVALID_SESSION_REASONS.contains(reason))
}

/// Human-readable reason from an error reply.
#[must_use]
pub fn reply_reason(response: &JsonValue) -> String {
    response
        .get("reason")
        .and_then(JsonValue::as_str)
        .map_or_else(|| response.to_string(), str::to_owned)
}
