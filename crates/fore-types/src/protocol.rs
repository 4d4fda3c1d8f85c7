use serde::{Deserialize, Serialize};

use crate::message::Attachment;

/// Observer/driver → session. One JSON object per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    Start,
    Message {
        content: String,
        #[serde(default)]
        attachments: Vec<Attachment>,
    },
    Done,
}

/// Session → observer. One JSON object per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Pong,
    Text {
        content: String,
    },
    FeaturesCreated {
        count: usize,
        features: Vec<FeatureSummary>,
    },
    ExpansionComplete {
        total_added: usize,
    },
    ResponseDone,
    Error {
        content: String,
    },
}

impl ServerMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::Error {
            content: content.into(),
        }
    }
}

/// One entry of the project's feature-tracking file (`features.json`).
/// Unknown fields are ignored so agent-side schema drift doesn't break
/// the summary events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureSummary {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Outcome of parsing one inbound protocol line.
///
/// Unknown kinds and malformed payloads are distinguished so the
/// dispatcher can name the problem in its `error` reply instead of
/// silently dropping the line.
pub enum ParsedClient {
    Ok(ClientMessage),
    UnknownKind(String),
    Malformed(String),
}

/// Lenient inbound parse: read the `type` tag first, then deserialize.
pub fn parse_client_message(line: &str) -> ParsedClient {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return ParsedClient::Malformed(format!("invalid JSON: {e}")),
    };

    let kind = match value.get("type").and_then(|t| t.as_str()) {
        Some(k) => k.to_string(),
        None => return ParsedClient::Malformed("missing \"type\" field".to_string()),
    };

    match serde_json::from_value::<ClientMessage>(value) {
        Ok(msg) => ParsedClient::Ok(msg),
        Err(e) => {
            if matches!(kind.as_str(), "ping" | "start" | "message" | "done") {
                ParsedClient::Malformed(format!("malformed {kind} payload: {e}"))
            } else {
                ParsedClient::UnknownKind(kind)
            }
        }
    }
}
