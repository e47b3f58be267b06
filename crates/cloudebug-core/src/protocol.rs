//! Cloudebug wire protocol
//!
//! Messages are JSON objects discriminated by their `type` field, one
//! object per WebSocket text frame.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{ClientError, Result};
use crate::model::{Breakpoint, BreakpointId, HitId};

/// Message sent by the server, either as a reply to a [`Command`] or unprompted
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// A command failed
    Error { message: String },
    /// One breakpoint was created
    Add { breakpoint: Breakpoint },
    /// One breakpoint was destroyed
    Remove { id: BreakpointId },
    /// Full breakpoint list (reply to a `breakpoints` query)
    Breakpoints { breakpoints: Vec<Breakpoint> },
    /// Live hits pushed as they are recorded
    Hit {
        #[serde(rename = "breakpointId", default)]
        breakpoint_id: Option<BreakpointId>,
        hits: Vec<LiveHit>,
    },
    /// Hit history of one breakpoint (reply to a `hits` query)
    Hits {
        #[serde(rename = "breakpointId")]
        breakpoint_id: BreakpointId,
        hits: Vec<HistoricalHit>,
    },
}

/// Values of `type` the server is known to send
const MESSAGE_TYPES: [&str; 6] = ["error", "add", "remove", "breakpoints", "hit", "hits"];

/// Hit item of a pushed `hit` message; the client stamps the time on receipt
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LiveHit {
    pub id: HitId,
    /// Falls back to the message-level `breakpointId` when absent
    #[serde(rename = "breakpointId", default)]
    pub breakpoint_id: Option<BreakpointId>,
    #[serde(default)]
    pub values: Vec<String>,
}

/// Hit item of a `hits` history reply, timestamped by the server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoricalHit {
    pub id: HitId,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub values: Vec<String>,
}

/// Command sent by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Command {
    /// Create a breakpoint; answered by `add`
    Add {
        file: String,
        line: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        condition: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        expressions: Option<Vec<String>>,
    },
    /// Destroy a breakpoint; answered by `remove`
    Remove { id: BreakpointId },
    /// List all breakpoints; answered by `breakpoints`
    Breakpoints,
    /// Fetch the hit history of a breakpoint; answered by `hits`
    Hits { id: BreakpointId },
}

impl Command {
    /// Wire name of the command
    pub fn name(&self) -> &'static str {
        match self {
            Command::Add { .. } => "add",
            Command::Remove { .. } => "remove",
            Command::Breakpoints => "breakpoints",
            Command::Hits { .. } => "hits",
        }
    }

    /// Encode the command as a JSON text frame
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Parameters of a breakpoint to create
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakpointRequest {
    pub file: String,
    pub line: u32,
    pub condition: Option<String>,
    pub expressions: Vec<String>,
}

impl BreakpointRequest {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
            ..Default::default()
        }
    }

    /// Set the condition; an empty condition means none
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        let condition = condition.into();
        self.condition = if condition.is_empty() {
            None
        } else {
            Some(condition)
        };
        self
    }

    /// Append an expression; empty expressions are skipped
    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        let expression = expression.into();
        if !expression.is_empty() {
            self.expressions.push(expression);
        }
        self
    }

    pub fn with_expressions<I, S>(self, expressions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        expressions
            .into_iter()
            .fold(self, |request, expression| request.with_expression(expression))
    }
}

impl From<BreakpointRequest> for Command {
    fn from(request: BreakpointRequest) -> Self {
        Command::Add {
            file: request.file,
            line: request.line,
            condition: request.condition,
            expressions: Some(request.expressions),
        }
    }
}

/// Decode one inbound frame.
///
/// Malformed JSON or a malformed body for a known `type` yields
/// [`ClientError::Parse`]; a missing or unrecognized `type` yields
/// [`ClientError::UnknownMessage`].
pub fn decode_message(text: &str) -> Result<ServerMessage> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ClientError::Parse(e.to_string()))?;

    let Some(kind) = value.get("type").and_then(Value::as_str).map(str::to_owned) else {
        return Err(ClientError::UnknownMessage(String::new()));
    };

    if !MESSAGE_TYPES.contains(&kind.as_str()) {
        return Err(ClientError::UnknownMessage(kind));
    }
    ServerMessage::deserialize(value).map_err(|e| ClientError::Parse(e.to_string()))
}

/// Parse an ISO-8601 timestamp; naive timestamps are read as UTC
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(timestamp.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}
