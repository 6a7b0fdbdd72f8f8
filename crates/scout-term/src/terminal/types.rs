//! Terminal wire types and models

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::errors::ProtocolError;

pub const DEFAULT_COLS: u16 = 120;
pub const DEFAULT_ROWS: u16 = 30;

/// Opaque identifier of an authenticated browser session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Terminal size in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub cols: u16,
    pub rows: u16,
}

impl Geometry {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Build a geometry from loosely typed values, falling back to the
    /// defaults for anything missing, non-numeric, zero or out of range.
    fn from_values(cols: Option<&Value>, rows: Option<&Value>) -> Self {
        Self {
            cols: dimension(cols.and_then(Value::as_u64), DEFAULT_COLS),
            rows: dimension(rows.and_then(Value::as_u64), DEFAULT_ROWS),
        }
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::new(DEFAULT_COLS, DEFAULT_ROWS)
    }
}

fn dimension(value: Option<u64>, default: u16) -> u16 {
    value
        .filter(|n| *n > 0)
        .and_then(|n| u16::try_from(n).ok())
        .unwrap_or(default)
}

/// Optional `?cols=&rows=` on the upgrade request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeometryQuery {
    pub cols: Option<String>,
    pub rows: Option<String>,
}

impl GeometryQuery {
    pub fn geometry(&self) -> Geometry {
        let parse = |v: &Option<String>| v.as_deref().and_then(|s| s.trim().parse::<u64>().ok());
        Geometry {
            cols: dimension(parse(&self.cols), DEFAULT_COLS),
            rows: dimension(parse(&self.rows), DEFAULT_ROWS),
        }
    }
}

/// Messages from WebSocket clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Raw keystrokes for the process
    Input { data: String },
    /// New viewport size
    Resize(Geometry),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RawClientMessage {
    Input {
        data: String,
    },
    Resize {
        #[serde(default)]
        cols: Option<Value>,
        #[serde(default)]
        rows: Option<Value>,
    },
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawClientMessage = serde_json::from_str(text)?;
        Ok(match raw {
            RawClientMessage::Input { data } => ClientMessage::Input { data },
            RawClientMessage::Resize { cols, rows } => {
                ClientMessage::Resize(Geometry::from_values(cols.as_ref(), rows.as_ref()))
            }
        })
    }
}

/// Messages sent to WebSocket clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Terminal output data
    Output { data: String },
    /// PTY process exited (sent once)
    Exit,
}

impl ServerMessage {
    pub fn to_json(&self) -> String {
        // Serializing these variants cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"exit"}"#.to_string())
    }
}

/// Terminal session information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalInfo {
    pub session_id: SessionId,
    pub pid: Option<u32>,
    pub cols: u16,
    pub rows: u16,
    /// Number of attached viewers
    pub viewers: usize,
    pub scrollback_bytes: usize,
    /// Creation timestamp (Unix epoch seconds)
    pub created_at: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalStatus {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal: Option<TerminalInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartResponse {
    pub ok: bool,
}
