//! Frames exchanged on `/ws/terminal`.
//!
//! Shell output travels as binary frames, untouched. Control traffic is JSON
//! in text frames, tagged by `type`. Any text frame that is not one of the
//! inbound messages below is treated as raw keystrokes, so a bare client can
//! simply send what the user typed.

use ap_session::bridge::ClientMessage;
use ap_session::resize::ResizeRequest;
use serde::{Deserialize, Serialize};

/// Client → server control frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsIncoming {
    /// Input to write to the shell.
    Input { data: String },
    /// Terminal geometry changed.
    Resize { cols: u16, rows: u16 },
}

/// Server → client control frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsOutgoing {
    /// The shell is gone; the socket closes after this.
    Exit { code: Option<u32> },
    Error { message: String },
}

impl WsOutgoing {
    pub fn to_json(&self) -> String {
        // Both variants are plain data; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{\"type\":\"error\"}"))
    }
}

impl From<WsIncoming> for ClientMessage {
    fn from(msg: WsIncoming) -> Self {
        match msg {
            WsIncoming::Input { data } => ClientMessage::Input(data.into_bytes()),
            WsIncoming::Resize { cols, rows } => ClientMessage::Resize(ResizeRequest { cols, rows }),
        }
    }
}

/// Interpret a text frame: a JSON control message, or raw input otherwise.
pub fn parse_text_frame(text: &str) -> ClientMessage {
    match serde_json::from_str::<WsIncoming>(text) {
        Ok(msg) => msg.into(),
        Err(_) => ClientMessage::Input(text.as_bytes().to_vec()),
    }
}
