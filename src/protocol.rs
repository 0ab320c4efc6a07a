//! # Control Protocol
//!
//! The Driver and Controller exchange a small, fixed vocabulary of control
//! messages. The protocol is strictly half-duplex: the Driver sends one
//! request, the Controller answers with one acknowledgement, and neither
//! side ever has two messages in flight.
//!
//! ```text
//! Driver                               Controller
//!   │ StartParams{key, value, threads} ──►│ spawn + readiness probe
//!   │◄──────────────────── ServerRunning  │
//!   │ (client benchmark runs locally)     │
//!   │ ClientTerminated ──────────────────►│ SIGINT + reap
//!   │◄──────────────────────────── Ready  │
//!   │ ...                                 │
//!   │ End ───────────────────────────────►│ close
//! ```
//!
//! Two encodings are supported. `WireFormat::Legacy` is the plaintext form
//! spoken by the original benchmark scripts; `WireFormat::Tagged` is a
//! versioned JSON form with explicit field names and a message kind tag.

use crate::error::ControlError;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest legacy message read from the transport in one go.
pub const MAX_MESSAGE_LEN: usize = 1024;

/// Version written into every tagged message.
pub const PROTOCOL_VERSION: u32 = 1;

const SERVER_RUNNING: &str = "Server Running";
const CLIENT_TERMINATED: &str = "Client terminated";
const READY: &str = "Ready";
const END: &str = "END";
const ABORT_PREFIX: &str = "ABORT";

/// Parameters the Controller needs to stand up a server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StartParams {
    pub key_size: usize,
    pub value_size: usize,
    pub threads: usize,
}

/// A control-plane message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Driver → Controller: start a server with these parameters
    StartParams(StartParams),
    /// Controller → Driver: the server is accepting connections
    ServerRunning,
    /// Driver → Controller: the local client run has exited
    ClientTerminated,
    /// Controller → Driver: the server is gone, send the next case
    Ready,
    /// Driver → Controller: the sweep is over
    End,
    /// Controller → Driver: the Controller hit a fatal error
    Abort { reason: String },
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMessage::StartParams(p) => write!(
                f,
                "StartParams(key_size={}, value_size={}, threads={})",
                p.key_size, p.value_size, p.threads
            ),
            ControlMessage::ServerRunning => write!(f, "ServerRunning"),
            ControlMessage::ClientTerminated => write!(f, "ClientTerminated"),
            ControlMessage::Ready => write!(f, "Ready"),
            ControlMessage::End => write!(f, "End"),
            ControlMessage::Abort { reason } => write!(f, "Abort({})", reason),
        }
    }
}

/// Encoding used on the control connection. Both peers must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
pub enum WireFormat {
    /// Plaintext tokens, one message per transport read
    #[default]
    Legacy,
    /// Versioned JSON, one message per line
    Tagged,
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Legacy => write!(f, "legacy"),
            WireFormat::Tagged => write!(f, "tagged"),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    #[serde(flatten)]
    message: ControlMessage,
}

impl WireFormat {
    /// Whether frames of this format end with a newline delimiter.
    pub fn is_line_delimited(&self) -> bool {
        matches!(self, WireFormat::Tagged)
    }

    /// Serialize a message into the bytes of one frame.
    pub fn encode(&self, message: &ControlMessage) -> Result<Vec<u8>, ControlError> {
        match self {
            WireFormat::Legacy => Ok(encode_legacy(message).into_bytes()),
            WireFormat::Tagged => {
                let envelope = Envelope {
                    version: PROTOCOL_VERSION,
                    message: message.clone(),
                };
                let mut bytes = serde_json::to_vec(&envelope)
                    .map_err(|e| ControlError::Protocol(format!("cannot encode {}: {}", message, e)))?;
                bytes.push(b'\n');
                Ok(bytes)
            }
        }
    }

    /// Parse the bytes of one frame.
    pub fn decode(&self, frame: &[u8]) -> Result<ControlMessage, ControlError> {
        let text = std::str::from_utf8(frame)
            .map_err(|_| ControlError::Protocol("control message is not valid UTF-8".to_string()))?
            .trim();
        match self {
            WireFormat::Legacy => decode_legacy(text),
            WireFormat::Tagged => {
                let envelope: Envelope = serde_json::from_str(text).map_err(|e| {
                    ControlError::Protocol(format!("malformed tagged message {:?}: {}", text, e))
                })?;
                if envelope.version != PROTOCOL_VERSION {
                    return Err(ControlError::Protocol(format!(
                        "unsupported protocol version {} (expected {})",
                        envelope.version, PROTOCOL_VERSION
                    )));
                }
                Ok(envelope.message)
            }
        }
    }
}

fn encode_legacy(message: &ControlMessage) -> String {
    match message {
        ControlMessage::StartParams(p) => {
            format!("{},{},{}", p.key_size, p.value_size, p.threads)
        }
        ControlMessage::ServerRunning => SERVER_RUNNING.to_string(),
        ControlMessage::ClientTerminated => CLIENT_TERMINATED.to_string(),
        ControlMessage::Ready => READY.to_string(),
        ControlMessage::End => END.to_string(),
        ControlMessage::Abort { reason } => format!("{} {}", ABORT_PREFIX, reason),
    }
}

fn decode_legacy(text: &str) -> Result<ControlMessage, ControlError> {
    match text {
        SERVER_RUNNING => return Ok(ControlMessage::ServerRunning),
        CLIENT_TERMINATED => return Ok(ControlMessage::ClientTerminated),
        READY => return Ok(ControlMessage::Ready),
        END => return Ok(ControlMessage::End),
        _ => {}
    }

    if let Some(reason) = text.strip_prefix(ABORT_PREFIX) {
        return Ok(ControlMessage::Abort {
            reason: reason.trim().to_string(),
        });
    }

    let fields: Vec<&str> = text.split(',').map(str::trim).collect();
    if fields.len() != 3 {
        return Err(ControlError::Protocol(format!(
            "unrecognized control message {:?}",
            text
        )));
    }

    let parse = |name: &str, value: &str| -> Result<usize, ControlError> {
        value.parse().map_err(|_| {
            ControlError::Protocol(format!("invalid {} {:?} in {:?}", name, value, text))
        })
    };

    Ok(ControlMessage::StartParams(StartParams {
        key_size: parse("key size", fields[0])?,
        value_size: parse("value size", fields[1])?,
        threads: parse("thread count", fields[2])?,
    }))
}
