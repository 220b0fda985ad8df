//! Client and server operations

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::ProtocolError;

/// A parsed client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Info,
    Connect {
        /// Raw options text, decoded by [`ConnectOptions::parse`]
        options: String,
    },
    Pub {
        subject: String,
        reply_to: Option<String>,
        payload: Bytes,
    },
    Sub {
        subject: String,
        sid: String,
    },
    Unsub {
        sid: String,
    },
    Ping,
    Pong,
}

impl Op {
    /// Command keyword, for logging
    pub fn name(&self) -> &'static str {
        match self {
            Op::Info => "INFO",
            Op::Connect { .. } => "CONNECT",
            Op::Pub { .. } => "PUB",
            Op::Sub { .. } => "SUB",
            Op::Unsub { .. } => "UNSUB",
            Op::Ping => "PING",
            Op::Pong => "PONG",
        }
    }
}

/// A frame written to a client
#[derive(Debug, Clone, Copy)]
pub enum ServerOp<'a> {
    Info(&'a ServerInfo),
    Msg {
        subject: &'a str,
        sid: &'a str,
        reply_to: Option<&'a str>,
        payload: &'a [u8],
    },
    Ping,
    Pong,
    Ok,
    Err(&'a ProtocolError),
}

/// A published message, consumed synchronously by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub reply_to: Option<String>,
    pub payload: Bytes,
}

/// Options recognized in a CONNECT command
///
/// Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    pub verbose: Option<bool>,
    pub pedantic: Option<bool>,
    pub user: Option<String>,
    pub pass: Option<String>,
}

impl ConnectOptions {
    /// Decode the JSON object sent with CONNECT
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(|_| ProtocolError::InvalidConfig)
    }
}

/// Server banner sent on accept and in reply to INFO
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub server_id: String,
    pub version: String,
    pub host: String,
    pub port: u16,
    pub auth_required: bool,
    pub max_payload: usize,
}
