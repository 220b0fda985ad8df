//! Wire protocol definitions and types
//!
//! The protocol is line based: every command starts with an ASCII control
//! line terminated by CR-LF, with case-insensitive keywords. `PUB` control
//! lines are followed by a payload of the declared size and another CR-LF.

mod error;
mod op;

pub use error::{EncodeError, ErrorClass, ProtocolError};
pub use op::{ConnectOptions, Message, Op, ServerInfo, ServerOp};

/// Line terminator
pub const CR_LF: &[u8] = b"\r\n";

/// Default client port
pub const DEFAULT_PORT: u16 = 4222;

/// Maximum control line size in bytes (excluding CR-LF)
pub const MAX_CONTROL_LINE_SIZE: usize = 1024;

/// Maximum payload size in bytes
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Maximum bytes buffered for a client before it is dropped as a slow consumer
pub const MAX_OUTBOUND_SIZE: usize = 10 * 1024 * 1024;

/// Seconds a client has to authenticate when authorization is required
pub const AUTH_TIMEOUT_SECS: u64 = 5;

/// Seconds between server PING broadcasts
pub const PING_INTERVAL_SECS: u64 = 60;

/// Server version reported in INFO and /varz
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
