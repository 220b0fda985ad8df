//! Protocol error types

use std::fmt;

/// Error categories, which decide what happens to the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Unrecognized command: respond and continue
    Syntax,
    /// Size cap exceeded: respond and terminate
    Framing,
    /// Bad subject or sid: respond and continue, no state change
    Subscription,
    /// Missing or invalid credentials: respond and terminate
    Auth,
    /// Slow consumer: best-effort notice and terminate
    Resource,
    /// Malformed CONNECT options: respond and continue
    Config,
}

/// Errors reported to a client as `-ERR '<message>'`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Control line did not match any command
    UnknownOperation,
    /// Control line exceeded the configured maximum
    ControlLineTooLong { max: usize },
    /// Declared PUB payload exceeded the configured maximum
    PayloadTooBig { max: usize },
    /// Subject or pattern failed validation
    InvalidSubject,
    /// SUB with a sid already registered on this connection
    InvalidSidTaken,
    /// UNSUB with a sid not registered on this connection
    InvalidSidNoexist,
    /// CONNECT options were not a valid JSON object
    InvalidConfig,
    /// Command sent before authenticating, or auth deadline passed
    AuthRequired,
    /// CONNECT credentials missing or wrong
    AuthFailed,
    /// Outbound buffer exceeded the configured maximum
    SlowConsumer,
}

impl ProtocolError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::UnknownOperation => ErrorClass::Syntax,
            Self::ControlLineTooLong { .. } | Self::PayloadTooBig { .. } => ErrorClass::Framing,
            Self::InvalidSubject | Self::InvalidSidTaken | Self::InvalidSidNoexist => {
                ErrorClass::Subscription
            }
            Self::InvalidConfig => ErrorClass::Config,
            Self::AuthRequired | Self::AuthFailed => ErrorClass::Auth,
            Self::SlowConsumer => ErrorClass::Resource,
        }
    }

    /// Whether the connection must be closed after reporting this error
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Framing | ErrorClass::Auth | ErrorClass::Resource
        )
    }

    /// Short label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::UnknownOperation => "unknown_operation",
            Self::ControlLineTooLong { .. } => "control_line_too_long",
            Self::PayloadTooBig { .. } => "payload_too_big",
            Self::InvalidSubject => "invalid_subject",
            Self::InvalidSidTaken => "sid_taken",
            Self::InvalidSidNoexist => "sid_noexist",
            Self::InvalidConfig => "invalid_config",
            Self::AuthRequired => "auth_required",
            Self::AuthFailed => "auth_failed",
            Self::SlowConsumer => "slow_consumer",
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOperation => write!(f, "Unknown Protocol Operation"),
            Self::ControlLineTooLong { max } => {
                write!(f, "Maximum control line exceeded, max is {} bytes", max)
            }
            Self::PayloadTooBig { max } => {
                write!(f, "Payload size exceeded, max is {} bytes", max)
            }
            Self::InvalidSubject => write!(f, "Invalid Subject"),
            Self::InvalidSidTaken => {
                write!(f, "Invalid Subject Identifier (sid), already taken")
            }
            Self::InvalidSidNoexist => write!(
                f,
                "Invalid Subject-Identifier (sid), no subscriber registered"
            ),
            Self::InvalidConfig => write!(
                f,
                "Invalid config, valid JSON required for connection configuration"
            ),
            Self::AuthRequired => write!(f, "Authorization is required"),
            Self::AuthFailed => write!(f, "Authorization failed"),
            Self::SlowConsumer => write!(f, "Slow consumer detected, connection dropped"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Errors while encoding a server frame
#[derive(Debug)]
pub enum EncodeError {
    /// INFO banner could not be serialized
    Info(serde_json::Error),
    /// Formatting into the output buffer failed
    Format,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info(e) => write!(f, "failed to serialize INFO: {}", e),
            Self::Format => write!(f, "failed to format frame"),
        }
    }
}

impl std::error::Error for EncodeError {}

impl From<serde_json::Error> for EncodeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Info(e)
    }
}

impl From<fmt::Error> for EncodeError {
    fn from(_: fmt::Error) -> Self {
        Self::Format
    }
}
