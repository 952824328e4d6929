use std::io;

use thiserror::Error;

/// A field failed its local validation rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedMessage {
    #[error("invalid callsign {0:?}: expected 1-16 of A-Z, 0-9 or '-'")]
    Callsign(String),
    #[error("invalid target number {0:?}: expected two letters and four digits, e.g. AN2001")]
    TargetNumber(String),
    #[error("grid value {value} does not fit in {digits} digits")]
    GridValue { value: u32, digits: u32 },
    #[error("direction {0} mils is outside 0-6399")]
    Direction(u32),
    #[error("distance {0} m is outside 1-50000")]
    Distance(u32),
    #[error("target designation must not be empty")]
    EmptyTargetType,
    #[error("{field} is {len} bytes, maximum is {max}")]
    TextTooLong { field: &'static str, len: usize, max: usize },
    #[error("round count {0} is outside 1-99")]
    Rounds(u32),
    #[error("time on target minute {0} is outside 0-59")]
    TimeOnTarget(u32),
    #[error("unknown {kind} value {value:#04x}")]
    UnknownEnumValue { kind: &'static str, value: u8 },
    /// A JSON payload parsed but a value in it does not fit the message.
    #[error("invalid field: {0}")]
    InvalidField(String),
}

/// Failure while framing or parsing bytes.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame length {length} is outside 1-{max}")]
    MalformedLength { length: usize, max: usize },
    #[error("unknown {protocol} message tag {tag:#04x}")]
    UnknownTag { protocol: &'static str, tag: u8 },
    #[error("payload truncated while reading {field}")]
    Truncated { field: &'static str },
    #[error("{count} trailing bytes after payload")]
    TrailingBytes { count: usize },
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("malformed message: {0}")]
    Malformed(#[from] MalformedMessage),
    #[error("stream is desynchronized after a malformed length")]
    Desynchronized,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    /// Fatal errors leave the stream without a known frame boundary.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CodecError::MalformedLength { .. } | CodecError::Desynchronized | CodecError::Io(_)
        )
    }
}

/// Why a message was refused by a state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViolationReason {
    #[error("not valid in this state")]
    UnexpectedMessage,
    #[error("link is down")]
    NotConnected,
    #[error("expected target number {expected}, got {found}")]
    TargetNumberMismatch { expected: String, found: String },
    #[error("readback does not match the original")]
    ReadbackMismatch,
    #[error("out of order, expected {expected}")]
    OutOfOrder { expected: &'static str },
    #[error("mission {0} is already closed")]
    MissionClosed(String),
    #[error("no outstanding gun request to answer")]
    NoOutstandingRequest,
    #[error("gun already has an outstanding {0}")]
    GunBusy(&'static str),
    #[error("this side only sends this message")]
    OutboundOnly,
}

/// A message or trigger that is not legal in the current state.
///
/// The state machine that returns this stays in the state it was in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} rejected in state {state}: {reason}")]
pub struct ProtocolViolation {
    pub message: &'static str,
    pub state: String,
    pub reason: ViolationReason,
}

impl ProtocolViolation {
    pub fn new(message: &'static str, state: impl ToString, reason: ViolationReason) -> Self {
        Self {
            message,
            state: state.to_string(),
            reason,
        }
    }
}

/// Configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error(transparent)]
    Malformed(#[from] MalformedMessage),
}

/// A link pump stopped on a fatal error.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A simulator driver could not continue.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("{0} conduit closed")]
    ConduitClosed(&'static str),
    #[error(transparent)]
    Link(#[from] LinkError),
}
