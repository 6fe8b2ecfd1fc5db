use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timed out after {0} ms")]
    Timeout(u64),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("Unknown event kind: {0}")]
    UnknownKind(String),

    #[error("Malformed event: {0}")]
    Malformed(String),
}
