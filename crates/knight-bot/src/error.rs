use knight_shared::SendError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BotError {
    #[error("Send failed: {0}")]
    Send(#[from] SendError),

    #[error("Report error: {0}")]
    Report(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
