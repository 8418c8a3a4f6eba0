use thiserror::Error;

/// A batch payload that could not be turned into transaction records.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
    #[error("row {row}: missing required field `{field}`")]
    MissingField { row: usize, field: &'static str },
    #[error("row {row}: stock level change `{value}` is not an integer")]
    InvalidDelta { row: usize, value: String },
    #[error("row {row}: timestamp `{value}` is not RFC 3339")]
    InvalidTimestamp { row: usize, value: String },
    #[error("malformed csv: {0}")]
    Csv(String),
    #[error("malformed json: {0}")]
    Json(String),
}

/// Ledger or threshold store unavailable or rejecting the write.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("notification sink rejected alert: {0}")]
    Rejected(String),
    #[error("notification transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue poll failed: {0}")]
    Poll(String),
    #[error("acknowledge failed for receipt {receipt}: {reason}")]
    Acknowledge { receipt: String, reason: String },
    #[error("release failed for receipt {receipt}: {reason}")]
    Release { receipt: String, reason: String },
    #[error("unknown or expired receipt {0}")]
    UnknownReceipt(String),
}

/// Everything that aborts one work item without acknowledgment.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("record check rejected {item_id}@{warehouse}: {reason}")]
    CheckRejected { item_id: String, warehouse: String, reason: String },
}

impl ProcessingError {
    /// Metric label for the failure reason.
    pub fn reason(&self) -> &'static str {
        match self {
            ProcessingError::Decode(_) => "decode",
            ProcessingError::Persistence(_) => "persistence",
            ProcessingError::CheckRejected { .. } => "check_rejected",
        }
    }
}
