use thiserror::Error;

/// Failures talking to the run server.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response body: {0}")]
    Body(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Transport(e.to_string())
    }
}

/// A server-push message that could not be turned into an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown event type `{0}`")]
    UnknownType(String),
    #[error("malformed event: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("replay speed must be a positive finite number, got {0}")]
    InvalidSpeed(f64),
    #[error("no completed run to replay")]
    NothingToReplay,
    #[error("failed to fetch replay log: {0}")]
    Fetch(#[from] ApiError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(String),
    #[error("event log parse error: {0}")]
    Parse(String),
    #[error("no data directory available on this platform")]
    NoDataDir,
}
