use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("I/O error: {0}")]
    StdIoError(#[from] std::io::Error),

    #[error("Reqwest HTTP error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    // Backend answered with `success: false`
    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Operation timed out: {0}")]
    TimeoutError(String),

    #[error("Input is disabled for session: {0}")]
    InputDisabled(String),

    #[error("Invalid input argument: {0}")]
    InvalidInputArgument(String),
}

impl AppError {
    /// Message shown to the user in a notification. Backend messages are passed through verbatim.
    pub fn user_message(&self) -> String {
        match self {
            AppError::BackendError(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(feature = "socket")]
impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        AppError::TransportError(err.to_string())
    }
}

impl From<url::ParseError> for AppError {
    fn from(err: url::ParseError) -> Self {
        AppError::InvalidInputArgument(format!("invalid URL: {}", err))
    }
}
