use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout error after {0:?}")]
    TimeoutError(Duration),

    #[error("Bad request: endpoint=\"{endpoint}\"; code={code}; message=\"{message}\"")]
    ApiError {
        endpoint: String,
        code: i64,
        message: String,
    },

    #[error("Server respond with status {status} on {endpoint}")]
    StatusError { endpoint: String, status: u16 },

    #[error("Failed to decode response: {0}")]
    DecodeError(String),

    #[error("Order validation failed: {0}")]
    ValidationError(String),

    #[error("Unknown contract: {0}")]
    UnknownContract(String),

    #[error("Missing credentials: {0}")]
    CredentialsError(String),

    #[error("Stream error: {0}")]
    StreamError(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeErrorType {
    NetworkError,
    TimeoutError,
    ApiError,
    StatusError,
    ServerError,
    DecodeError,
    ValidationError,
    UnknownContract,
    CredentialsError,
    StreamError,
}

impl ExchangeError {
    pub fn error_type(&self) -> ExchangeErrorType {
        match self {
            ExchangeError::NetworkError(_) => ExchangeErrorType::NetworkError,
            ExchangeError::TimeoutError(_) => ExchangeErrorType::TimeoutError,
            ExchangeError::ApiError { .. } => ExchangeErrorType::ApiError,
            ExchangeError::StatusError { status, .. } if *status >= 500 => ExchangeErrorType::ServerError,
            ExchangeError::StatusError { .. } => ExchangeErrorType::StatusError,
            ExchangeError::DecodeError(_) => ExchangeErrorType::DecodeError,
            ExchangeError::ValidationError(_) => ExchangeErrorType::ValidationError,
            ExchangeError::UnknownContract(_) => ExchangeErrorType::UnknownContract,
            ExchangeError::CredentialsError(_) => ExchangeErrorType::CredentialsError,
            ExchangeError::StreamError(_) => ExchangeErrorType::StreamError,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.error_type(),
            ExchangeErrorType::NetworkError | ExchangeErrorType::TimeoutError | ExchangeErrorType::ServerError
        )
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExchangeError::TimeoutError(Duration::from_secs(0))
        } else if err.is_decode() {
            ExchangeError::DecodeError(err.to_string())
        } else {
            ExchangeError::NetworkError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::DecodeError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(ExchangeError::NetworkError("reset".into()).is_retryable());
        assert!(ExchangeError::StatusError { endpoint: "/fapi/v1/depth".into(), status: 503 }.is_retryable());
        assert!(!ExchangeError::StatusError { endpoint: "/fapi/v1/depth".into(), status: 404 }.is_retryable());
        assert!(!ExchangeError::ApiError { endpoint: "/fapi/v1/order".into(), code: -2019, message: "Margin is insufficient.".into() }
            .is_retryable());
    }
}
