use thiserror::Error;

pub type Result<T> = std::result::Result<T, GovUkError>;

#[derive(Debug, Error)]
pub enum GovUkError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl GovUkError {
    /// Whether a retry has any chance of succeeding. Rate limiting and server
    /// errors are transient; client errors and malformed payloads are not.
    pub fn is_transient(&self) -> bool {
        match self {
            GovUkError::Network(_) | GovUkError::Timeout(_) => true,
            GovUkError::Api { status, .. } => *status == 429 || *status >= 500,
            GovUkError::Parse(_) | GovUkError::InvalidUrl(_) => false,
        }
    }
}

impl From<reqwest::Error> for GovUkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GovUkError::Timeout(err.to_string())
        } else if err.is_decode() {
            GovUkError::Parse(err.to_string())
        } else {
            GovUkError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GovUkError {
    fn from(err: serde_json::Error) -> Self {
        GovUkError::Parse(err.to_string())
    }
}

impl From<url::ParseError> for GovUkError {
    fn from(err: url::ParseError) -> Self {
        GovUkError::InvalidUrl(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_rate_limits_are_transient() {
        assert!(GovUkError::Api { status: 503, message: String::new() }.is_transient());
        assert!(GovUkError::Api { status: 429, message: String::new() }.is_transient());
        assert!(GovUkError::Timeout("30s".into()).is_transient());
    }

    #[test]
    fn client_errors_are_not_transient() {
        assert!(!GovUkError::Api { status: 404, message: String::new() }.is_transient());
        assert!(!GovUkError::Parse("bad json".into()).is_transient());
    }
}
