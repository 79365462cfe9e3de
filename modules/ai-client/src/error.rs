use thiserror::Error;

pub type Result<T> = std::result::Result<T, AiError>;

#[derive(Debug, Error)]
pub enum AiError {
    /// The model refused to process the input. Callers treat this as a
    /// maximum-confidence signal for the requesting reason type.
    #[error("content blocked by AI safety filters")]
    ContentBlocked,

    /// The reply did not conform to the requested schema. Never retried.
    #[error("response did not match the requested schema: {0}")]
    SchemaViolation(String),

    #[error("rate limited by AI backend")]
    RateLimited,

    #[error("AI API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("empty response from model")]
    EmptyResponse,

    #[error("chat turn timed out")]
    Timeout,

    #[error("request limiter closed")]
    LimiterClosed,
}

impl AiError {
    /// Transient transport failures retry with backoff; structural and policy
    /// errors never do.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited | Self::Http(_) | Self::EmptyResponse => true,
            Self::Api { status, .. } => *status >= 500,
            Self::ContentBlocked
            | Self::SchemaViolation(_)
            | Self::Timeout
            | Self::LimiterClosed => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(AiError::RateLimited.is_retryable());
        assert!(AiError::EmptyResponse.is_retryable());
        assert!(AiError::Api {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!AiError::Api {
            status: 400,
            message: String::new()
        }
        .is_retryable());
        assert!(!AiError::ContentBlocked.is_retryable());
        assert!(!AiError::SchemaViolation("bad".into()).is_retryable());
    }
}
