use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Payment gateway is not configured: {0}")]
    NotConfigured(String),

    #[error("Malformed gateway payload: {0}")]
    MalformedPayload(String),

    #[error("Gateway signature mismatch")]
    SignatureMismatch,

    #[error("Product code mismatch: expected {expected}, got {actual}")]
    ProductMismatch { expected: String, actual: String },

    #[error("Payment gateway unreachable: {0}")]
    Unreachable(String),

    #[error("Unexpected gateway response: {0}")]
    UnexpectedResponse(String),
}

impl GatewayError {
    /// Transient failures that should be retried later rather than treated as verdicts.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Unreachable(_))
    }
}
