//! Collaborator error types

use thiserror::Error;

/// Failure reported by an external collaborator call
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InvokerError {
    /// The call did not finish before its deadline
    #[error("Invocation timed out")]
    Timeout,

    /// The collaborator returned a failure
    #[error("{0}")]
    Failed(String),

    /// The call was abandoned because nobody is listening anymore
    #[error("Invocation aborted")]
    Aborted,
}

impl InvokerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(InvokerError::Timeout.to_string(), "Invocation timed out");
        assert_eq!(InvokerError::failed("HTTP 502").to_string(), "HTTP 502");
        assert_eq!(InvokerError::Aborted.to_string(), "Invocation aborted");
    }
}
