//! Per-call invocation context

use std::fmt;

/// Caller state passed explicitly to every collaborator call
#[derive(Clone, Default, PartialEq, Eq)]
pub struct InvocationContext {
    pub execution_id: String,
    pub session_id: Option<String>,
    /// Bearer credentials forwarded to collaborators
    pub credentials: Option<String>,
}

impl InvocationContext {
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            session_id: None,
            credentials: None,
        }
    }

    pub fn with_session_id(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_credentials(mut self, credentials: Option<String>) -> Self {
        self.credentials = credentials;
        self
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("execution_id", &self.execution_id)
            .field("session_id", &self.session_id)
            .field("credentials", &self.credentials.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
