//! Crate-level error type for the Mock Chat client.

use thiserror::Error;

/// Errors surfaced by the client.
///
/// Each variant carries enough context to diagnose the failure without
/// needing to inspect the originating error directly. Stream-event parse
/// failures are deliberately *not* represented here — malformed SSE
/// payloads are logged and dropped while the stream continues.
#[derive(Debug, Error)]
pub enum ChatError {
    /// A TCP-level connection could not be established.
    #[error("connection failed to {url}: {detail}")]
    Connect { url: String, detail: String },

    /// The backend replied with a non-2xx HTTP status code.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// The session token was rejected (401). Callers must clear the
    /// local session and send the user back to the entry screen.
    #[error("session token rejected (401), logout required")]
    Unauthorized,

    /// The conversation key does not exist or the conversation has
    /// already ended. Callers clear the stored key and redirect.
    #[error("conversation key '{conv_key}' is invalid or ended")]
    InvalidKey { conv_key: String },

    /// The backend returned a structured `{error: "..."}` body.
    #[error("backend error: {message}")]
    Backend { message: String },

    /// A required response body could not be parsed.
    #[error("response decode failed: {detail}")]
    Decode { detail: String },

    /// The conversation has ended; sends are rejected client-side.
    #[error("conversation has ended, no further messages can be sent")]
    ConversationEnded,

    /// Session store persistence failure.
    #[error("session store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No local session; the command needs one.
    #[error("not logged in — run `mock-chat login` or `mock-chat join <key>` first")]
    NotLoggedIn,

    /// No conversation key given and none stored in the session.
    #[error("no conversation key — pass --conv-key or join a conversation first")]
    NoConversation,

    /// The command is gated to trainer/admin sessions.
    #[error("'{action}' requires a trainer or admin session")]
    RequiresOperator { action: String },
}

impl ChatError {
    /// Whether this error must tear down the local session (forced
    /// logout on 401, per the auth guard behavior).
    pub fn forces_logout(&self) -> bool {
        matches!(self, ChatError::Unauthorized)
    }

    /// Whether this error invalidates the stored conversation key.
    pub fn clears_conversation(&self) -> bool {
        matches!(self, ChatError::InvalidKey { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_connect() {
        let err = ChatError::Connect {
            url: "http://localhost:9999".to_string(),
            detail: "connection refused".to_string(),
        };
        let s = err.to_string();
        assert!(s.contains("http://localhost:9999"));
        assert!(s.contains("connection refused"));
    }

    #[test]
    fn test_display_http_contains_status() {
        let err = ChatError::Http {
            status: 503,
            url: "http://api/conversations".to_string(),
        };
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_unauthorized_forces_logout() {
        assert!(ChatError::Unauthorized.forces_logout());
        assert!(!ChatError::ConversationEnded.forces_logout());
    }

    #[test]
    fn test_invalid_key_clears_conversation() {
        let err = ChatError::InvalidKey {
            conv_key: "ABC123".to_string(),
        };
        assert!(err.clears_conversation());
        assert!(!err.forces_logout());
    }

    #[test]
    fn test_http_does_not_clear_conversation() {
        let err = ChatError::Http { status: 500, url: "x".to_string() };
        assert!(!err.clears_conversation());
    }

    #[test]
    fn test_backend_message_forwarded() {
        let err = ChatError::Backend {
            message: "Failed to create conversation".to_string(),
        };
        assert!(err.to_string().contains("Failed to create conversation"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: ChatError = io.into();
        assert!(matches!(err, ChatError::Io(_)));
    }

    #[test]
    fn test_requires_operator_names_action() {
        let err = ChatError::RequiresOperator { action: "end".to_string() };
        assert!(err.to_string().contains("'end'"));
        assert!(!err.forces_logout());
    }

    #[test]
    fn test_is_std_error() {
        fn assert_error<E: std::error::Error>(_: &E) {}
        let err = ChatError::ConversationEnded;
        assert_error(&err);
    }
}
