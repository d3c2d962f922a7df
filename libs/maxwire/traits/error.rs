use thiserror::Error;

/// Main error type for maxwire
///
/// Errors are `Clone` so that a single disconnect cause can be handed to
/// every request that was in flight on the dropped connection.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MaxWireError {
    /// No active transport
    #[error("Not connected")]
    NotConnected,

    /// TLS, SOCKS5 or protocol handshake failed
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Write error, broken pipe or a not-connected race while sending
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// No reply within the deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Peer closed the connection or the stream ended
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// A single frame could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// A frame could not be encoded
    #[error("Encode error: {0}")]
    Encode(String),

    /// Invalid configuration (phone format, registration fields, ...)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Server rejected the login or the stored token
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Response payload carried an application-level `error` field
    #[error("Server error {error}: {message}")]
    Server { error: String, message: String },

    /// SOCKS5 negotiation failed
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// Credential store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal channel closed
    #[error("Channel send error: {0}")]
    ChannelSend(String),

    /// Invalid state transition
    #[error("Invalid state transition: {0}")]
    InvalidState(String),

    /// Pending request was superseded by a newer request on the same sequence
    #[error("Request cancelled")]
    Cancelled,

    /// Reconnection strategy exhausted
    #[error("Reconnection failed after {attempts} attempts: {reason}")]
    ReconnectionFailed { attempts: usize, reason: String },
}

/// Coarse classification used by the session lifecycle and the retry engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Fatal, never retried
    Configuration,
    /// Clears the token and stops the client
    Authentication,
    /// Transient, triggers reconnect/backoff
    Connectivity,
    /// Corrupt or malformed frame
    Protocol,
    /// Local to one request
    Request,
}

impl MaxWireError {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            MaxWireError::Configuration(_) | MaxWireError::Storage(_) => ErrorClass::Configuration,
            MaxWireError::AuthenticationFailed(_) => ErrorClass::Authentication,
            MaxWireError::NotConnected
            | MaxWireError::HandshakeFailed(_)
            | MaxWireError::SendFailed(_)
            | MaxWireError::ConnectionClosed(_)
            | MaxWireError::Proxy(_)
            | MaxWireError::ReconnectionFailed { .. } => ErrorClass::Connectivity,
            MaxWireError::Decode(_) | MaxWireError::Encode(_) => ErrorClass::Protocol,
            MaxWireError::Timeout(_)
            | MaxWireError::Server { .. }
            | MaxWireError::ChannelSend(_)
            | MaxWireError::InvalidState(_)
            | MaxWireError::Cancelled => ErrorClass::Request,
        }
    }

    /// Whether the receive loop must stop reading after this error
    ///
    /// Decode failures are skipped in place; everything that means the
    /// stream itself is gone ends the loop.
    pub fn is_transport_fatal(&self) -> bool {
        matches!(
            self,
            MaxWireError::NotConnected
                | MaxWireError::ConnectionClosed(_)
                | MaxWireError::SendFailed(_)
                | MaxWireError::HandshakeFailed(_)
                | MaxWireError::Proxy(_)
        )
    }

    /// Whether this is a single-frame decode failure
    #[inline]
    pub fn is_decode(&self) -> bool {
        matches!(self, MaxWireError::Decode(_))
    }

    pub(crate) fn io(context: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => {
                MaxWireError::ConnectionClosed(format!("{}: {}", context, err))
            }
            _ => MaxWireError::SendFailed(format!("{}: {}", context, err)),
        }
    }
}

/// Result type for maxwire operations
pub type Result<T> = std::result::Result<T, MaxWireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(
            MaxWireError::Configuration("phone".into()).class(),
            ErrorClass::Configuration
        );
        assert_eq!(
            MaxWireError::AuthenticationFailed("login.token".into()).class(),
            ErrorClass::Authentication
        );
        assert_eq!(MaxWireError::NotConnected.class(), ErrorClass::Connectivity);
        assert_eq!(
            MaxWireError::Timeout("seq=1".into()).class(),
            ErrorClass::Request
        );
        assert_eq!(MaxWireError::Decode("bad".into()).class(), ErrorClass::Protocol);
    }

    #[test]
    fn test_decode_is_not_transport_fatal() {
        assert!(!MaxWireError::Decode("lz4".into()).is_transport_fatal());
        assert!(MaxWireError::ConnectionClosed("eof".into()).is_transport_fatal());
        assert!(!MaxWireError::Timeout("x".into()).is_transport_fatal());
    }

    #[test]
    fn test_io_mapping() {
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(
            MaxWireError::io("read header", eof),
            MaxWireError::ConnectionClosed(_)
        ));
        let other = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert!(matches!(
            MaxWireError::io("write", other),
            MaxWireError::SendFailed(_)
        ));
    }
}
