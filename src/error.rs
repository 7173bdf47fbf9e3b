use std::io;
use thiserror::Error;

/// Unified error type for the proxy.
///
/// Every failure is scoped to a single session: the accept loop logs and
/// moves on, it never dies with a connection.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Transport error (socket reset, broken pipe, connect timeout)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Malformed VarInt, truncated frame, unexpected packet during Login
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// RSA encrypt failure or cipher init failure; aborts Login
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Mojang profile/session failure. Non-fatal to the session: the
    /// upstream server may independently reject the identity.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    /// Protocol violation with a short description
    pub fn protocol(msg: impl Into<String>) -> Self {
        ProxyError::Protocol(msg.into())
    }
}
