#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("File proxy service unavailable")]
    ServiceUnavailable,
    /// Deliberately carries no detail: the caller is untrusted.
    #[error("Access denied")]
    SecurityRejection,
    #[error("Malformed reply: {0}")]
    MalformedReply(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    pub fn dead_object() -> Self {
        ProxyError::Transport("dead object".to_string())
    }
}

pub type ProxyResult<T> = std::result::Result<T, ProxyError>;
