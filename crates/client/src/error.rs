use modproxy_api::ProxyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid module container: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("Malformed module container: {0}")]
    Malformed(String),
    #[error("Unable to open {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, ModuleError>;
