pub mod capability;
pub mod envelope;
pub mod error;
pub mod transport;

// Re-export commonly used types
pub use capability::{CapabilityHandle, DeathLink, FileProxyService, ProcessLiveness};
pub use envelope::{
    ACTION_REQUEST, ACTION_RESPONSE, Bundle, EXTRA_BINDER, EXTRA_BUNDLE, EXTRA_PACKAGE, Envelope,
    Extra,
};
pub use error::{ProxyError, ProxyResult};
pub use transport::{Broadcaster, Inbox, ReceiverFilter, Registration, RegistrationId};
