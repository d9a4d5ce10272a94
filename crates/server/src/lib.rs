pub mod broker;
pub mod config;
pub mod registry;
pub mod sanitize;
pub mod service;

pub use broker::{BrokerHandle, ResponseBroker};
pub use config::ServerConfig;
pub use registry::ServiceRegistry;
pub use sanitize::{PathSanitizer, Sanitized};
pub use service::FileAccessService;
