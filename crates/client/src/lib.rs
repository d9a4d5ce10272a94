pub mod config;
pub mod error;
pub mod fd_cache;
pub mod hooks;
pub mod module;
pub mod orchestrator;
mod reader;

pub use config::ClientConfig;
pub use error::{ModuleError, Result};
pub use fd_cache::ModuleFdCache;
pub use hooks::DynamiteClient;
pub use module::{DexSegment, ModuleLoadState, map_code_segments};
pub use orchestrator::RequestOrchestrator;
