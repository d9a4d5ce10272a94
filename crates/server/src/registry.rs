//! Process-scoped owner of the provider's file proxy service.

use std::sync::{Arc, OnceLock};

use modproxy_api::{CapabilityHandle, ProcessLiveness};
use tracing::debug;

use crate::config::ServerConfig;
use crate::service::FileAccessService;

/// Builds the [`FileAccessService`] on first use and hands out capability
/// handles to that single instance afterwards.
pub struct ServiceRegistry {
    config: ServerConfig,
    process: Arc<ProcessLiveness>,
    handle: OnceLock<CapabilityHandle>,
}

impl ServiceRegistry {
    pub fn new(config: ServerConfig, process: Arc<ProcessLiveness>) -> Self {
        Self {
            config,
            process,
            handle: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Liveness of the provider process owning the service.
    pub fn process(&self) -> &Arc<ProcessLiveness> {
        &self.process
    }

    pub fn is_initialized(&self) -> bool {
        self.handle.get().is_some()
    }

    pub fn handle(&self) -> CapabilityHandle {
        self.handle
            .get_or_init(|| {
                let service = FileAccessService::new(&self.config);
                debug!(
                    "Created file proxy service for {}",
                    service.module_root().display()
                );
                CapabilityHandle::new(Arc::new(service), self.process.clone())
            })
            .clone()
    }
}
