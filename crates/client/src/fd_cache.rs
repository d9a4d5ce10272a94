use std::collections::HashMap;
use std::os::fd::OwnedFd;
use std::sync::{Arc, Mutex, PoisonError};

use modproxy_api::FileProxyService;
use tracing::debug;

use crate::error::{ModuleError, Result};

/// Descriptors of provider modules opened through the file proxy, by path.
///
/// Entries are never evicted: native code may dup a descriptor at any time.
/// Descriptors cannot go stale either, since provider updates terminate clients.
#[derive(Default)]
pub struct ModuleFdCache {
    entries: Mutex<HashMap<String, Arc<OwnedFd>>>,
}

impl ModuleFdCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<Arc<OwnedFd>> {
        self.lock().get(path).cloned()
    }

    /// Returns the cached descriptor for `path`, opening it through `service` on a miss.
    pub fn get_or_open(&self, path: &str, service: &dyn FileProxyService) -> Result<Arc<OwnedFd>> {
        // Uncontended in practice; holding the lock across the call keeps one open per path.
        let mut entries = self.lock();
        if let Some(fd) = entries.get(path) {
            return Ok(fd.clone());
        }

        let fd = service
            .open_file(path)?
            .ok_or_else(|| ModuleError::Unavailable(path.to_string()))?;
        debug!("Opened module {}", path);
        let fd = Arc::new(fd);
        entries.insert(path.to_string(), fd.clone());
        Ok(fd)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<OwnedFd>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
