//! Client-process hooks that route provider module access through the file proxy.

use std::fs::File;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::sync::Arc;
use std::time::SystemTime;

use modproxy_api::Broadcaster;

use crate::config::ClientConfig;
use crate::error::{ModuleError, Result};
use crate::fd_cache::ModuleFdCache;
use crate::module::{DexSegment, ModuleLoadState, map_code_segments};
use crate::orchestrator::RequestOrchestrator;

/// Separator between an archive path and a path inside it, as used by the
/// dynamic linker for libraries loaded straight from a zip.
pub const ZIP_FILE_SEPARATOR: &str = "!/";

const CLASS_PATH_SEPARATOR: char = ':';

pub struct DynamiteClient {
    orchestrator: RequestOrchestrator,
    fds: ModuleFdCache,
    data_prefix: String,
    fd_path_prefix: String,
}

impl DynamiteClient {
    pub fn new(transport: Arc<dyn Broadcaster>, config: ClientConfig) -> Self {
        let data_prefix = config.provider_data_prefix();
        let fd_path_prefix = config.fd_path_prefix.clone();
        Self {
            orchestrator: RequestOrchestrator::new(transport, config),
            fds: ModuleFdCache::new(),
            data_prefix,
            fd_path_prefix,
        }
    }

    pub fn orchestrator(&self) -> &RequestOrchestrator {
        &self.orchestrator
    }

    pub fn fd_cache(&self) -> &ModuleFdCache {
        &self.fds
    }

    /// True for paths inside the provider's data directory.
    pub fn owns_path(&self, path: &str) -> bool {
        path.starts_with(&self.data_prefix)
    }

    /// Descriptor of a provider module. The descriptor must not be closed.
    pub fn module_fd(&self, path: &str) -> Result<Arc<OwnedFd>> {
        if let Some(fd) = self.fds.get(path) {
            return Ok(fd);
        }
        let service = self.orchestrator.get_service()?;
        self.fds.get_or_open(path, &service)
    }

    /// Modification time of a provider module, read through its descriptor.
    ///
    /// `None` for paths outside the provider's data directory.
    pub fn last_modified(&self, path: &str) -> Result<Option<SystemTime>> {
        if !self.owns_path(path) {
            return Ok(None);
        }
        let fd = self.module_fd(path)?;
        let file = File::from(fd.as_fd().try_clone_to_owned()?);
        Ok(Some(file.metadata()?.modified()?))
    }

    /// Maps the dex segments of a provider module.
    pub fn map_module(&self, path: &str) -> Result<Vec<DexSegment>> {
        let fd = self.module_fd(path)?;
        let state = ModuleLoadState::new(path, fd.as_fd());
        map_code_segments(&state)
    }

    /// Replaces provider module paths in a class loader path with descriptor paths.
    ///
    /// With `native_libs`, elements have the form `<archive>!/<path in archive>`
    /// and only the archive part is replaced.
    pub fn rewrite_class_loader_path(&self, path: &str, native_libs: bool) -> Result<String> {
        let mut modified = false;
        let mut parts = Vec::new();

        for part in path.split(CLASS_PATH_SEPARATOR) {
            if !self.owns_path(part) {
                parts.push(part.to_string());
                continue;
            }

            let (file_path, lib_rel_path) = if native_libs {
                let (file_path, rel) = part.split_once(ZIP_FILE_SEPARATOR).ok_or_else(|| {
                    ModuleError::Malformed(format!("native library path without archive: {part}"))
                })?;
                (file_path, Some(rel))
            } else {
                (part, None)
            };

            let fd = self.module_fd(file_path)?;
            let fd_path = format!("{}{}", self.fd_path_prefix, fd.as_raw_fd());
            parts.push(match lib_rel_path {
                Some(rel) => format!("{fd_path}{ZIP_FILE_SEPARATOR}{rel}"),
                None => fd_path,
            });
            modified = true;
        }

        if !modified {
            return Ok(path.to_string());
        }
        Ok(parts.join(&CLASS_PATH_SEPARATOR.to_string()))
    }
}
