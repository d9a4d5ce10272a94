use std::fs::{self, OpenOptions};
use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::SystemTime;

use modproxy_api::{FileProxyService, ProxyError, ProxyResult};
use tracing::debug;

use crate::config::ServerConfig;
use crate::sanitize::{PathSanitizer, Sanitized};

/// Serves read-only descriptors for modules in the provider's module storage.
///
/// Holds nothing but its immutable root, so a single instance is shared by
/// every client without locking.
pub struct FileAccessService {
    sanitizer: PathSanitizer,
}

impl FileAccessService {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            sanitizer: PathSanitizer::new(&config.module_root(), config.module_extension.clone()),
        }
    }

    pub fn module_root(&self) -> &Path {
        self.sanitizer.root()
    }

    /// Runs the full validation without touching the file.
    pub fn sanitize(&self, raw_path: &str) -> ProxyResult<Sanitized> {
        self.sanitizer.sanitize(raw_path)
    }
}

impl FileProxyService for FileAccessService {
    fn open_file(&self, raw_path: &str) -> ProxyResult<Option<OwnedFd>> {
        let path = match self.sanitize(raw_path)? {
            Sanitized::Accepted(path) => path,
            Sanitized::NotFound => return Ok(None),
        };

        // O_NOFOLLOW: a node swapped for a symlink after validation must not be opened.
        let opened = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NOFOLLOW | libc::O_CLOEXEC)
            .open(&path);
        match opened {
            Ok(file) => {
                debug!("Opened {} for remote", path.display());
                Ok(Some(OwnedFd::from(file)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) if e.raw_os_error() == Some(libc::ELOOP) => {
                debug!("Path {} changed after validation", path.display());
                Err(ProxyError::SecurityRejection)
            }
            Err(e) => Err(ProxyError::Io(e)),
        }
    }

    fn last_modified(&self, raw_path: &str) -> ProxyResult<Option<SystemTime>> {
        let path = match self.sanitize(raw_path)? {
            Sanitized::Accepted(path) => path,
            Sanitized::NotFound => return Ok(None),
        };

        match fs::symlink_metadata(&path) {
            Ok(metadata) => Ok(Some(metadata.modified()?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ProxyError::Io(e)),
        }
    }
}
