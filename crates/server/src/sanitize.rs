//! Path validation for module requests coming from untrusted clients.
//!
//! A raw path is accepted only when its canonical form lies strictly below the
//! module root and every node from the root down to the leaf is reachable by
//! any user: directories need the world-execute bit, the leaf must be a regular
//! file with the world-read bit.

use std::fs::{self, Metadata};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};

use modproxy_api::{ProxyError, ProxyResult};
use tracing::debug;

const S_IXOTH: u32 = 0o001;
const S_IROTH: u32 = 0o004;

/// Resolves `raw` to an absolute path without symlinks, `.` or `..`.
///
/// Unlike [`fs::canonicalize`] the leaf (and any trailing directories) may be
/// missing; the missing tail is appended as-is. A `..` that would climb out of
/// a missing directory is an error, matching kernel path resolution.
pub fn canonicalize(raw: &Path) -> io::Result<PathBuf> {
    if !raw.is_absolute() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "path is not absolute",
        ));
    }

    let mut resolved = PathBuf::from("/");
    let mut missing = false;
    for component in raw.components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Prefix(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "path prefixes are not supported",
                ));
            }
            Component::ParentDir => {
                if missing {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        "parent of a missing directory",
                    ));
                }
                resolved.pop();
            }
            Component::Normal(name) => {
                resolved.push(name);
                if missing {
                    continue;
                }
                match fs::canonicalize(&resolved) {
                    Ok(real) => resolved = real,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => missing = true,
                    Err(e) => return Err(e),
                }
            }
        }
    }
    Ok(resolved)
}

/// Outcome of a successful sanitization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sanitized {
    /// Every node passed its check.
    Accepted(PathBuf),
    /// The path is inside the root but some node does not exist.
    NotFound,
}

pub struct PathSanitizer {
    root: PathBuf,
    extension: Option<String>,
}

impl PathSanitizer {
    /// `root` is canonicalized once here; a root that cannot be resolved is
    /// used verbatim and will then only match identical prefixes.
    pub fn new(root: &Path, extension: Option<String>) -> Self {
        let root = canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        Self { root, extension }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sanitize(&self, raw_path: &str) -> ProxyResult<Sanitized> {
        let path = match canonicalize(Path::new(raw_path)) {
            Ok(path) => path,
            Err(e) => {
                debug!("Unable to canonicalize {}: {}", raw_path, e);
                return Err(ProxyError::SecurityRejection);
            }
        };

        // Modules can only live below the module root
        let relative = match path.strip_prefix(&self.root) {
            Ok(relative) if relative.components().next().is_some() => relative,
            _ => {
                debug!("Path {} is not in {}", raw_path, self.root.display());
                return Err(ProxyError::SecurityRejection);
            }
        };

        if let Some(extension) = &self.extension {
            if path.extension().and_then(|e| e.to_str()) != Some(extension.as_str()) {
                debug!("Path {} is not a .{} file", raw_path, extension);
                return Err(ProxyError::SecurityRejection);
            }
        }

        let mut node = self.root.clone();
        let mut components = relative.components().peekable();
        while let Some(component) = components.next() {
            node.push(component);
            let is_leaf = components.peek().is_none();

            let metadata = match fs::symlink_metadata(&node) {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Sanitized::NotFound),
                Err(e) => {
                    debug!("Unable to stat {}: {}", node.display(), e);
                    return Err(ProxyError::SecurityRejection);
                }
            };

            let valid = if is_leaf {
                world_readable_file(&metadata)
            } else {
                world_searchable_dir(&metadata)
            };
            if !valid {
                debug!(
                    "Node {} in path {} is not world-accessible",
                    node.display(),
                    path.display()
                );
                return Err(ProxyError::SecurityRejection);
            }
        }

        Ok(Sanitized::Accepted(path))
    }
}

fn world_readable_file(metadata: &Metadata) -> bool {
    metadata.file_type().is_file() && metadata.mode() & S_IROTH != 0
}

fn world_searchable_dir(metadata: &Metadata) -> bool {
    metadata.file_type().is_dir() && metadata.mode() & S_IXOTH != 0
}
