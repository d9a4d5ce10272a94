#![allow(dead_code)]

use std::fs::{self, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use modproxy_server::ServerConfig;
use tempfile::TempDir;

/// Provider storage laid out in a scratch directory.
pub struct Storage {
    pub temp: TempDir,
    pub config: ServerConfig,
}

impl Storage {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let base = fs::canonicalize(temp.path()).unwrap();
        let config = ServerConfig::default().with_data_dir(base.join("data"));
        fs::create_dir_all(config.module_root()).unwrap();
        Self { temp, config }
    }

    pub fn root(&self) -> PathBuf {
        self.config.module_root()
    }

    /// Writes a world-readable module below the root, creating world-searchable parents.
    pub fn module(&self, rel: &str, contents: &[u8]) -> PathBuf {
        let path = self.root().join(rel);
        let mut dir = self.root();
        if let Some(parent) = Path::new(rel).parent() {
            for component in parent.components() {
                dir.push(component);
                fs::create_dir_all(&dir).unwrap();
                chmod(&dir, 0o755);
            }
        }
        fs::write(&path, contents).unwrap();
        chmod(&path, 0o644);
        path
    }

    /// Writes a world-readable file outside the module root.
    pub fn outside(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.config.data_dir.join(name);
        fs::write(&path, contents).unwrap();
        chmod(&path, 0o644);
        path
    }
}

pub fn chmod(path: &Path, mode: u32) {
    fs::set_permissions(path, Permissions::from_mode(mode)).unwrap();
}

pub fn as_raw(path: &Path) -> &str {
    path.to_str().unwrap()
}
