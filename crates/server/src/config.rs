use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_PROVIDER_PACKAGE: &str = "com.google.android.gms";
pub const DEFAULT_PERMISSION: &str = "com.google.android.gms.permission.INTERNAL_BROADCAST";
pub const DEFAULT_WORKER_NAME: &str = "DynamiteFileProxy";

/// Provider-side configuration. Acts as the application-scope storage context
/// the file proxy service is built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Device-protected data directory of the provider package.
    pub data_dir: PathBuf,
    /// Module storage, relative to `data_dir`.
    pub module_rel_path: PathBuf,
    /// Required extension of servable modules. `None` disables the check.
    pub module_extension: Option<String>,
    pub provider_package: String,
    pub permission: String,
    pub worker_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/data/user_de/0").join(DEFAULT_PROVIDER_PACKAGE),
            module_rel_path: PathBuf::from("app_chimera/m"),
            module_extension: Some("apk".to_string()),
            provider_package: DEFAULT_PROVIDER_PACKAGE.to_string(),
            permission: DEFAULT_PERMISSION.to_string(),
            worker_name: DEFAULT_WORKER_NAME.to_string(),
        }
    }
}

impl ServerConfig {
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn module_root(&self) -> PathBuf {
        self.data_dir.join(&self.module_rel_path)
    }
}
