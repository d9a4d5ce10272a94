use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Client-side configuration of the discovery protocol and module hooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub provider_package: String,
    /// Permission only the provider holds; replies from anyone else are ignored.
    pub permission: String,
    /// Upper bound on one discovery exchange.
    pub discovery_timeout_ms: u64,
    pub worker_name: String,
    /// Device-protected per-user data directory containing the provider's data dir.
    pub user_de_dir: String,
    /// Prefix of descriptor-backed paths handed to class loaders.
    pub fd_path_prefix: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            provider_package: "com.google.android.gms".to_string(),
            permission: "com.google.android.gms.permission.INTERNAL_BROADCAST".to_string(),
            // Short enough not to stall a UI thread when the provider is gone
            discovery_timeout_ms: 250,
            worker_name: "DynamiteFileProxy".to_string(),
            user_de_dir: "/data/user_de/0".to_string(),
            fd_path_prefix: "/proc/self/fd/".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    /// Path prefix of everything stored in the provider's data directory.
    pub fn provider_data_prefix(&self) -> String {
        format!(
            "{}/{}/",
            self.user_de_dir.trim_end_matches('/'),
            self.provider_package
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_data_prefix() {
        let config = ClientConfig {
            user_de_dir: "/data/user_de/10/".to_string(),
            ..ClientConfig::default()
        };
        assert_eq!(
            config.provider_data_prefix(),
            "/data/user_de/10/com.google.android.gms/"
        );
    }

    #[test]
    fn test_timeout_from_json() {
        let config: ClientConfig = serde_json::from_str(r#"{ "discovery_timeout_ms": 40 }"#).unwrap();
        assert_eq!(config.discovery_timeout(), Duration::from_millis(40));
        assert_eq!(config.worker_name, "DynamiteFileProxy");
    }
}
