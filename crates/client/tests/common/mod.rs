#![allow(dead_code)]

use std::fs::{self, File, Permissions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use modproxy_api::ProcessLiveness;
use modproxy_bus::LocalBus;
use modproxy_client::ClientConfig;
use modproxy_server::{BrokerHandle, ResponseBroker, ServerConfig, ServiceRegistry};
use tempfile::TempDir;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

pub const CLIENT: &str = "com.example.client";

/// A provider serving modules from scratch storage over a [`LocalBus`].
pub struct Fixture {
    pub bus: LocalBus,
    pub temp: TempDir,
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub process: Arc<ProcessLiveness>,
    broker: Option<BrokerHandle>,
}

impl Fixture {
    /// Storage and configs only; no provider is listening.
    pub fn without_provider() -> Self {
        let temp = TempDir::new().unwrap();
        let base = fs::canonicalize(temp.path()).unwrap();
        let user_de = base.join("user_de");

        let server = ServerConfig::default();
        let server = server.clone().with_data_dir(user_de.join(&server.provider_package));
        fs::create_dir_all(server.module_root()).unwrap();

        let client = ClientConfig {
            user_de_dir: user_de.to_string_lossy().to_string(),
            discovery_timeout_ms: 100,
            ..ClientConfig::default()
        };

        let bus = LocalBus::new();
        bus.grant(&server.provider_package, &server.permission);

        Self {
            bus,
            temp,
            server,
            client,
            process: ProcessLiveness::new("provider"),
            broker: None,
        }
    }

    pub fn new() -> Self {
        let mut fixture = Self::without_provider();
        fixture.start_provider();
        fixture
    }

    /// Starts a fresh provider process, replacing any previous one.
    pub fn start_provider(&mut self) {
        self.broker.take();
        self.process = ProcessLiveness::new("provider");
        let registry = Arc::new(ServiceRegistry::new(self.server.clone(), self.process.clone()));
        let endpoint = self.bus.endpoint(self.server.provider_package.clone());
        self.broker = Some(ResponseBroker::new(registry).register(endpoint).unwrap());
    }

    pub fn kill_provider(&self) {
        self.process.kill();
    }

    pub fn module_path(&self, rel: &str) -> PathBuf {
        self.server.module_root().join(rel)
    }

    /// Writes a world-readable module container below the module root.
    pub fn module(&self, rel: &str, entries: &[(&str, &[u8], CompressionMethod)]) -> PathBuf {
        let path = self.module_path(rel);
        let mut dir = self.server.module_root();
        if let Some(parent) = Path::new(rel).parent() {
            for component in parent.components() {
                dir.push(component);
                fs::create_dir_all(&dir).unwrap();
                fs::set_permissions(&dir, Permissions::from_mode(0o755)).unwrap();
            }
        }
        write_container(&path, entries);
        fs::set_permissions(&path, Permissions::from_mode(0o644)).unwrap();
        path
    }
}

pub fn write_container(path: &Path, entries: &[(&str, &[u8], CompressionMethod)]) {
    let file = File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    for (name, data, method) in entries {
        let options = SimpleFileOptions::default().compression_method(*method);
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

pub fn stored(name: &'static str, data: &'static [u8]) -> (&'static str, &'static [u8], CompressionMethod) {
    (name, data, CompressionMethod::Stored)
}

pub fn deflated(name: &'static str, data: &'static [u8]) -> (&'static str, &'static [u8], CompressionMethod) {
    (name, data, CompressionMethod::Deflated)
}
