use std::fs::{self, File, Permissions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use modproxy_api::ProcessLiveness;
use modproxy_bus::LocalBus;
use modproxy_client::{ClientConfig, DynamiteClient};
use modproxy_server::{BrokerHandle, ResponseBroker, ServerConfig, ServiceRegistry};
use tracing::info;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use crate::config::CliConfig;
use crate::dex::segment_table;

const CLIENT_PACKAGE: &str = "modproxy.demo";
const MODULE_NAME: &str = "DemoDynamite.apk";

fn fake_dex(version: &[u8; 3], len: usize) -> Vec<u8> {
    let mut dex = b"dex\n".to_vec();
    dex.extend_from_slice(version);
    dex.push(0);
    dex.resize(len, 0);
    dex
}

fn write_module(path: &Path) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut zip = zip::ZipWriter::new(file);
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file("classes.dex", stored)?;
    zip.write_all(&fake_dex(b"035", 256))?;
    zip.start_file("classes2.dex", stored)?;
    zip.write_all(&fake_dex(b"039", 128))?;
    zip.start_file("classes3.dex", deflated)?;
    zip.write_all(&fake_dex(b"039", 512))?;
    zip.start_file("lib/arm64-v8a/libdemo.so", stored)?;
    zip.write_all(b"\x7fELF")?;
    zip.finish()?;

    fs::set_permissions(path, Permissions::from_mode(0o644))?;
    Ok(())
}

fn start_provider(
    bus: &LocalBus,
    server: &ServerConfig,
) -> anyhow::Result<(Arc<ProcessLiveness>, BrokerHandle)> {
    let process = ProcessLiveness::new(server.provider_package.clone());
    let registry = Arc::new(ServiceRegistry::new(server.clone(), process.clone()));
    let endpoint = bus.endpoint(server.provider_package.clone());
    let broker = ResponseBroker::new(registry).register(endpoint)?;
    info!("Provider {} is listening", server.provider_package);
    Ok((process, broker))
}

pub fn run(config: CliConfig) -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let user_de = fs::canonicalize(temp.path())?.join("user_de");

    let server = config.server;
    let server = server.clone().with_data_dir(user_de.join(&server.provider_package));
    fs::create_dir_all(server.module_root())?;
    let module: PathBuf = server.module_root().join(MODULE_NAME);
    write_module(&module)?;
    let module_path = module.to_string_lossy().to_string();

    let client_config = ClientConfig {
        user_de_dir: user_de.to_string_lossy().to_string(),
        ..config.client
    };

    let bus = LocalBus::new();
    bus.grant(&server.provider_package, &server.permission);
    let (process, broker) = start_provider(&bus, &server)?;

    let client = DynamiteClient::new(bus.endpoint(CLIENT_PACKAGE), client_config);

    let segments = client.map_module(&module_path)?;
    println!("Mapped {} segment(s) of {}", segments.len(), module_path);
    println!("{}", segment_table(&segments));

    if let Some(modified) = client.last_modified(&module_path)? {
        println!("Last modified: {modified:?}");
    }

    let class_path = format!("{module_path}:/system/framework/framework.jar");
    println!("Class path:    {}", client.rewrite_class_loader_path(&class_path, false)?);
    let native_path = format!("{module_path}!/lib/arm64-v8a");
    println!("Native path:   {}", client.rewrite_class_loader_path(&native_path, true)?);

    info!("Killing provider {}", process.name());
    process.kill();
    drop(broker);
    println!(
        "Provider died; cached service: {}",
        client.orchestrator().has_cached_service()
    );

    let (_process, _broker) = start_provider(&bus, &server)?;
    client.orchestrator().get_service()?;
    println!(
        "Rediscovered provider after {} discoveries",
        client.orchestrator().discovery_count()
    );

    Ok(())
}
