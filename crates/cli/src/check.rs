use std::path::PathBuf;

use modproxy_api::ProxyError;
use modproxy_server::{FileAccessService, Sanitized};
use tracing::info;

use crate::config::CliConfig;

pub fn run(config: CliConfig, path: &str, data_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let mut server = config.server;
    if let Some(data_dir) = data_dir {
        server = server.with_data_dir(data_dir);
    }

    let service = FileAccessService::new(&server);
    info!("Checking {} against {}", path, service.module_root().display());

    match service.sanitize(path) {
        Ok(Sanitized::Accepted(canonical)) => println!("accepted: {}", canonical.display()),
        Ok(Sanitized::NotFound) => println!("not found: {path}"),
        Err(ProxyError::SecurityRejection) => println!("rejected: {path}"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
