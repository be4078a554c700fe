#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use credwatch::config::Config;
use credwatch::{Credential, CredentialService};

/// A fixed point in time so tests control file modification stamps.
pub fn at(offset_secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_772_000_000 + offset_secs)
}

/// Write `content` to `path` and pin its modification time.
pub fn write_secret(path: &Path, content: &str, modified: SystemTime) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    file.set_modified(modified)?;
    Ok(())
}

/// Build a service from inline TOML, resolving relative paths against `dir`.
pub fn service_from(dir: &Path, toml: &str) -> Result<CredentialService> {
    let config: Config = toml::from_str(toml).context("test config")?;
    let resolved = config.resolve(dir)?;
    Ok(CredentialService::from_config(&resolved)?)
}

/// Poll the store until `name` reaches at least `version`.
pub async fn wait_for_version(
    service: &CredentialService,
    name: &str,
    version: u64,
) -> Result<Arc<Credential>> {
    let mut rx = service.watch(name)?;
    let fut = rx.wait_for(|c| c.as_ref().is_some_and(|c| c.version() >= version));
    let credential = tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .with_context(|| format!("timed out waiting for {name} v{version}"))??
        .clone()
        .context("credential missing")?;
    Ok(credential)
}
