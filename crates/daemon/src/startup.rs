use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// The daemon rewrites a root-owned config file and signals a root-owned
/// process; refuse to start without the privilege to do either.
pub fn ensure_superuser() -> Result<()> {
    if !nix::unistd::Uid::effective().is_root() {
        anyhow::bail!("must be run as root");
    }
    Ok(())
}

/// Gate startup on the platform identity file. An empty supported list
/// disables the check.
pub fn check_platform(platform_file: &Path, supported: &[String]) -> Result<()> {
    if supported.is_empty() {
        debug!("no platform restrictions configured");
        return Ok(());
    }

    let platform = read_platform_identity(platform_file)?;
    if supported.iter().any(|p| platform.starts_with(p.as_str())) {
        info!("platform {} is supported", platform);
        Ok(())
    } else {
        Err(anyhow!("platform {} is not in the supported list", platform))
    }
}

/// Read the platform identity from a machine.conf-style file of
/// `key=value` lines; the first key ending in "platform" wins.
pub fn read_platform_identity(path: &Path) -> Result<String> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read platform file {}", path.display()))?;

    parse_platform_identity(&contents)
        .ok_or_else(|| anyhow!("no platform identity found in {}", path.display()))
}

fn parse_platform_identity(contents: &str) -> Option<String> {
    contents.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        if key.trim().ends_with("platform") && !value.trim().is_empty() {
            Some(value.trim().to_string())
        } else {
            None
        }
    })
}
