use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Configuration file kept in sync with the store.
    pub snmpd_conf_path: PathBuf,
    /// Service name an ACL table must list to qualify.
    pub service_name: String,
    /// Table kind that marks control-plane ACLs.
    pub acl_table_kind: String,
    /// Process name resolved for reload signaling.
    pub snmpd_process: String,
    /// Signal number delivered on a config change (1 = SIGHUP).
    pub reload_signal: i32,
    pub signal_poll_interval_ms: u64,
    /// Upper bound on handler-readiness polling; absent means wait forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_max_wait_secs: Option<u64>,
    /// Unix socket of the config-store bridge.
    pub store_socket: PathBuf,
    /// Directory for per-pass state records.
    pub state_dir: PathBuf,
    pub platform_file: PathBuf,
    /// Platform identity prefixes the daemon may run on; empty = no restriction.
    pub supported_platforms: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            snmpd_conf_path: PathBuf::from("/etc/snmp/snmpd.conf"),
            service_name: "SNMP".to_string(),
            acl_table_kind: "CTRLPLANE".to_string(),
            snmpd_process: "snmpd".to_string(),
            reload_signal: 1,
            signal_poll_interval_ms: 100,
            signal_max_wait_secs: None,
            store_socket: PathBuf::from("/var/run/snmpsyncd/store.sock"),
            state_dir: PathBuf::from("/var/lib/snmpsyncd/passes"),
            platform_file: PathBuf::from("/host/machine.conf"),
            supported_platforms: Vec::new(),
        }
    }
}

pub fn load_config(path: Option<&std::path::Path>) -> Result<DaemonConfig> {
    let config = if let Some(config_path) = path {
        if config_path.exists() {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

            toml::from_str::<DaemonConfig>(&contents)
                .map_err(|e| anyhow::anyhow!("Failed to parse TOML config: {}", e))?
        } else {
            #[cfg(not(test))]
            tracing::warn!("Config file not found at {:?}, using defaults", config_path);
            DaemonConfig::default()
        }
    } else {
        #[cfg(not(test))]
        tracing::info!("No config path provided, using defaults");
        DaemonConfig::default()
    };

    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &DaemonConfig) -> Result<()> {
    if config.service_name.is_empty() {
        anyhow::bail!("service_name cannot be empty");
    }

    if config.acl_table_kind.is_empty() {
        anyhow::bail!("acl_table_kind cannot be empty");
    }

    if config.snmpd_process.is_empty() {
        anyhow::bail!("snmpd_process cannot be empty");
    }

    if !(1..=64).contains(&config.reload_signal) {
        anyhow::bail!("reload_signal must be a signal number between 1 and 64");
    }

    if config.signal_poll_interval_ms == 0 {
        anyhow::bail!("signal_poll_interval_ms must be at least 1");
    }

    Ok(())
}
