use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber;

#[derive(Parser, Debug)]
#[command(name = "snmpsyncd")]
#[command(about = "SNMP ACL Sync Daemon", long_about = None)]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with timestamps and levels
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_ansi(true)
        .init();

    info!("SNMP ACL Sync Daemon v{}", env!("CARGO_PKG_VERSION"));

    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    info!("Loading configuration...");
    let config = match snmpsyncd_daemon::config::load_config(args.config.as_deref()) {
        Ok(cfg) => {
            info!("Configuration loaded successfully");
            cfg
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    // Display configuration summary
    info!("Config file under management: {:?}", config.snmpd_conf_path);
    info!("Service name: {}", config.service_name);
    info!("ACL table kind: {}", config.acl_table_kind);
    info!("Reload target process: {}", config.snmpd_process);
    info!("Reload signal: {}", config.reload_signal);
    info!("Store socket: {:?}", config.store_socket);
    info!("Pass record directory: {:?}", config.state_dir);

    // Run startup validation
    info!("Running startup validation...");

    if let Err(e) = snmpsyncd_daemon::startup::ensure_superuser() {
        error!("Privilege check failed: {}", e);
        return Err(e);
    }

    if let Err(e) = snmpsyncd_daemon::startup::check_platform(
        &config.platform_file,
        &config.supported_platforms,
    ) {
        error!("Platform check failed: {}", e);
        return Err(e);
    }

    // Connect to the config store; an unreachable store is fatal
    info!("Connecting to config store...");
    let store = match snmpsyncd_daemon::SocketStore::connect(&config.store_socket) {
        Ok(store) => {
            info!("Connected to config store");
            store
        }
        Err(e) => {
            error!("Failed to connect to config store: {}", e);
            return Err(e.into());
        }
    };

    info!("Startup validation complete");
    info!("Starting daemon main loop...");

    // Run the daemon main loop
    if let Err(e) = snmpsyncd_daemon::run_daemon_loop(config, store).await {
        error!("Daemon loop error: {}", e);
        return Err(e);
    }

    Ok(())
}
