use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::DaemonConfig;
use crate::history::{self, PassStatus};
use crate::merge::{self, MergeOutcome};
use crate::rules::compute_allow_list;
use crate::signal::{ProcessSignaler, SignalOutcome};
use crate::store::RuleStore;

/// Main reconciliation loop: one full pass at startup, then one per store
/// change event, serialized by the single-consumer subscription. Returns
/// only on fatal store failure; the process exits non-zero in that case.
pub async fn run_daemon_loop<S: RuleStore>(config: DaemonConfig, store: S) -> Result<()> {
    info!("Starting reconciliation loop");
    info!("Config file: {}", config.snmpd_conf_path.display());
    info!(
        "Service: {} (table kind {})",
        config.service_name, config.acl_table_kind
    );
    info!("Reload target: {} signal {}", config.snmpd_process, config.reload_signal);

    let signaler = ProcessSignaler::new(
        Duration::from_millis(config.signal_poll_interval_ms),
        config.signal_max_wait_secs.map(Duration::from_secs),
    );

    let mut subscription = store
        .subscribe()
        .context("Failed to subscribe to config store change feed")?;

    // Startup pass runs from current state, before any notification.
    run_pass(&config, &store, &signaler, "startup").await?;

    loop {
        match subscription.next_event().await {
            Some(event) => {
                info!("{} changed, reconciling", event.table.name());
                run_pass(&config, &store, &signaler, event.table.name()).await?;
            }
            None => {
                // The feed only closes when the store connection is gone.
                anyhow::bail!("config store change feed closed");
            }
        }
    }
}

/// One full reconciliation pass: snapshot, reduce, merge, signal.
///
/// A store snapshot failure propagates as fatal. Everything after that
/// aborts the pass only; the previous config file stays in place and the
/// next change notification is the recovery path.
async fn run_pass<S: RuleStore>(
    config: &DaemonConfig,
    store: &S,
    signaler: &ProcessSignaler,
    trigger: &str,
) -> Result<()> {
    let mut record = history::create_record(trigger);

    let snapshot = store
        .snapshot()
        .context("Failed to read config store snapshot")?;

    let allow_list = compute_allow_list(&snapshot, &config.service_name, &config.acl_table_kind);
    info!("Computed allow list with {} entries", allow_list.len());

    match merge::merge_allow_list(&config.snmpd_conf_path, &allow_list) {
        Ok(MergeOutcome::Updated) => {
            let outcome = signaler
                .signal_when_ready(&config.snmpd_process, config.reload_signal)
                .await;
            if outcome == SignalOutcome::Delivered {
                info!(
                    "Requested {} reload with signal {}",
                    config.snmpd_process, config.reload_signal
                );
            }
            history::finish_record(&mut record, PassStatus::Applied, allow_list.len());
        }
        Ok(MergeOutcome::Unchanged) => {
            info!("Config file already in sync, no reload needed");
            history::finish_record(&mut record, PassStatus::Unchanged, allow_list.len());
        }
        Err(e) => {
            error!("Reconciliation pass aborted: {:#}", e);
            record.detail = Some(format!("{:#}", e));
            history::finish_record(&mut record, PassStatus::Failed, allow_list.len());
        }
    }

    if let Err(e) = history::save_record(&record, &config.state_dir) {
        warn!("Failed to persist pass record: {}", e);
    }

    Ok(())
}
