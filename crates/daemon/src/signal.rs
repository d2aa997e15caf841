use anyhow::{Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Per-process signal disposition bitmasks from the OS process table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalMasks {
    pub blocked: u64,
    pub ignored: u64,
    pub caught: u64,
}

impl SignalMasks {
    /// A process is ready to receive `signal` once it has expressed any
    /// disposition for it: blocked, ignored, or a handler installed. A
    /// freshly started process shows none of the three until its startup
    /// code runs, and signaling it then risks the default action instead
    /// of a graceful reload.
    pub fn is_ready(&self, signal: i32) -> bool {
        let mask = 1u64 << (signal - 1);
        (self.blocked | self.ignored | self.caught) & mask != 0
    }
}

/// How a signaling attempt ended. None of these are errors; delivery is
/// best-effort by contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Delivered,
    /// No process with the requested name; nothing to do.
    NoSuchProcess,
    /// The readiness wait bound expired before the process installed any
    /// disposition for the signal. The signal is withheld: delivering it
    /// to a handler-less process could terminate it instead of reloading.
    GaveUp,
}

/// Delivers a signal to a named process once it is ready to receive it,
/// polling the process table until then.
pub struct ProcessSignaler {
    proc_root: PathBuf,
    poll_interval: Duration,
    max_wait: Option<Duration>,
}

impl ProcessSignaler {
    pub fn new(poll_interval: Duration, max_wait: Option<Duration>) -> Self {
        Self::with_proc_root(PathBuf::from("/proc"), poll_interval, max_wait)
    }

    /// Use an alternate process-table root. Tests point this at a fixture
    /// tree.
    pub fn with_proc_root(
        proc_root: PathBuf,
        poll_interval: Duration,
        max_wait: Option<Duration>,
    ) -> Self {
        Self {
            proc_root,
            poll_interval,
            max_wait,
        }
    }

    /// Resolve `process_name` and deliver `signal` once the process shows
    /// a disposition for it. Retries on `poll_interval` until then, or
    /// until `max_wait` (when configured) runs out. A missing or vanished
    /// process is a quiet no-op.
    pub async fn signal_when_ready(&self, process_name: &str, signal: i32) -> SignalOutcome {
        let Some(pid) = find_pid_by_name(&self.proc_root, process_name) else {
            debug!("no running process named {}, skipping signal", process_name);
            return SignalOutcome::NoSuchProcess;
        };

        let mut waited = Duration::ZERO;
        loop {
            // Re-read every attempt; the process may still be initializing.
            let masks = match read_signal_masks(&self.proc_root, pid) {
                Ok(masks) => masks,
                Err(e) => {
                    debug!("process {} went away while waiting to signal: {}", pid, e);
                    return SignalOutcome::NoSuchProcess;
                }
            };

            if masks.is_ready(signal) {
                return self.deliver(pid, signal, process_name);
            }

            if let Some(max_wait) = self.max_wait {
                if waited >= max_wait {
                    warn!(
                        "{} (pid {}) never became ready for signal {} within {:?}, giving up",
                        process_name, pid, signal, max_wait
                    );
                    return SignalOutcome::GaveUp;
                }
            }

            debug!(
                "{} (pid {}) not ready for signal {} yet, retrying in {:?}",
                process_name, pid, signal, self.poll_interval
            );
            sleep(self.poll_interval).await;
            waited += self.poll_interval;
        }
    }

    fn deliver(&self, pid: i32, signal: i32, process_name: &str) -> SignalOutcome {
        let sig = match Signal::try_from(signal) {
            Ok(sig) => sig,
            Err(e) => {
                warn!("signal {} is not deliverable on this platform: {}", signal, e);
                return SignalOutcome::GaveUp;
            }
        };
        match kill(Pid::from_raw(pid), sig) {
            Ok(()) => {
                debug!("delivered {} to {} (pid {})", sig.as_str(), process_name, pid);
                SignalOutcome::Delivered
            }
            Err(nix::errno::Errno::ESRCH) => {
                debug!("{} (pid {}) exited before delivery", process_name, pid);
                SignalOutcome::NoSuchProcess
            }
            Err(e) => {
                warn!("failed to signal {} (pid {}): {}", process_name, pid, e);
                SignalOutcome::GaveUp
            }
        }
    }
}

/// Scan the process table for a process whose command name matches
/// exactly. Entries that disappear or cannot be read mid-scan are
/// skipped. Returns the first match; one is expected.
pub fn find_pid_by_name(proc_root: &Path, process_name: &str) -> Option<i32> {
    let entries = fs::read_dir(proc_root).ok()?;
    for entry in entries.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<i32>() else {
            continue;
        };
        let comm_path = entry.path().join("comm");
        let Ok(comm) = fs::read_to_string(&comm_path) else {
            continue;
        };
        if comm.trim_end() == process_name {
            return Some(pid);
        }
    }
    None
}

/// Read the blocked/ignored/caught signal masks for a pid from its
/// process-table status entry.
pub fn read_signal_masks(proc_root: &Path, pid: i32) -> Result<SignalMasks> {
    let status_path = proc_root.join(pid.to_string()).join("status");
    let contents = fs::read_to_string(&status_path)
        .with_context(|| format!("Failed to read {}", status_path.display()))?;
    parse_status_masks(&contents)
        .with_context(|| format!("No signal mask fields in {}", status_path.display()))
}

/// Extract the three hexadecimal signal-mask fields from a status entry.
fn parse_status_masks(contents: &str) -> Option<SignalMasks> {
    let mut blocked = None;
    let mut ignored = None;
    let mut caught = None;

    for line in contents.lines() {
        if let Some(value) = line.strip_prefix("SigBlk:") {
            blocked = u64::from_str_radix(value.trim(), 16).ok();
        } else if let Some(value) = line.strip_prefix("SigIgn:") {
            ignored = u64::from_str_radix(value.trim(), 16).ok();
        } else if let Some(value) = line.strip_prefix("SigCgt:") {
            caught = u64::from_str_radix(value.trim(), 16).ok();
        }
    }

    Some(SignalMasks {
        blocked: blocked?,
        ignored: ignored?,
        caught: caught?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const STATUS_SNMPD: &str = "\
Name:\tsnmpd
State:\tS (sleeping)
Pid:\t2841
SigQ:\t0/31367
SigPnd:\t0000000000000000
SigBlk:\t0000000000000000
SigIgn:\t0000000000001000
SigCgt:\t0000000180004a03
";

    #[test]
    fn parses_masks_from_status() {
        let masks = parse_status_masks(STATUS_SNMPD).expect("masks present");
        assert_eq!(masks.blocked, 0);
        assert_eq!(masks.ignored, 0x1000);
        assert_eq!(masks.caught, 0x0000000180004a03);
    }

    #[test]
    fn missing_mask_field_is_rejected() {
        let truncated = "Name:\tsnmpd\nSigBlk:\t0000000000000000\n";
        assert!(parse_status_masks(truncated).is_none());
    }

    #[test]
    fn sighup_readiness_follows_caught_mask() {
        // SIGHUP = 1, bit 0. The fixture's caught mask has bit 0 set.
        let masks = parse_status_masks(STATUS_SNMPD).unwrap();
        assert!(masks.is_ready(1));

        let fresh = SignalMasks::default();
        assert!(!fresh.is_ready(1));
    }

    proptest! {
        /// Readiness holds exactly when some mask contains the signal bit,
        /// whichever of the three masks it appears in.
        #[test]
        fn prop_readiness_matches_mask_union(
            blocked in any::<u64>(),
            ignored in any::<u64>(),
            caught in any::<u64>(),
            signal in 1_i32..=64,
        ) {
            let masks = SignalMasks { blocked, ignored, caught };
            let bit = 1u64 << (signal - 1);
            let expected = (blocked | ignored | caught) & bit != 0;
            prop_assert_eq!(masks.is_ready(signal), expected);
        }
    }
}
