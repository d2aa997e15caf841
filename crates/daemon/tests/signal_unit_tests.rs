use snmpsyncd_daemon::signal::{
    find_pid_by_name, read_signal_masks, ProcessSignaler, SignalOutcome,
};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

/// SIGWINCH: ignored by default, safe to deliver to the test process.
const HARMLESS_SIGNAL: i32 = 28;

fn write_proc_entry(root: &Path, pid: u32, name: &str, blocked: u64, ignored: u64, caught: u64) {
    let dir = root.join(pid.to_string());
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("comm"), format!("{}\n", name)).unwrap();
    fs::write(
        dir.join("status"),
        format!(
            "Name:\t{}\nState:\tS (sleeping)\nPid:\t{}\nSigPnd:\t0000000000000000\nSigBlk:\t{:016x}\nSigIgn:\t{:016x}\nSigCgt:\t{:016x}\n",
            name, pid, blocked, ignored, caught
        ),
    )
    .unwrap();
}

#[test]
fn test_find_pid_by_name_resolves_single_match() {
    let proc_root = TempDir::new().unwrap();
    write_proc_entry(proc_root.path(), 100, "other", 0, 0, 0);
    write_proc_entry(proc_root.path(), 2841, "snmpd", 0, 0, 0);
    // Non-numeric entries like /proc/self must be ignored
    fs::create_dir_all(proc_root.path().join("self")).unwrap();

    assert_eq!(find_pid_by_name(proc_root.path(), "snmpd"), Some(2841));
}

#[test]
fn test_find_pid_by_name_absent_process() {
    let proc_root = TempDir::new().unwrap();
    write_proc_entry(proc_root.path(), 100, "other", 0, 0, 0);

    assert_eq!(find_pid_by_name(proc_root.path(), "snmpd"), None);
}

#[test]
fn test_read_signal_masks_round_trip() {
    let proc_root = TempDir::new().unwrap();
    write_proc_entry(proc_root.path(), 42, "snmpd", 0x1, 0x1000, 0x0000000180004a03);

    let masks = read_signal_masks(proc_root.path(), 42).unwrap();
    assert_eq!(masks.blocked, 0x1);
    assert_eq!(masks.ignored, 0x1000);
    assert_eq!(masks.caught, 0x0000000180004a03);
}

#[test]
fn test_read_signal_masks_missing_pid() {
    let proc_root = TempDir::new().unwrap();
    assert!(read_signal_masks(proc_root.path(), 42).is_err());
}

#[tokio::test]
async fn test_no_matching_process_is_a_quiet_noop() {
    let proc_root = TempDir::new().unwrap();
    let signaler = ProcessSignaler::with_proc_root(
        proc_root.path().to_path_buf(),
        Duration::from_millis(10),
        Some(Duration::from_millis(100)),
    );

    let outcome = signaler.signal_when_ready("snmpd", 1).await;
    assert_eq!(outcome, SignalOutcome::NoSuchProcess);
}

#[tokio::test]
async fn test_gives_up_when_never_ready() {
    let proc_root = TempDir::new().unwrap();
    // All-zero masks: no disposition for any signal, never ready.
    write_proc_entry(proc_root.path(), 999_999, "snmpd", 0, 0, 0);

    let signaler = ProcessSignaler::with_proc_root(
        proc_root.path().to_path_buf(),
        Duration::from_millis(10),
        Some(Duration::from_millis(60)),
    );

    let outcome = signaler.signal_when_ready("snmpd", 1).await;
    assert_eq!(outcome, SignalOutcome::GaveUp);
}

#[tokio::test]
async fn test_vanished_process_treated_as_absent() {
    let proc_root = TempDir::new().unwrap();
    let pid = 4242;
    write_proc_entry(proc_root.path(), pid, "snmpd", 0, 0, 0);
    // comm resolves, but the status file is gone by the first poll
    fs::remove_file(proc_root.path().join(pid.to_string()).join("status")).unwrap();

    let signaler = ProcessSignaler::with_proc_root(
        proc_root.path().to_path_buf(),
        Duration::from_millis(10),
        None,
    );

    let outcome = signaler.signal_when_ready("snmpd", 1).await;
    assert_eq!(outcome, SignalOutcome::NoSuchProcess);
}

#[tokio::test]
async fn test_delivers_once_process_is_ready() {
    let proc_root = TempDir::new().unwrap();
    // Masquerade the test process itself in the fixture tree so the
    // delivered signal has a real destination.
    let own_pid = std::process::id();
    let caught = 1u64 << (HARMLESS_SIGNAL - 1);
    write_proc_entry(proc_root.path(), own_pid, "test-self", 0, 0, caught);

    let signaler = ProcessSignaler::with_proc_root(
        proc_root.path().to_path_buf(),
        Duration::from_millis(10),
        Some(Duration::from_secs(2)),
    );

    let outcome = signaler.signal_when_ready("test-self", HARMLESS_SIGNAL).await;
    assert_eq!(outcome, SignalOutcome::Delivered);
}

#[tokio::test]
async fn test_delivery_withheld_until_first_ready_poll() {
    let proc_root = TempDir::new().unwrap();
    let own_pid = std::process::id();
    write_proc_entry(proc_root.path(), own_pid, "test-self", 0, 0, 0);

    let status_path = proc_root
        .path()
        .join(own_pid.to_string())
        .join("status");
    let flip = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let caught = 1u64 << (HARMLESS_SIGNAL - 1);
        // Swap the status file in atomically so a concurrent poll never
        // observes a half-written entry.
        let staged = status_path.with_extension("next");
        fs::write(
            &staged,
            format!(
                "Name:\ttest-self\nSigBlk:\t{:016x}\nSigIgn:\t{:016x}\nSigCgt:\t{:016x}\n",
                0, 0, caught
            ),
        )
        .unwrap();
        fs::rename(&staged, &status_path).unwrap();
    });

    let signaler = ProcessSignaler::with_proc_root(
        proc_root.path().to_path_buf(),
        Duration::from_millis(10),
        Some(Duration::from_secs(5)),
    );

    let started = std::time::Instant::now();
    let outcome = signaler.signal_when_ready("test-self", HARMLESS_SIGNAL).await;
    flip.await.unwrap();

    assert_eq!(outcome, SignalOutcome::Delivered);
    // Delivery cannot have happened before the disposition appeared.
    assert!(started.elapsed() >= Duration::from_millis(100));
}
