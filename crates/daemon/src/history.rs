use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Outcome record for one reconciliation pass, persisted for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassRecord {
    pub id: String,
    /// What caused the pass: "startup" or the name of the changed table.
    pub trigger: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: PassStatus,
    /// Number of allow-list entries computed for the pass.
    pub entries: usize,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassStatus {
    /// The config file was rewritten and the reload requested.
    Applied,
    /// The computed content already matched the file.
    Unchanged,
    /// The pass aborted before the swap; the previous file is intact.
    Failed,
}

pub fn create_record(trigger: &str) -> PassRecord {
    PassRecord {
        id: Uuid::new_v4().to_string(),
        trigger: trigger.to_string(),
        started_at: Utc::now(),
        finished_at: None,
        status: PassStatus::Failed,
        entries: 0,
        detail: None,
    }
}

pub fn finish_record(record: &mut PassRecord, status: PassStatus, entries: usize) {
    record.status = status;
    record.entries = entries;
    record.finished_at = Some(Utc::now());
}

pub fn save_record(record: &PassRecord, state_dir: &Path) -> Result<()> {
    use std::fs;
    use std::io::Write;

    fs::create_dir_all(state_dir)?;

    let json = serde_json::to_string_pretty(record)?;

    // Write atomically using a temporary file
    let record_file = state_dir.join(format!("{}.json", record.id));
    let temp_file = state_dir.join(format!("{}.json.tmp", record.id));

    let mut file = fs::File::create(&temp_file)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_file, &record_file)?;

    Ok(())
}

pub fn load_all_records(state_dir: &Path) -> Result<Vec<PassRecord>> {
    use std::fs;

    if !state_dir.exists() {
        return Ok(vec![]);
    }

    let mut records = Vec::new();

    for entry in fs::read_dir(state_dir)? {
        let entry = entry?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }

        if path.extension().map(|ext| ext != "json").unwrap_or(true) {
            continue;
        }

        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<PassRecord>(&contents) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("Failed to parse pass record {:?}: {}", path, e);
                    continue;
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read pass record {:?}: {}", path, e);
                continue;
            }
        }
    }

    records.sort_by(|a, b| a.started_at.cmp(&b.started_at));
    Ok(records)
}
