use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Lines under the merger's control: two-character prefix, the literal
/// token "community", then an identifier.
const DIRECTIVE_PATTERN: &str = r"^(..)community (\S+)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The file was rewritten and atomically swapped into place.
    Updated,
    /// The merged content already matched the file; nothing was written.
    Unchanged,
}

/// Rewrite the directive groups of `path` from `allow_list`, leaving every
/// other line untouched. The new content lands via a sibling temporary
/// file and a rename, so readers never observe a partial rewrite and a
/// failed write leaves the original file intact.
pub fn merge_allow_list(path: &Path, allow_list: &[String]) -> Result<MergeOutcome> {
    let current = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let merged = render_merged(&current, allow_list);
    if merged == current {
        debug!("config file {} already up to date", path.display());
        return Ok(MergeOutcome::Unchanged);
    }

    let temp_path = sibling_temp_path(path);
    let mut file = fs::File::create(&temp_path)
        .with_context(|| format!("Failed to create temp file {}", temp_path.display()))?;
    file.write_all(merged.as_bytes())
        .with_context(|| format!("Failed to write temp file {}", temp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync temp file {}", temp_path.display()))?;
    drop(file);

    // Atomic on the same filesystem; the swap is all-or-nothing.
    fs::rename(&temp_path, path).with_context(|| {
        format!(
            "Failed to rename {} over {}",
            temp_path.display(),
            path.display()
        )
    })?;

    Ok(MergeOutcome::Updated)
}

/// Pure merge of the current file content against an allow list.
///
/// Directive groups repeat once per existing allow entry, so only the
/// first line of a group emits the replacement block; following lines
/// with the same (prefix, identifier) signature are suppressed. The
/// suppression marker is a single slot holding the most recently emitted
/// signature, replaced whenever a different group is seen. Groups whose
/// lines are not contiguous therefore get emitted once per run of lines,
/// duplicating their entries. snmpd.conf keeps directive groups
/// contiguous; the non-contiguous case is pinned by a test.
pub fn render_merged(current: &str, allow_list: &[String]) -> String {
    let directive = Regex::new(DIRECTIVE_PATTERN).expect("directive pattern is valid");

    let mut output = String::with_capacity(current.len());
    let mut handled: Option<String> = None;

    for line in current.lines() {
        let Some(caps) = directive.captures(line) else {
            output.push_str(line);
            output.push('\n');
            continue;
        };

        let signature = format!("{}community {}", &caps[1], &caps[2]);
        if handled.as_deref() == Some(signature.as_str()) {
            continue;
        }

        if allow_list.is_empty() {
            // No restrictions: one bare directive line, open access.
            output.push_str(&signature);
            output.push('\n');
        } else {
            for entry in allow_list {
                output.push_str(&signature);
                output.push(' ');
                output.push_str(entry);
                output.push('\n');
            }
        }

        handled = Some(signature);
    }

    output
}

fn sibling_temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
