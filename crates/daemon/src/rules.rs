use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::store::{AclRule, RuleSnapshot};

/// The only rule action that contributes to the allow list.
pub const ACCEPT_ACTION: &str = "ACCEPT";

/// Reduce a full store snapshot to the ordered source-address allow list
/// for one service.
///
/// Tables qualify when their kind matches `acl_table_kind` and their
/// service set contains `service_name`; qualifying tables are visited in
/// snapshot order. Within a table, rules are evaluated in descending
/// priority order. A malformed rule is skipped, never fatal.
pub fn compute_allow_list(
    snapshot: &RuleSnapshot,
    service_name: &str,
    acl_table_kind: &str,
) -> Vec<String> {
    let mut allow_list = Vec::new();

    for table in &snapshot.tables {
        if table.kind != acl_table_kind {
            continue;
        }
        if !table.services.iter().any(|s| s == service_name) {
            continue;
        }

        debug!("collecting rules for control-plane table {}", table.name);

        // Working set keyed by integer priority. If two rules in the same
        // table share a priority, the later row read replaces the earlier.
        let mut by_priority: BTreeMap<i64, &AclRule> = BTreeMap::new();
        for rule in snapshot.rules.iter().filter(|r| r.table == table.name) {
            match rule.priority.trim().parse::<i64>() {
                Ok(priority) => {
                    by_priority.insert(priority, rule);
                }
                Err(_) => {
                    warn!(
                        "Rule {}|{} has unparseable priority {:?}, skipping",
                        table.name, rule.name, rule.priority
                    );
                }
            }
        }

        for rule in by_priority.values().rev() {
            let Some(action) = rule.action.as_deref() else {
                warn!("Rule {}|{} has no action, skipping", table.name, rule.name);
                continue;
            };
            if action != ACCEPT_ACTION {
                continue;
            }
            match rule.src_ip.as_deref() {
                Some(src_ip) if !src_ip.is_empty() => {
                    allow_list.push(src_ip.to_string());
                }
                _ => {}
            }
        }
    }

    allow_list
}
