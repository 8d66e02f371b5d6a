//! Change detection between two trusted snapshots.
//!
//! Identifier sets drive everything:
//!
//! - `current − previous`: new identifiers. Only approved arrivals are
//!   emitted as new records; the rest are counted.
//! - `current ∩ previous`: continuing identifiers. A differing normalized
//!   status yields a [`ChangeEvent`], flagged relevant when the
//!   `(previous, current)` pair is on the configured allow-list.
//! - `previous − current`: removed identifiers, logged only.
//!
//! Both inputs are [`Snapshot`]s, which are already deduplicated (last
//! occurrence wins) and iterate in identifier order, so the output does not
//! depend on retrieval order.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::MonitorConfig;
use crate::models::{ChangeEvent, ChangeResult, Snapshot};

pub fn detect_changes(
    previous: &Snapshot,
    current: &Snapshot,
    config: &MonitorConfig,
    at: DateTime<Utc>,
) -> ChangeResult {
    let mut result = ChangeResult::default();

    for record in current.records() {
        match previous.get(&record.id) {
            None => {
                if record.status.is_approved() {
                    result.new_records.push(record.clone());
                } else {
                    result.new_other_count += 1;
                }
            }
            Some(prev) if prev.status != record.status => {
                let relevant = config.is_relevant_transition(prev.status, record.status);
                let event = ChangeEvent {
                    id: record.id.clone(),
                    name: record.name.clone(),
                    previous_raw: prev.status_raw.clone(),
                    current_raw: record.status_raw.clone(),
                    previous: prev.status,
                    current: record.status,
                    region: record.region.clone(),
                    detail_ref: record.detail_ref.clone(),
                    relevant,
                    at,
                };
                if relevant {
                    debug!(
                        id = %event.id,
                        from = %event.previous,
                        to = %event.current,
                        "relevant transition"
                    );
                    result.relevant_changes.push(event.clone());
                }
                result.all_changes.push(event);
            }
            Some(_) => {}
        }
    }

    result.removed_count = previous
        .records()
        .filter(|r| !current.contains(&r.id))
        .count();

    info!(
        new_approved = result.new_records.len(),
        new_other = result.new_other_count,
        status_changes = result.all_changes.len(),
        relevant = result.relevant_changes.len(),
        removed = result.removed_count,
        "change detection complete"
    );

    result
}
