use std::cmp::Ordering;
use std::collections::HashMap;

use crate::ids::RecordId;
use crate::record::EntityRecord;

/// Merge the server-rendered snapshot with the locally cached records.
///
/// At most one record per id survives: the one with the greater
/// [`EntityRecord::recency`]. On a tie the local copy wins, since it is at
/// least as fresh as whatever the page was rendered with. Output is ordered
/// newest first, then by id, so repeated merges are stable.
pub fn merge_records(snapshot: &[EntityRecord], local: &[EntityRecord]) -> Vec<EntityRecord> {
    let mut by_id: HashMap<&RecordId, &EntityRecord> = HashMap::new();

    for rec in snapshot.iter().chain(local.iter()) {
        match by_id.get(&rec.id) {
            Some(existing) if existing.recency() > rec.recency() => {}
            _ => {
                by_id.insert(&rec.id, rec);
            }
        }
    }

    let mut merged: Vec<EntityRecord> = by_id.into_values().cloned().collect();
    merged.sort_by(newest_first);
    merged
}

/// Ordering used for merged output: descending recency, ascending id.
pub fn newest_first(a: &EntityRecord, b: &EntityRecord) -> Ordering {
    b.recency()
        .cmp(&a.recency())
        .then_with(|| a.id.cmp(&b.id))
}

/// Pick the winner between two copies of the same record (last write wins).
pub fn latest<'a>(a: &'a EntityRecord, b: &'a EntityRecord) -> &'a EntityRecord {
    if b.recency() >= a.recency() { b } else { a }
}
