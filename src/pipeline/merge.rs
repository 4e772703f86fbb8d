//! Right-biased union of dated records.
//!
//! Ordering on disk is the codec's job (`SortOrder` per category); in memory
//! the `BTreeMap` keeps keys ascending.

use crate::models::DatedRecord;

/// Every date in `new` overwrites the same date in `existing`; other dates
/// are kept. Merging the same `new` twice changes nothing.
pub fn merge(existing: &DatedRecord, new: &DatedRecord) -> DatedRecord {
    let mut out = existing.clone();
    merge_into(&mut out, new.clone());
    out
}

pub fn merge_into(existing: &mut DatedRecord, new: DatedRecord) {
    existing.extend(new);
}
