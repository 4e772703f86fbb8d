//! Failure lists: what the last pass could not fetch, and the input of `retry`.

use crate::calendar::compact;
use crate::models::FailureRecord;
use crate::storage::write_atomic;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// `<data_dir>/fubon_<YYYYMMDD>_<slug>_failedList.json`
pub fn failure_list_path(data_dir: &Path, slug: &str, date: NaiveDate) -> PathBuf {
    data_dir.join(format!("fubon_{}_{}_failedList.json", compact(date), slug))
}

/// Non-empty list → atomic write. Empty list → remove any previous file, so a
/// clean pass leaves nothing for `retry` to pick up.
pub async fn persist_failures(failures: &[FailureRecord], path: &Path) -> Result<()> {
    if failures.is_empty() {
        match tokio::fs::remove_file(path).await {
            Ok(()) => info!("All clear, removed {:?}", path),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("Failed to remove {:?}", path)),
        }
        return Ok(());
    }

    let bytes = serde_json::to_vec_pretty(failures)?;
    write_atomic(path, &bytes).await?;
    warn!("{} failures written to {:?}", failures.len(), path);
    Ok(())
}

/// `Ok(None)` when there is no list on disk.
pub async fn load_failures(path: &Path) -> Result<Option<Vec<FailureRecord>>> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(t) => t,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {:?}", path)),
    };
    let list = serde_json::from_str(&text).with_context(|| format!("Corrupt failure list {:?}", path))?;
    Ok(Some(list))
}

/// Failed ids in first-seen order, each once.
pub fn unique_ids(failures: &[FailureRecord]) -> Vec<String> {
    let mut seen = HashSet::new();
    failures
        .iter()
        .filter(|f| seen.insert(f.item_id.as_str()))
        .map(|f| f.item_id.clone())
        .collect()
}
