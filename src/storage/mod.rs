pub mod codec;

use crate::models::{Completeness, ItemState};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use self::codec::StateCodec;

// ── Store trait ───────────────────────────────────────────────────────────────

/// Per-item persisted state. `load` never fails: a missing or unreadable entry
/// is an empty state, so one bad file cannot stop a run.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn load(&self, item_id: &str) -> ItemState;
    async fn save(&self, item_id: &str, state: &ItemState) -> Result<()>;

    /// Push buffered saves to disk. Called once at the end of every pass.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Resume cursor: the newest stored date key.
pub fn latest_date(state: &ItemState) -> Option<&str> {
    state.dated.keys().next_back().map(String::as_str)
}

pub fn is_complete(state: &ItemState, target_key: &str, rule: &Completeness) -> bool {
    match rule {
        Completeness::LatestDate { require_payload } => {
            latest_date(state) == Some(target_key)
                && (!require_payload || state.dated.get(target_key).is_some_and(|p| !p.is_empty()))
        }
        Completeness::FieldPresent { field } => {
            state.dated.values().any(|payload| payload.contains_key(*field))
        }
    }
}

/// Write to `<file>.tmp` then rename over the target.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Could not create dir {:?}", parent))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("Failed to write {:?}", tmp))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move {:?} into place", tmp))?;
    Ok(())
}

/// Reads a JSON file. `Ok(None)` when absent.
async fn read_json(path: &Path) -> Result<Option<Value>> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(t) => t,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {:?}", path)),
    };
    let value = serde_json::from_str(&text).with_context(|| format!("Corrupt JSON in {:?}", path))?;
    Ok(Some(value))
}

// ── Daily snapshot: one file per (category, date) ─────────────────────────────

/// Encodes `items` with `codec` and writes the whole document atomically.
pub async fn write_snapshot(path: &Path, codec: &StateCodec, items: &BTreeMap<String, ItemState>) -> Result<()> {
    let doc: Map<String, Value> = items
        .iter()
        .map(|(id, s)| (id.clone(), codec.encode(s)))
        .collect();
    let bytes = serde_json::to_vec_pretty(&Value::Object(doc))?;
    write_atomic(path, &bytes).await
}

/// `{ "<item id>": <item object>, ... }` kept in memory. The file is rewritten
/// every `flush_every` saves and on `flush`; opening never touches the disk.
pub struct SnapshotStore {
    path: PathBuf,
    codec: StateCodec,
    flush_every: usize,
    inner: Mutex<SnapshotState>,
}

#[derive(Default)]
struct SnapshotState {
    items: BTreeMap<String, ItemState>,
    /// Saves not yet written
    dirty: usize,
    /// The file on disk could not be read and must be set aside before the
    /// first write
    unreadable: bool,
}

impl SnapshotStore {
    pub async fn open(path: impl Into<PathBuf>, codec: StateCodec) -> Self {
        let path = path.into();
        let mut state = SnapshotState::default();

        match read_json(&path).await {
            Ok(None) => debug!("No existing snapshot at {:?}", path),
            Ok(Some(Value::Object(doc))) => {
                for (id, entry) in &doc {
                    match codec.decode(entry) {
                        Ok(item) => {
                            state.items.insert(id.clone(), item);
                        }
                        Err(e) => warn!("{}: skipping unreadable entry in {:?}: {:#}", id, path, e),
                    }
                }
                info!("Loaded {} items from {:?}", state.items.len(), path);
            }
            Ok(Some(_)) => {
                warn!("{:?} is not a JSON object, starting empty", path);
                state.unreadable = true;
            }
            Err(e) => {
                warn!("{:#}; starting empty", e);
                state.unreadable = true;
            }
        }

        Self {
            path,
            codec,
            flush_every: 1,
            inner: Mutex::new(state),
        }
    }

    /// Batch writes: 1 (the default) writes through on every save.
    pub fn with_flush_every(mut self, n: usize) -> Self {
        self.flush_every = n.max(1);
        self
    }

    /// Caller holds the lock, so writes land in order.
    async fn write_locked(&self, state: &mut SnapshotState) -> Result<()> {
        if state.unreadable {
            set_aside(&self.path).await;
            state.unreadable = false;
        }
        write_snapshot(&self.path, &self.codec, &state.items).await?;
        debug!("Wrote {} items to {:?}", state.items.len(), self.path);
        state.dirty = 0;
        Ok(())
    }
}

/// Keep an unreadable file as `<file>.corrupt` instead of overwriting it.
async fn set_aside(path: &Path) {
    let mut backup = path.as_os_str().to_owned();
    backup.push(".corrupt");
    if let Err(e) = tokio::fs::rename(path, PathBuf::from(&backup)).await {
        warn!("Could not back up {:?}: {}", path, e);
    }
}

#[async_trait]
impl ItemStore for SnapshotStore {
    async fn load(&self, item_id: &str) -> ItemState {
        self.inner.lock().await.items.get(item_id).cloned().unwrap_or_default()
    }

    async fn save(&self, item_id: &str, state: &ItemState) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.items.insert(item_id.to_string(), state.clone());
        inner.dirty += 1;

        if inner.dirty >= self.flush_every {
            self.write_locked(&mut inner)
                .await
                .with_context(|| format!("save {}", item_id))?;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.dirty == 0 {
            return Ok(());
        }
        self.write_locked(&mut inner)
            .await
            .with_context(|| format!("flush {:?}", self.path))
    }
}

// ── History: one file per item ────────────────────────────────────────────────

pub struct ItemFileStore {
    dir: PathBuf,
    codec: StateCodec,
}

impl ItemFileStore {
    pub fn new(dir: impl Into<PathBuf>, codec: StateCodec) -> Self {
        Self { dir: dir.into(), codec }
    }

    fn path_for(&self, item_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", item_id))
    }
}

#[async_trait]
impl ItemStore for ItemFileStore {
    async fn load(&self, item_id: &str) -> ItemState {
        let path = self.path_for(item_id);
        match read_json(&path).await {
            Ok(Some(value)) => self.codec.decode(&value).unwrap_or_else(|e| {
                warn!("{}: {:#}, treating as empty", item_id, e);
                ItemState::default()
            }),
            Ok(None) => ItemState::default(),
            Err(e) => {
                warn!("{}: {:#}, treating as empty", item_id, e);
                ItemState::default()
            }
        }
    }

    async fn save(&self, item_id: &str, state: &ItemState) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.codec.encode(state))?;
        write_atomic(&self.path_for(item_id), &bytes)
            .await
            .with_context(|| format!("save {}", item_id))
    }
}
