//! Position sinks - where resolved cursor positions go
//!
//! `CursorFile` 将每个 destination 的最新 position 持久化为 JSON。
//! 落盘由独立的 writer task 完成：`store` 只更新内存并投递快照，
//! writer 合并积压的快照后只写最新一份（临时文件 + rename）。

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use contracts::{ContractError, PositionSink, PositionToken};
use observability::record_cursor_advanced;

type Positions = BTreeMap<String, PositionToken>;

/// Reports positions to the log only
pub struct LogPositionSink {
    destination: String,
}

impl LogPositionSink {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
        }
    }
}

impl PositionSink for LogPositionSink {
    fn on_batch_resolved(&self, position: &PositionToken) {
        record_cursor_advanced(&self.destination);
        debug!(destination = %self.destination, position = %position, "Cursor advanced");
    }
}

enum CursorWrite {
    Store(Positions),
    Sync(oneshot::Sender<Result<(), String>>),
}

/// JSON file holding the last resolved position of every destination
pub struct CursorFile {
    path: PathBuf,
    positions: Mutex<Positions>,
    writes: mpsc::UnboundedSender<CursorWrite>,
}

impl CursorFile {
    /// Open the cursor file, loading positions saved by an earlier run, and
    /// start its writer task
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, ContractError> {
        let path = path.into();
        let positions: Positions = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                ContractError::config_parse(format!(
                    "cursor file {} is not valid JSON: {e}",
                    path.display()
                ))
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        let (writes, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(path.clone(), rx));

        info!(path = %path.display(), destinations = positions.len(), "Cursor file opened");
        Ok(Self {
            path,
            positions: Mutex::new(positions),
            writes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last stored position for `destination`
    pub fn position(&self, destination: &str) -> Option<PositionToken> {
        self.lock().get(destination).cloned()
    }

    /// Record a position and queue a rewrite of the file
    pub fn store(&self, destination: &str, position: &PositionToken) {
        let mut positions = self.lock();
        positions.insert(destination.to_string(), position.clone());

        // Sent under the lock so snapshots reach the writer in store order.
        if self.writes.send(CursorWrite::Store(positions.clone())).is_err() {
            warn!(path = %self.path.display(), "Cursor writer stopped, position kept in memory only");
        }
    }

    /// Wait until every stored position is on disk
    pub async fn sync(&self) -> Result<(), ContractError> {
        let (tx, rx) = oneshot::channel();
        self.writes
            .send(CursorWrite::Sync(tx))
            .map_err(|_| ContractError::Other("cursor writer stopped".into()))?;
        rx.await
            .map_err(|_| ContractError::Other("cursor writer stopped".into()))?
            .map_err(ContractError::Other)
    }

    /// Position sink bound to one destination
    pub fn for_destination(self: &Arc<Self>, destination: impl Into<String>) -> Arc<dyn PositionSink> {
        Arc::new(FilePositionSink {
            destination: destination.into(),
            file: Arc::clone(self),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Positions> {
        self.positions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Drains queued snapshots, writing only the newest of each backlog
async fn write_loop(path: PathBuf, mut rx: mpsc::UnboundedReceiver<CursorWrite>) {
    let mut last_result: Result<(), String> = Ok(());

    while let Some(first) = rx.recv().await {
        let mut latest = None;
        let mut waiters = Vec::new();
        let mut next = Some(first);
        while let Some(write) = next {
            match write {
                CursorWrite::Store(snapshot) => latest = Some(snapshot),
                CursorWrite::Sync(tx) => waiters.push(tx),
            }
            next = rx.try_recv().ok();
        }

        if let Some(snapshot) = latest {
            last_result = write_atomic(&path, &snapshot).await.map_err(|e| {
                warn!(path = %path.display(), error = %e, "Failed to persist cursor");
                e.to_string()
            });
        }
        for tx in waiters {
            let _ = tx.send(last_result.clone());
        }
    }

    debug!(path = %path.display(), "Cursor writer finished");
}

async fn write_atomic(path: &Path, positions: &Positions) -> Result<(), ContractError> {
    let json = serde_json::to_string_pretty(positions)
        .map_err(|e| ContractError::Other(e.to_string()))?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

struct FilePositionSink {
    destination: String,
    file: Arc<CursorFile>,
}

impl PositionSink for FilePositionSink {
    fn on_batch_resolved(&self, position: &PositionToken) {
        record_cursor_advanced(&self.destination);
        self.file.store(&self.destination, position);
    }
}

/// Where every destination reports its cursor
#[derive(Clone, Default)]
pub enum CursorTarget {
    #[default]
    Log,
    File(Arc<CursorFile>),
}

impl CursorTarget {
    pub fn sink_for(&self, destination: &str) -> Arc<dyn PositionSink> {
        match self {
            Self::Log => Arc::new(LogPositionSink::new(destination)),
            Self::File(file) => file.for_destination(destination),
        }
    }
}
