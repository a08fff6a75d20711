//! FilePutter - appends records to a newline-delimited file per stream

use bytes::Bytes;
use contracts::{ContractError, PutOutcome, RecordPutter};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// Configuration for FilePutter
#[derive(Debug, Clone)]
pub struct FilePutterConfig {
    /// Output directory
    pub base_path: PathBuf,
}

impl FilePutterConfig {
    /// Create config from params map
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let base_path = params
            .get("path")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./output"));

        Self { base_path }
    }
}

/// Putter that appends each record as one line of `<base_path>/<stream>.ndjson`
///
/// A call either writes every record or fails as a whole.
pub struct FilePutter {
    stream: String,
    path: PathBuf,
    /// Serializes appends so lines never interleave
    write_lock: Mutex<()>,
}

impl FilePutter {
    /// Create a new FilePutter, creating the output directory if needed
    pub async fn new(stream: impl Into<String>, config: FilePutterConfig) -> std::io::Result<Self> {
        let stream = stream.into();
        fs::create_dir_all(&config.base_path).await?;
        let path = config.base_path.join(format!("{}.ndjson", stream));

        Ok(Self {
            stream,
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Create from params map (for factory)
    pub async fn from_params(
        stream: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, ContractError> {
        let stream = stream.into();
        let config = FilePutterConfig::from_params(params);
        Self::new(stream.clone(), config)
            .await
            .map_err(|e| ContractError::sink_connection(&stream, e.to_string()))
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    async fn append(&self, records: &[Bytes]) -> Result<(), ContractError> {
        let mut buf = Vec::with_capacity(records.iter().map(|r| r.len() + 1).sum());
        for record in records {
            buf.extend_from_slice(record);
            if !record.ends_with(b"\n") {
                buf.push(b'\n');
            }
        }

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| ContractError::sink_write(&self.stream, e.to_string()))?;
        file.write_all(&buf)
            .await
            .map_err(|e| ContractError::sink_write(&self.stream, e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| ContractError::sink_write(&self.stream, e.to_string()))?;

        debug!(stream = %self.stream, records = records.len(), bytes = buf.len(), "Appended");
        Ok(())
    }
}

impl RecordPutter for FilePutter {
    fn stream(&self) -> &str {
        &self.stream
    }

    async fn put_one(&self, record: Bytes) -> Result<(), ContractError> {
        self.append(std::slice::from_ref(&record)).await
    }

    #[instrument(
        name = "file_putter_put_many",
        skip(self, records),
        fields(stream = %self.stream, records = records.len())
    )]
    async fn put_many(&self, records: &[Bytes]) -> Result<PutOutcome, ContractError> {
        self.append(records).await?;
        Ok(PutOutcome::success())
    }
}
