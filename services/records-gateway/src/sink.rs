//! Persistence sinks shipped with the binary
//!
//! `JsonlSink` appends one JSON document per line to a file; `LogSink` only
//! logs what would have been written, for running without durable storage.

use std::path::{Path, PathBuf};

use gateway::{IdentityResolver, PersistError, PersistSink, SaveFuture};
use serde_json::Value;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<File>,
    resolver: IdentityResolver,
}

impl JsonlSink {
    /// Open `path` for appending, creating it and its parent directory.
    pub async fn open(path: &Path, resolver: IdentityResolver) -> Result<Self> {
        let open_err = |source| Error::SinkOpen {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(open_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(open_err)?;
        info!(path = %path.display(), "persisting records to file");
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            resolver,
        })
    }
}

impl PersistSink for JsonlSink {
    fn save_batch<'a>(&'a self, records: &'a [Value]) -> SaveFuture<'a> {
        Box::pin(async move {
            let mut buf = Vec::with_capacity(records.len() * 128);
            for record in records {
                serde_json::to_writer(&mut buf, record)
                    .map_err(|e| PersistError::Rejected(e.to_string()))?;
                buf.push(b'\n');
            }

            let mut file = self.file.lock().await;
            file.write_all(&buf)
                .await
                .map_err(|e| PersistError::Write(format!("{}: {e}", self.path.display())))?;
            file.flush()
                .await
                .map_err(|e| PersistError::Write(format!("{}: {e}", self.path.display())))?;
            debug!(records = records.len(), path = %self.path.display(), "batch appended");

            Ok(records.iter().map(|r| self.resolver.identity(r)).collect())
        })
    }
}

pub struct LogSink {
    resolver: IdentityResolver,
}

impl LogSink {
    pub fn new(resolver: IdentityResolver) -> Self {
        Self { resolver }
    }
}

impl PersistSink for LogSink {
    fn save_batch<'a>(&'a self, records: &'a [Value]) -> SaveFuture<'a> {
        Box::pin(async move {
            let ids: Vec<String> = records.iter().map(|r| self.resolver.identity(r)).collect();
            info!(
                records = ids.len(),
                first = ids.first().map(String::as_str),
                "batch persisted (log only)"
            );
            Ok(ids)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn jsonl_sink_appends_one_record_per_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/out.jsonl");
        let sink = JsonlSink::open(&path, IdentityResolver::default()).await.unwrap();

        let ids = sink
            .save_batch(&[json!({"id": 1}), json!({"id": 2, "name": "x"})])
            .await
            .unwrap();
        assert_eq!(ids, vec!["id:n:1", "id:n:2"]);
        sink.save_batch(&[json!({"id": 3})]).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], json!({"id": 2, "name": "x"}));
    }

    #[tokio::test]
    async fn jsonl_sink_reopen_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.jsonl");
        {
            let sink = JsonlSink::open(&path, IdentityResolver::default()).await.unwrap();
            sink.save_batch(&[json!({"id": 1})]).await.unwrap();
        }
        let sink = JsonlSink::open(&path, IdentityResolver::default()).await.unwrap();
        sink.save_batch(&[json!({"id": 2})]).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test]
    async fn jsonl_sink_open_failure_names_path() {
        let dir = TempDir::new().unwrap();
        // A directory cannot be opened as the output file
        let err = JsonlSink::open(dir.path(), IdentityResolver::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::SinkOpen { .. }));
        assert!(err.to_string().contains(&dir.path().display().to_string()));
    }

    #[tokio::test]
    async fn log_sink_returns_identities() {
        let sink = LogSink::new(IdentityResolver::new(["docket"]));
        let ids = sink
            .save_batch(&[json!({"docket": "23-cv-1"}), json!({"docket": "23-cv-2"})])
            .await
            .unwrap();
        assert_eq!(ids, vec!["docket:s:23-cv-1", "docket:s:23-cv-2"]);
    }
}
