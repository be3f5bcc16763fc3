//! Durable index of files shared or downloaded on this node.
//!
//! The index is a JSON document rewritten in full on every mutation through a
//! temp file and an atomic rename, so a crash leaves either the old or the new
//! version on disk. Entries keep insertion order, oldest first.

use crate::error::{NodeError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use torrentium_files::{Cid, Manifest};

const INDEX_VERSION: u32 = 1;

/// One file known to this node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Content identifier
    pub cid: Cid,
    /// Display name
    pub filename: String,
    /// Where the file lives on this machine
    pub file_path: PathBuf,
    /// Size in bytes
    pub file_size: u64,
    /// Lowercase hex BLAKE3 of the whole file
    pub file_hash: String,
    /// First time this CID was recorded
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    /// Record for `manifest`'s content located at `file_path`, stamped now
    #[must_use]
    pub fn from_manifest(manifest: &Manifest, filename: impl Into<String>, file_path: PathBuf) -> Self {
        Self {
            cid: manifest.cid(),
            filename: filename.into(),
            file_path,
            file_size: manifest.file_size,
            file_hash: manifest.file_hash_hex(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexDocument {
    version: u32,
    files: Vec<FileRecord>,
}

/// Local file index
#[derive(Debug)]
pub struct LocalIndex {
    path: PathBuf,
    records: RwLock<Vec<FileRecord>>,
}

impl LocalIndex {
    /// Load the index at `path`, starting empty if the file does not exist
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Corrupt`] if the file exists but does not parse,
    /// or [`NodeError::Io`] if it cannot be read.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let records = match fs::read(&path).await {
            Ok(bytes) => {
                let document: IndexDocument = serde_json::from_slice(&bytes).map_err(|e| {
                    NodeError::Corrupt(format!("{}: {e}", path.display()).into())
                })?;
                if document.version != INDEX_VERSION {
                    return Err(NodeError::Corrupt(
                        format!("unsupported index version {}", document.version).into(),
                    ));
                }
                document.files
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %path.display(), entries = records.len(), "opened local index");
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    /// Index file location
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or refresh a record
    ///
    /// An existing CID keeps its `created_at` and position; `filename` and
    /// `file_path` are updated. Returns the stored record.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Integrity`] if the CID is already recorded with a
    /// different file hash, or [`NodeError::Io`] if persisting fails (the
    /// in-memory index is left unchanged).
    pub async fn record(&self, record: FileRecord) -> Result<FileRecord> {
        let mut records = self.records.write().await;
        let mut next = records.clone();

        let stored = match next.iter_mut().find(|r| r.cid == record.cid) {
            Some(existing) => {
                if !existing.file_hash.eq_ignore_ascii_case(&record.file_hash) {
                    return Err(NodeError::Integrity(
                        format!(
                            "{} already recorded with hash {}, got {}",
                            record.cid.short(),
                            existing.file_hash,
                            record.file_hash
                        )
                        .into(),
                    ));
                }
                existing.filename = record.filename;
                existing.file_path = record.file_path;
                existing.clone()
            }
            None => {
                next.push(record.clone());
                record
            }
        };

        self.persist(&next).await?;
        *records = next;
        Ok(stored)
    }

    /// All records, oldest first
    pub async fn list(&self) -> Vec<FileRecord> {
        self.records.read().await.clone()
    }

    /// Look up one record
    pub async fn get(&self, cid: &Cid) -> Option<FileRecord> {
        self.records.read().await.iter().find(|r| r.cid == *cid).cloned()
    }

    /// Whether a CID is recorded
    pub async fn contains(&self, cid: &Cid) -> bool {
        self.records.read().await.iter().any(|r| r.cid == *cid)
    }

    /// Number of records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the index is empty
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Delete a record, returning it if present
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Io`] if persisting fails.
    pub async fn remove(&self, cid: &Cid) -> Result<Option<FileRecord>> {
        let mut records = self.records.write().await;
        let Some(position) = records.iter().position(|r| r.cid == *cid) else {
            return Ok(None);
        };

        let mut next = records.clone();
        let removed = next.remove(position);
        self.persist(&next).await?;
        *records = next;
        Ok(Some(removed))
    }

    async fn persist(&self, records: &[FileRecord]) -> Result<()> {
        let document = IndexDocument {
            version: INDEX_VERSION,
            files: records.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&document)
            .map_err(|e| NodeError::Io(format!("failed to encode index: {e}").into()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let mut suffix = [0u8; 6];
        let _ = getrandom::getrandom(&mut suffix);
        let tmp = self
            .path
            .with_extension(format!("json.tmp-{}", hex::encode(suffix)));

        let result = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(&json).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp, &self.path).await
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp).await;
            tracing::warn!(path = %self.path.display(), error = %e, "failed to persist local index");
            return Err(e.into());
        }
        Ok(())
    }
}
