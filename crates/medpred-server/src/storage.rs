//! Disk storage for uploaded workbooks.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{pin_mut, Stream, StreamExt};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Distinguishes concurrent partial uploads of the same name.
static PARTIAL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Reasons an upload is not stored.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("only Excel files are allowed (got '{0}')")]
    InvalidType(String),

    #[error("file too large (limit is {limit} bytes)")]
    TooLarge { limit: u64 },

    #[error("no file uploaded")]
    MissingFile,

    #[error("invalid file name '{0}'")]
    InvalidName(String),

    #[error("failed to read upload: {0}")]
    Read(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether the request itself was at fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, StorageError::Io(_))
    }
}

/// A workbook written to the uploads directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Location on disk.
    pub path: PathBuf,

    /// File name as sent by the client (final component only).
    pub original_name: String,

    /// Bytes written.
    pub size: u64,
}

/// Writes uploads into one directory under the original file name.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
    allowed_mime_types: Vec<String>,
    max_bytes: u64,
}

impl UploadStore {
    pub fn new(dir: PathBuf, allowed_mime_types: Vec<String>, max_bytes: u64) -> Self {
        Self {
            dir,
            allowed_mime_types,
            max_bytes,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Create the uploads directory if missing.
    pub async fn ensure_dir(&self) -> Result<(), StorageError> {
        if !self.dir.exists() {
            tokio::fs::create_dir_all(&self.dir).await?;
            info!(dir = %self.dir.display(), "Created uploads directory");
        }
        Ok(())
    }

    /// Reject content types outside the allow-list.
    pub fn check_type(&self, mime: Option<&str>) -> Result<(), StorageError> {
        let mime = mime.unwrap_or_default();
        if self.allowed_mime_types.iter().any(|allowed| allowed == mime) {
            Ok(())
        } else {
            Err(StorageError::InvalidType(mime.to_string()))
        }
    }

    /// Stream `chunks` to disk as `original_name`.
    ///
    /// Data goes to a hidden partial file that replaces the target only once
    /// complete, so a failed upload leaves an existing file untouched.
    pub async fn store<S, B, E>(
        &self,
        original_name: &str,
        mime: Option<&str>,
        chunks: S,
    ) -> Result<StoredFile, StorageError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        self.check_type(mime)?;
        let file_name = sanitize_file_name(original_name)
            .ok_or_else(|| StorageError::InvalidName(original_name.to_string()))?;
        let path = self.dir.join(&file_name);
        let partial = self.dir.join(format!(
            ".{}.{}.part",
            file_name,
            PARTIAL_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        debug!(file = %file_name, mime = ?mime, "Receiving upload");

        let written = match self.write_chunks(&partial, chunks).await {
            Ok(size) => tokio::fs::rename(&partial, &path)
                .await
                .map(|()| size)
                .map_err(StorageError::from),
            Err(e) => Err(e),
        };

        match written {
            Ok(size) => {
                info!(path = %path.display(), size, "Upload stored");
                Ok(StoredFile {
                    path,
                    original_name: file_name,
                    size,
                })
            }
            Err(e) => {
                if let Err(remove_err) = tokio::fs::remove_file(&partial).await {
                    if remove_err.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %partial.display(), error = %remove_err, "Failed to remove partial upload");
                    }
                }
                Err(e)
            }
        }
    }

    async fn write_chunks<S, B, E>(&self, path: &Path, chunks: S) -> Result<u64, StorageError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        pin_mut!(chunks);
        let mut file = File::create(path).await?;
        let mut size = 0u64;

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| StorageError::Read(e.to_string()))?;
            let bytes = chunk.as_ref();
            size += bytes.len() as u64;
            if size > self.max_bytes {
                return Err(StorageError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            file.write_all(bytes).await?;
        }

        file.flush().await?;
        Ok(size)
    }
}

/// Final path component of a client-supplied file name.
///
/// Returns `None` when nothing usable remains.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    match base {
        "" | "." | ".." => None,
        base if base.contains('\0') => None,
        base => Some(base.to_string()),
    }
}
