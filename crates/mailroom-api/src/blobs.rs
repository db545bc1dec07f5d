//! Attachment byte storage. Messages only carry attachment metadata; the
//! bytes live behind [`BlobStore`] under a generated stored name.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use axum::body::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{error, info};
use uuid::Uuid;

use mailroom_db::{MailError, Result};
use mailroom_types::models::Attachment;

pub type BlobStream = BoxStream<'static, io::Result<Bytes>>;

/// A stored blob opened for reading.
pub struct BlobReader {
    pub size: u64,
    pub stream: BlobStream,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist `bytes` and describe them as an attachment of `original_name`.
    async fn put(&self, bytes: Bytes, original_name: &str) -> Result<Attachment>;

    /// Open a blob by stored name. `NotFound` when nothing is stored there.
    async fn get(&self, stored_name: &str) -> Result<BlobReader>;
}

/// Flat directory of blobs, one file per stored name.
pub struct FsBlobStore {
    dir: PathBuf,
}

impl FsBlobStore {
    pub async fn new(dir: PathBuf) -> anyhow::Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Attachment storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    fn blob_path(&self, stored_name: &str) -> Result<PathBuf> {
        // Only generated names are ever valid, which also rules out traversal
        let id = stored_name
            .parse::<Uuid>()
            .map_err(|_| MailError::validation("invalid attachment name"))?;
        Ok(self.dir.join(id.to_string()))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, bytes: Bytes, original_name: &str) -> Result<Attachment> {
        let name = original_name.trim();
        if name.is_empty() {
            return Err(MailError::validation("attachment name is required"));
        }
        if bytes.is_empty() {
            return Err(MailError::validation("attachment is empty"));
        }

        let stored_name = Uuid::new_v4().to_string();
        let path = self.dir.join(&stored_name);

        let mut file = fs::File::create(&path).await.map_err(|e| io_failure(&path, e))?;
        file.write_all(&bytes).await.map_err(|e| io_failure(&path, e))?;
        file.flush().await.map_err(|e| io_failure(&path, e))?;

        let mime_type = mime_guess::from_path(name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        info!("Stored attachment '{}' as {} ({} bytes)", name, stored_name, bytes.len());

        Ok(Attachment {
            name: name.to_string(),
            size: bytes.len() as u64,
            mime_type,
            stored_name,
        })
    }

    async fn get(&self, stored_name: &str) -> Result<BlobReader> {
        let path = self.blob_path(stored_name)?;
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(MailError::not_found(format!("attachment {}", stored_name)));
            }
            Err(e) => return Err(io_failure(&path, e)),
        };
        let size = file
            .metadata()
            .await
            .map_err(|e| io_failure(&path, e))?
            .len();

        Ok(BlobReader {
            size,
            stream: ReaderStream::new(file).boxed(),
        })
    }
}

fn io_failure(path: &std::path::Path, e: io::Error) -> MailError {
    error!("Attachment I/O failed for {}: {}", path.display(), e);
    MailError::StorageUnavailable(e.to_string())
}
