//! Byte sources an upload reads from.

use crate::error::{ClientError, Result};
use crate::types::FileMetadata;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Random-access content to upload.
#[async_trait]
pub trait UploadSource: Send + Sync {
    /// Total size in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read `len` bytes starting at `start`.
    async fn read_range(&self, start: u64, len: u64) -> Result<Bytes>;
}

/// Content already in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl UploadSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_range(&self, start: u64, len: u64) -> Result<Bytes> {
        let start = usize::try_from(start).map_err(|_| out_of_range(start, len))?;
        let len = usize::try_from(len).map_err(|_| out_of_range(start as u64, len))?;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| out_of_range(start as u64, len as u64))?;
        Ok(self.data.slice(start..end))
    }
}

/// A file on disk, opened per read so parts can be read concurrently.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    len: u64,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ClientError::FileNotFound(path.display().to_string())
            } else {
                ClientError::Io(e)
            }
        })?;
        if !metadata.is_file() {
            return Err(ClientError::FileNotFound(path.display().to_string()));
        }
        Ok(Self {
            path: path.to_path_buf(),
            len: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name component, for upload metadata.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string()
    }

    /// Upload metadata named after the file, content type from its extension.
    pub fn metadata(&self) -> FileMetadata {
        FileMetadata::new(self.file_name(), self.len)
    }
}

#[async_trait]
impl UploadSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_range(&self, start: u64, len: u64) -> Result<Bytes> {
        if start.checked_add(len).filter(|end| *end <= self.len).is_none() {
            return Err(out_of_range(start, len));
        }
        let capacity = usize::try_from(len).map_err(|_| out_of_range(start, len))?;

        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(start)).await?;
        let mut buffer = vec![0u8; capacity];
        file.read_exact(&mut buffer).await?;
        Ok(Bytes::from(buffer))
    }
}

fn out_of_range(start: u64, len: u64) -> ClientError {
    ClientError::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!("range {}+{} is outside the source", start, len),
    ))
}
