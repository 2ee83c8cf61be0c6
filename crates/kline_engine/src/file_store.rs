use std::io;
use std::path::{Path, PathBuf};

use kline_core::Job;
use kline_logging::kline_trace;

use crate::store::{decode_snapshot, encode_snapshot};
use crate::{AtomicFileWriter, Store, StoreError};

fn file_name(key: &str) -> String {
    format!("{key}.json")
}

/// Primary store: one JSON document per key, written asynchronously through
/// a temp file and a rename.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    key: String,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            key: key.into(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(file_name(&self.key))
    }

    fn temp_path(&self) -> PathBuf {
        self.dir.join(format!(".{}.tmp", file_name(&self.key)))
    }
}

#[async_trait::async_trait]
impl Store for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self) -> Result<Option<Job>, StoreError> {
        match tokio::fs::read(self.path()).await {
            Ok(bytes) => decode_snapshot(&bytes).map(Some),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn set(&self, job: &Job) -> Result<(), StoreError> {
        let encoded = encode_snapshot(job)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, &encoded).await?;
        tokio::fs::rename(&temp, self.path()).await?;
        kline_trace!("wrote {} bytes to {:?}", encoded.len(), self.path());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path()).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Fallback store: synchronous writes through [`AtomicFileWriter`], with a
/// hard cap on the document size.
#[derive(Debug, Clone)]
pub struct CompactFileStore {
    writer: AtomicFileWriter,
    key: String,
    max_bytes: usize,
}

impl CompactFileStore {
    pub const DEFAULT_MAX_BYTES: usize = 5 * 1024 * 1024;

    pub fn new(dir: &Path, key: impl Into<String>, max_bytes: usize) -> Self {
        Self {
            writer: AtomicFileWriter::new(dir.to_path_buf()),
            key: key.into(),
            max_bytes,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.writer.path_of(&file_name(&self.key))
    }
}

#[async_trait::async_trait]
impl Store for CompactFileStore {
    fn name(&self) -> &str {
        "compact-file"
    }

    async fn get(&self) -> Result<Option<Job>, StoreError> {
        match self.writer.read(&file_name(&self.key))? {
            Some(bytes) => decode_snapshot(&bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn set(&self, job: &Job) -> Result<(), StoreError> {
        let encoded = encode_snapshot(job)?;
        if encoded.len() > self.max_bytes {
            return Err(StoreError::CapacityExceeded {
                size: encoded.len(),
                max: self.max_bytes,
            });
        }
        self.writer.write(&file_name(&self.key), &encoded)?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.writer.remove(&file_name(&self.key))?;
        Ok(())
    }
}
