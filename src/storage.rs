// ABOUTME: Object-store boundary consumed by the loader for remote chunks
// ABOUTME: The core never constructs storage clients; callers supply an implementation

use crate::error::TransferError;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Boundary to an object store. Implementations fetch one object to a local
/// path; the loader treats the call as opaque blocking I/O.
pub trait ObjectStore: Send + Sync {
    fn download(&self, bucket: &str, key: &str, local_path: &Path) -> Result<(), TransferError>;
}

/// Remote chunk source configuration for a load run. When present, each
/// chunk file is downloaded from `bucket` under `prefix` into `scratch_dir`
/// before loading.
#[derive(Clone)]
pub struct RemoteSource {
    pub store: Arc<dyn ObjectStore>,
    pub bucket: String,
    pub prefix: String,
    pub scratch_dir: PathBuf,
}

impl RemoteSource {
    /// Fetch a chunk by filename; returns the local path to load from.
    pub fn fetch(&self, chunk_file: &str) -> Result<PathBuf, TransferError> {
        let key = format!("{}{}", self.prefix, chunk_file);
        let local_path = self.scratch_dir.join(chunk_file);
        self.store.download(&self.bucket, &key, &local_path)?;
        tracing::info!(
            "Downloaded chunk from object store: {}/{} -> {}",
            self.bucket,
            key,
            local_path.display()
        );
        Ok(local_path)
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Directory-backed store for tests: "buckets" are subdirectories.
    pub struct DirStore {
        pub root: PathBuf,
    }

    impl ObjectStore for DirStore {
        fn download(
            &self,
            bucket: &str,
            key: &str,
            local_path: &Path,
        ) -> Result<(), TransferError> {
            let source = self.root.join(bucket).join(key);
            if let Some(parent) = local_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&source, local_path)?;
            Ok(())
        }
    }
}
