//! Disk-only batch workload: many files written, then read back in a
//! separate invocation so reads are not served by a warm writer process.

use std::fs;
use std::path::{Path, PathBuf};

use rand::RngExt;
use tracing::{debug, info};

use crate::config::buffer_len;
use crate::error::{Error, Result};

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `size` bytes of random base-36 characters.
pub fn fill_random(size: usize) -> Vec<u8> {
    let mut rng = rand::rng();
    (0..size)
        .map(|_| BASE36[rng.random_range(0..BASE36.len())])
        .collect()
}

/// A numbered set of test files in one directory.
#[derive(Debug, Clone)]
pub struct DiskBatch {
    dir: PathBuf,
    count: usize,
    file_size_kb: usize,
}

impl DiskBatch {
    pub fn new(dir: impl Into<PathBuf>, count: usize, file_size_kb: usize) -> Self {
        Self {
            dir: dir.into(),
            count,
            file_size_kb,
        }
    }

    fn path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("file{index}.test"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory and write every file. Returns total bytes written.
    pub fn write_all(&self) -> Result<usize> {
        let size = buffer_len("file_size_kb", self.file_size_kb, 1024)?;
        let total = size
            .checked_mul(self.count)
            .ok_or_else(|| Error::Config(format!("{} files of {size} bytes is too large", self.count)))?;
        fs::create_dir_all(&self.dir)?;
        for index in 0..self.count {
            fs::write(self.path(index), fill_random(size))?;
        }
        info!(dir = %self.dir.display(), files = self.count, total, "Wrote disk batch");
        Ok(total)
    }

    /// Read every file back. Returns total bytes read.
    pub fn read_all(&self) -> Result<usize> {
        let mut total = 0;
        for index in 0..self.count {
            let bytes = fs::read(self.path(index))?;
            debug!(index, len = bytes.len(), "Read test file");
            total += bytes.len();
        }
        info!(dir = %self.dir.display(), files = self.count, total, "Read disk batch");
        Ok(total)
    }

    /// Remove every file that exists. Returns how many were removed.
    pub fn clean(&self) -> Result<usize> {
        let mut removed = 0;
        for index in 0..self.count {
            let path = self.path(index);
            if path.exists() {
                fs::remove_file(path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn fill_random_is_base36() {
        let data = fill_random(4096);
        assert_eq!(data.len(), 4096);
        assert!(data.iter().all(|b| BASE36.contains(b)));
    }

    #[test]
    fn batch_write_read_clean() {
        let tmp = tempfile::tempdir().unwrap();
        let batch = DiskBatch::new(tmp.path().join("files"), 5, 2);
        assert_eq!(batch.write_all().unwrap(), 5 * 2048);
        assert!(batch.dir().join("file4.test").exists());
        assert_eq!(batch.read_all().unwrap(), 5 * 2048);
        assert_eq!(batch.clean().unwrap(), 5);
        assert_eq!(batch.clean().unwrap(), 0);
    }

    #[test]
    fn oversized_batch_is_rejected_before_writing() {
        let tmp = tempfile::tempdir().unwrap();
        let batch = DiskBatch::new(tmp.path().join("files"), 1, usize::MAX);
        assert!(matches!(batch.write_all(), Err(Error::Config(_))));
        assert!(!batch.dir().exists());
    }

    #[test]
    fn reading_missing_batch_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let batch = DiskBatch::new(tmp.path(), 1, 1);
        assert!(matches!(batch.read_all(), Err(crate::Error::Io(_))));
    }
}
