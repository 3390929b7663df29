//! Resource-consumption actions run by each node before it fans out.
//!
//! - CPU/memory: a busy loop that grows an in-memory buffer
//! - Pacing: two timed pauses, the buffer is released between them
//! - Disk: write, read back and delete one private test file
//! - Failure injection: a probability-controlled synthetic failure

pub mod disk;

use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::RngExt;
use tracing::{debug, info};

use crate::config::{FailureScope, HarnessConfig, buffer_len};
use crate::error::{Error, Result};
use crate::node::NodeConfig;

pub use disk::{DiskBatch, fill_random};

/// Workload parameters for one node.
#[derive(Debug, Clone)]
pub struct Workload {
    loop_count: usize,
    wait: Duration,
    error_chance: f64,
    failure_scope: FailureScope,
    file_size_kb: usize,
    work_dir: PathBuf,
}

impl Workload {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            loop_count: config.loop_count,
            wait: config.wait,
            error_chance: config.error_chance,
            failure_scope: config.failure_scope,
            file_size_kb: config.file_size_kb,
            work_dir: config.work_dir.clone(),
        }
    }

    /// Run the full workload for `node`.
    ///
    /// Returns [`Error::SyntheticFailure`] right after the CPU phase when the
    /// failure roll hits; the pauses and disk cycle are then skipped.
    pub async fn run(&self, node: &NodeConfig) -> Result<()> {
        let fail = self.roll_failure(node);

        let buffer = burn_cpu(self.loop_count)?;
        debug!(identity = node.identity, bytes = buffer.len(), "CPU phase done");

        if fail {
            return Err(Error::SyntheticFailure {
                identity: node.identity,
            });
        }

        tokio::time::sleep(self.wait).await;
        drop(buffer);
        tokio::time::sleep(self.wait).await;

        let path = self.work_dir.join(node.test_file_name());
        let size = buffer_len("file_size_kb", self.file_size_kb, 1024)?;
        let bytes = disk_cycle(&path, size).await?;
        info!(identity = node.identity, path = %path.display(), bytes, "Disk cycle done");
        Ok(())
    }

    fn roll_failure(&self, node: &NodeConfig) -> bool {
        let eligible = match self.failure_scope {
            FailureScope::Root => node.is_root(),
            FailureScope::All => true,
        };
        eligible && rand::rng().random::<f64>() < self.error_chance
    }
}

/// Busy loop producing `loop_count` lines of `0`, `1` or `2`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn burn_cpu(loop_count: usize) -> Result<String> {
    let len = buffer_len("loop_count", loop_count, 2)?;
    let mut output = String::new();
    output
        .try_reserve_exact(len)
        .map_err(|e| Error::Config(format!("loop_count {loop_count} is too large: {e}")))?;
    let mut rng = rand::rng();
    for _ in 0..loop_count {
        let sum: f64 = rng.random::<f64>() + rng.random::<f64>();
        // `sum` is in [0, 2), so the rounded digit is always 0, 1 or 2
        output.push(char::from(b'0' + sum.round() as u8));
        output.push('\n');
    }
    Ok(output)
}

/// Write `size` random bytes to `path`, read them back, then delete the file.
///
/// The file is removed even when the read fails.
pub async fn disk_cycle(path: &Path, size: usize) -> Result<usize> {
    let data = fill_random(size);
    tokio::fs::write(path, &data).await?;

    let read = tokio::fs::read(path).await;
    tokio::fs::remove_file(path).await?;

    let read = read?;
    if read.len() != data.len() {
        return Err(Error::Io(std::io::Error::other(format!(
            "short read from {}: wrote {} bytes, read {}",
            path.display(),
            data.len(),
            read.len()
        ))));
    }
    Ok(read.len())
}
