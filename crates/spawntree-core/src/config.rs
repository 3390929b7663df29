//! Configuration resolution for spawntree.
//!
//! Implements layered config resolution:
//! 1. Built-in defaults (which depend on the tree [`Variant`])
//! 2. TOML config file (`--config <path>`)
//! 3. Environment variables and CLI flags (merged by the binary)
//!
//! Every node in the tree receives the same argv, so every node resolves the
//! same configuration.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::node::MarkerPolicy;

/// Shape of the spawn tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// The root spawns `children` nodes, which never spawn again.
    #[default]
    Fixed,
    /// Every node spawns `children` nodes while `depth <= max_depth`.
    Deep,
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "fixed" => Ok(Self::Fixed),
            "deep" => Ok(Self::Deep),
            other => Err(format!("unknown variant '{other}' (expected fixed or deep)")),
        }
    }
}

/// Which nodes roll for an injected failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureScope {
    /// Only the root node may fail.
    #[default]
    Root,
    /// Every node may fail.
    All,
}

impl FromStr for FailureScope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "root" => Ok(Self::Root),
            "all" => Ok(Self::All),
            other => Err(format!("unknown failure scope '{other}' (expected root or all)")),
        }
    }
}

/// Fully resolved harness configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HarnessConfig {
    pub variant: Variant,
    /// Children created at each fan-out point.
    pub children: u32,
    /// Deepest level that still fans out (deep variant only).
    pub max_depth: u32,
    /// Each of the two workload pauses.
    pub wait: Duration,
    /// Probability in `[0, 1]` of an injected failure.
    pub error_chance: f64,
    pub failure_scope: FailureScope,
    pub file_size_kb: usize,
    /// Iterations of the CPU/memory burn loop.
    pub loop_count: usize,
    /// Directory holding the per-node disk test file.
    pub work_dir: PathBuf,
    /// Whether nodes run the CPU/memory/disk workload before spawning.
    pub workload: bool,
    /// Bounded idle for deep-tree nodes. `None` idles until terminated.
    pub idle_timeout: Option<Duration>,
    pub marker_policy: MarkerPolicy,
}

impl HarnessConfig {
    /// Built-in defaults for a tree variant.
    pub fn for_variant(variant: Variant) -> Self {
        let (children, workload) = match variant {
            Variant::Fixed => (8, true),
            Variant::Deep => (2, false),
        };
        Self {
            variant,
            children,
            max_depth: 3,
            wait: Duration::from_millis(1000),
            error_chance: 0.0,
            failure_scope: FailureScope::default(),
            file_size_kb: 1024,
            loop_count: 10_000_000,
            work_dir: PathBuf::from("."),
            workload,
            idle_timeout: None,
            marker_policy: MarkerPolicy::default(),
        }
    }

    /// Resolve a merged layer on top of the variant defaults.
    pub fn resolve(layer: ConfigLayer) -> Result<Self> {
        let mut config = Self::for_variant(layer.variant.unwrap_or_default());
        if let Some(n) = layer.children {
            config.children = n;
        }
        if let Some(n) = layer.max_depth {
            config.max_depth = n;
        }
        if let Some(ms) = layer.wait_ms {
            config.wait = Duration::from_millis(ms);
        }
        if let Some(p) = layer.error_chance {
            config.error_chance = p;
        }
        if let Some(scope) = layer.failure_scope {
            config.failure_scope = scope;
        }
        if let Some(kb) = layer.file_size_kb {
            config.file_size_kb = kb;
        }
        if let Some(n) = layer.loop_count {
            config.loop_count = n;
        }
        if let Some(dir) = layer.work_dir {
            config.work_dir = dir;
        }
        if let Some(enabled) = layer.workload {
            config.workload = enabled;
        }
        if let Some(ms) = layer.idle_timeout_ms {
            config.idle_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(policy) = layer.marker_policy {
            config.marker_policy = policy;
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject values no node could run with.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.error_chance) {
            return Err(Error::Config(format!(
                "error_chance must be within [0, 1], got {}",
                self.error_chance
            )));
        }
        if self.max_depth == u32::MAX {
            return Err(Error::Config(format!(
                "max_depth must be below {}",
                u32::MAX
            )));
        }
        buffer_len("loop_count", self.loop_count, 2)?;
        buffer_len("file_size_kb", self.file_size_kb, 1024)?;
        Ok(())
    }
}

/// Byte length of a buffer sized `count * unit`, or a config error when it
/// cannot be allocated.
pub fn buffer_len(name: &str, count: usize, unit: usize) -> Result<usize> {
    count
        .checked_mul(unit)
        .filter(|&len| isize::try_from(len).is_ok())
        .ok_or_else(|| Error::Config(format!("{name} {count} is too large")))
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::for_variant(Variant::default())
    }
}

/// One configuration source. Unset fields defer to lower layers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    pub variant: Option<Variant>,
    pub children: Option<u32>,
    pub max_depth: Option<u32>,
    pub wait_ms: Option<u64>,
    pub error_chance: Option<f64>,
    pub failure_scope: Option<FailureScope>,
    pub file_size_kb: Option<usize>,
    pub loop_count: Option<usize>,
    pub work_dir: Option<PathBuf>,
    pub workload: Option<bool>,
    pub idle_timeout_ms: Option<u64>,
    pub marker_policy: Option<MarkerPolicy>,
}

impl ConfigLayer {
    /// Read a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        toml::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Overlay `higher` on top of `self`; fields set in `higher` win.
    #[must_use]
    pub fn merge(self, higher: Self) -> Self {
        Self {
            variant: higher.variant.or(self.variant),
            children: higher.children.or(self.children),
            max_depth: higher.max_depth.or(self.max_depth),
            wait_ms: higher.wait_ms.or(self.wait_ms),
            error_chance: higher.error_chance.or(self.error_chance),
            failure_scope: higher.failure_scope.or(self.failure_scope),
            file_size_kb: higher.file_size_kb.or(self.file_size_kb),
            loop_count: higher.loop_count.or(self.loop_count),
            work_dir: higher.work_dir.or(self.work_dir),
            workload: higher.workload.or(self.workload),
            idle_timeout_ms: higher.idle_timeout_ms.or(self.idle_timeout_ms),
            marker_policy: higher.marker_policy.or(self.marker_policy),
        }
    }
}
