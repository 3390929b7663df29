//! Command-line arguments.
//!
//! Every flag here is forwarded verbatim to spawned children, so each node
//! re-derives the same configuration. The `--ischild` marker is stripped
//! before clap sees the argv.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use spawntree_core::config::{ConfigLayer, FailureScope};
use spawntree_core::{MarkerPolicy, Variant};

#[derive(Parser, Debug)]
#[command(name = "spawntree")]
#[command(
    version,
    about = "Synthetic CPU, memory and disk load that fans out into a process tree",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub run: RunArgs,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "SPAWNTREE_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "SPAWNTREE_LOG_JSON", global = true)]
    pub log_json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write, read or remove a batch of disk test files
    Disk(DiskArgs),
    /// Print the live process tree below a pid
    Inspect(InspectArgs),
}

/// Options for a tree run. Unset options fall back to the config file, then
/// to the variant defaults.
#[derive(Debug, Default, Args)]
pub struct RunArgs {
    /// TOML config file
    #[arg(long, env = "SPAWNTREE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Tree shape: "fixed" (one level) or "deep" (recursive)
    #[arg(long, env = "SPAWNTREE_VARIANT")]
    pub variant: Option<Variant>,

    /// Children created at each fan-out point
    #[arg(long, env = "SPAWNTREE_CHILDREN")]
    pub children: Option<u32>,

    /// Deepest level that still fans out (deep variant)
    #[arg(long, env = "SPAWNTREE_MAX_DEPTH")]
    pub max_depth: Option<u32>,

    /// Milliseconds for each of the two workload pauses
    #[arg(long, env = "SPAWNTREE_WAIT_MS")]
    pub wait_ms: Option<u64>,

    /// Probability of an injected failure (exit code 10)
    #[arg(long, env = "SPAWNTREE_ERROR_CHANCE")]
    pub error_chance: Option<f64>,

    /// Which nodes may fail: "root" or "all"
    #[arg(long, env = "SPAWNTREE_FAILURE_SCOPE")]
    pub failure_scope: Option<FailureScope>,

    /// Size of each node's disk test file
    #[arg(long, env = "SPAWNTREE_FILE_SIZE_KB")]
    pub file_size_kb: Option<usize>,

    /// Iterations of the CPU burn loop
    #[arg(long, env = "SPAWNTREE_LOOP_COUNT")]
    pub loop_count: Option<usize>,

    /// Directory for per-node disk test files
    #[arg(long, env = "SPAWNTREE_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Run the CPU/memory/disk workload before spawning
    #[arg(long, env = "SPAWNTREE_WORKLOAD")]
    pub workload: Option<bool>,

    /// Leave the deep-tree idle state after this many milliseconds
    #[arg(long, env = "SPAWNTREE_IDLE_TIMEOUT_MS")]
    pub idle_timeout_ms: Option<u64>,

    /// Malformed --ischild values: "strict" fails, "lenient" uses 0
    #[arg(long, env = "SPAWNTREE_MARKER_POLICY")]
    pub marker_policy: Option<MarkerPolicy>,
}

impl RunArgs {
    /// The CLI/env layer of the configuration.
    pub fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            variant: self.variant,
            children: self.children,
            max_depth: self.max_depth,
            wait_ms: self.wait_ms,
            error_chance: self.error_chance,
            failure_scope: self.failure_scope,
            file_size_kb: self.file_size_kb,
            loop_count: self.loop_count,
            work_dir: self.work_dir.clone(),
            workload: self.workload,
            idle_timeout_ms: self.idle_timeout_ms,
            marker_policy: self.marker_policy,
        }
    }
}

#[derive(Debug, Args)]
pub struct DiskArgs {
    /// What to do with the batch
    #[arg(value_parser = ["write", "read", "clean"])]
    pub mode: String,

    /// Directory holding the files
    #[arg(long, default_value = "files")]
    pub dir: PathBuf,

    /// Number of files
    #[arg(long, default_value_t = 100)]
    pub count: usize,

    /// Size of each file
    #[arg(long, default_value_t = 128)]
    pub file_size_kb: usize,
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Root of the tree to inspect
    pub pid: u32,

    /// Print the tree as JSON
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_become_a_config_layer() {
        let cli = Cli::try_parse_from([
            "spawntree",
            "--variant",
            "deep",
            "--children",
            "3",
            "--workload",
            "false",
            "--marker-policy",
            "lenient",
        ])
        .unwrap();
        assert!(cli.command.is_none());
        let layer = cli.run.layer();
        assert_eq!(layer.variant, Some(Variant::Deep));
        assert_eq!(layer.children, Some(3));
        assert_eq!(layer.workload, Some(false));
        assert_eq!(layer.marker_policy, Some(MarkerPolicy::Lenient));
        assert!(layer.wait_ms.is_none());
    }

    #[test]
    fn bare_invocation_is_a_root_run() {
        let cli = Cli::try_parse_from(["spawntree"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.run.layer(), ConfigLayer::default());
    }

    #[test]
    fn unknown_variant_is_rejected() {
        assert!(Cli::try_parse_from(["spawntree", "--variant", "wide"]).is_err());
    }

    #[test]
    fn disk_subcommand_defaults() {
        let cli = Cli::try_parse_from(["spawntree", "disk", "write"]).unwrap();
        let Some(Command::Disk(args)) = cli.command else {
            panic!("expected disk subcommand");
        };
        assert_eq!(args.mode, "write");
        assert_eq!(args.count, 100);
        assert_eq!(args.file_size_kb, 128);
        assert_eq!(args.dir, PathBuf::from("files"));
    }

    #[test]
    fn inspect_takes_a_pid() {
        let cli = Cli::try_parse_from(["spawntree", "inspect", "42", "--json"]).unwrap();
        let Some(Command::Inspect(args)) = cli.command else {
            panic!("expected inspect subcommand");
        };
        assert_eq!(args.pid, 42);
        assert!(args.json);
    }
}
