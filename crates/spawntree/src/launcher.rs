//! Launcher: turns this process's argv into a [`NodeConfig`] and drives it.
//!
//! The argv is split once. The `--ischild` pair decides the node's role and
//! position in the tree; everything else goes to clap and is forwarded
//! unchanged to any children this node spawns.

use std::ffi::OsString;
use std::io::Write;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info};

use spawntree_core::config::ConfigLayer;
use spawntree_core::lifecycle::Lifecycle;
use spawntree_core::workload::DiskBatch;
use spawntree_core::{HarnessConfig, NodeArgs, NodeConfig, ProcessSpawner, inspect};

use crate::cli::{Cli, Command, DiskArgs, InspectArgs, RunArgs};

/// Convert the raw argv, rejecting any argument that is not valid UTF-8.
///
/// Children receive the parent's argv verbatim, so a lossy conversion here
/// would silently change what the whole subtree runs with.
pub fn utf8_args<I>(args: I) -> spawntree_core::Result<Vec<String>>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| {
            arg.into_string().map_err(|raw| {
                spawntree_core::Error::Config(format!("argument {raw:?} is not valid UTF-8"))
            })
        })
        .collect()
}

/// Run one invocation. `argv` excludes the program name.
pub async fn launch(argv: Vec<String>) -> Result<()> {
    let node_args = NodeArgs::split(argv);
    let cli = Cli::parse_from(
        std::iter::once("spawntree".to_string()).chain(node_args.forwarded.iter().cloned()),
    );

    let log_filter = format!(
        "spawntree={level},spawntree_core={level}",
        level = cli.log_level
    );
    spawntree_core::tracing_init::init_tracing(&log_filter, cli.log_json);

    match cli.command {
        Some(Command::Disk(ref args)) => run_disk(args),
        Some(Command::Inspect(ref args)) => run_inspect(args),
        None => run_node(node_args, &cli.run).await,
    }
}

/// Resolve configuration from defaults, config file and CLI/env.
pub fn resolve_config(run: &RunArgs) -> Result<HarnessConfig> {
    let file_layer = match &run.config {
        Some(path) => ConfigLayer::from_file(path)?,
        None => ConfigLayer::default(),
    };
    Ok(HarnessConfig::resolve(file_layer.merge(run.layer()))?)
}

async fn run_node(node_args: NodeArgs, run: &RunArgs) -> Result<()> {
    let config = resolve_config(run)?;
    let node = NodeConfig::from_args(node_args, config.variant, config.marker_policy)?;

    announce(&node)?;
    info!(
        node = %node,
        pid = node.pid,
        variant = ?config.variant,
        children = config.children,
        "Starting node"
    );

    let spawner = ProcessSpawner::current_exe()?;
    let mut lifecycle = Lifecycle::new(node, config);
    let spawned = lifecycle.run(&spawner).await?;
    debug!(node = %lifecycle.node(), spawned, state = ?lifecycle.state(), "Node done");
    Ok(())
}

fn announce(node: &NodeConfig) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", node.status_line())?;
    stdout.flush()?;
    Ok(())
}

#[allow(clippy::print_stdout)]
fn run_disk(args: &DiskArgs) -> Result<()> {
    let batch = DiskBatch::new(&args.dir, args.count, args.file_size_kb);
    match args.mode.as_str() {
        "write" => {
            let total = batch.write_all()?;
            println!("Total bytes written: {total}");
        }
        "read" => {
            let total = batch.read_all()?;
            println!("Total file bytes: {total}");
        }
        _ => {
            let removed = batch.clean()?;
            println!("Removed {removed} files");
        }
    }
    Ok(())
}

#[allow(clippy::print_stdout)]
fn run_inspect(args: &InspectArgs) -> Result<()> {
    let tree = inspect::capture(args.pid)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&tree)?);
    } else {
        print!("{}", tree.render());
        println!("{} descendants", tree.descendant_count());
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use spawntree_core::Variant;

    #[test]
    fn cli_layer_beats_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spawntree.toml");
        std::fs::write(&path, "children = 6\nwait_ms = 5\n").unwrap();
        let run = RunArgs {
            config: Some(path),
            children: Some(2),
            ..RunArgs::default()
        };
        let config = resolve_config(&run).unwrap();
        assert_eq!(config.variant, Variant::Fixed);
        assert_eq!(config.children, 2);
        assert_eq!(config.wait, Duration::from_millis(5));
    }

    #[test]
    fn utf8_args_pass_through_unchanged() {
        let args = utf8_args(["--children", "2", "--ischild", "1"].map(OsString::from)).unwrap();
        assert_eq!(args, vec!["--children", "2", "--ischild", "1"]);
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_argument_is_a_config_error() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let bad = OsStr::from_bytes(&[0x66, 0xff]).to_os_string();
        let err = utf8_args([OsString::from("--work-dir"), bad]).unwrap_err();
        assert!(matches!(err, spawntree_core::Error::Config(_)));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn missing_config_file_is_a_core_config_error() {
        let run = RunArgs {
            config: Some("/nonexistent/spawntree.toml".into()),
            ..RunArgs::default()
        };
        let err = resolve_config(&run).unwrap_err();
        let core = err.downcast_ref::<spawntree_core::Error>().unwrap();
        assert!(matches!(core, spawntree_core::Error::Config(_)));
    }
}
