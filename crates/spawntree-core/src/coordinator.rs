//! Spawn coordination.
//!
//! The coordinator is the only place fan-out decisions are made. Both tree
//! shapes share the same flow: [`SpawnCoordinator::plan`] decides which
//! children to create, then [`SpawnCoordinator::fan_out`] hands every request
//! to a [`Spawner`] without waiting on any child.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{HarnessConfig, Variant};
use crate::error::{Error, Result};
use crate::node::{CHILD_MARKER, NodeConfig};

/// Fan-out rule for a tree shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutPolicy {
    /// Only the root fans out, exactly one level deep.
    Fixed { children: u32 },
    /// Any node with `depth <= max_depth` fans out.
    Deep { children: u32, max_depth: u32 },
}

impl FanoutPolicy {
    pub const fn from_config(config: &HarnessConfig) -> Self {
        match config.variant {
            Variant::Fixed => Self::Fixed {
                children: config.children,
            },
            Variant::Deep => Self::Deep {
                children: config.children,
                max_depth: config.max_depth,
            },
        }
    }

    /// Whether `node` creates children at all.
    pub fn fans_out(&self, node: &NodeConfig) -> bool {
        match *self {
            Self::Fixed { .. } => node.is_root(),
            Self::Deep { max_depth, .. } => node.depth <= max_depth,
        }
    }

    const fn children(&self) -> u32 {
        match *self {
            Self::Fixed { children } | Self::Deep { children, .. } => children,
        }
    }
}

/// One child to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub variant: Variant,
    /// 1-based position within the fan-out call (fixed tree).
    pub identity: u32,
    pub depth: u32,
    /// The parent's argv, copied unchanged.
    pub argv: Vec<String>,
}

impl SpawnRequest {
    /// Value passed after the marker: identity or depth, by tree shape.
    pub const fn marker_value(&self) -> u32 {
        match self.variant {
            Variant::Fixed => self.identity,
            Variant::Deep => self.depth,
        }
    }

    /// Full argv for the child process.
    pub fn child_args(&self) -> Vec<String> {
        let mut args = self.argv.clone();
        args.push(CHILD_MARKER.to_string());
        args.push(self.marker_value().to_string());
        args
    }
}

/// Creates one OS process (or a stand-in) per request.
pub trait Spawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<ChildHandle>;
}

/// A spawned child. Retained so callers may join on it; the coordinator never does.
#[derive(Debug)]
pub struct ChildHandle {
    pub identity: u32,
    pub depth: u32,
    pub pid: Option<u32>,
    child: Option<Child>,
    relays: Vec<JoinHandle<std::io::Result<u64>>>,
}

impl ChildHandle {
    /// A handle with no process or output relay attached.
    pub const fn detached(identity: u32, depth: u32, pid: Option<u32>) -> Self {
        Self {
            identity,
            depth,
            pid,
            child: None,
            relays: Vec::new(),
        }
    }

    /// Wait for the child process to exit. `None` for detached handles.
    pub async fn wait(&mut self) -> Result<Option<ExitStatus>> {
        match self.child.as_mut() {
            Some(child) => Ok(Some(child.wait().await?)),
            None => Ok(None),
        }
    }

    /// Wait until the child's output streams reach EOF.
    async fn drain_relays(&mut self) {
        for relay in self.relays.drain(..) {
            match relay.await {
                Ok(Ok(bytes)) => debug!(identity = self.identity, bytes, "relay finished"),
                Ok(Err(e)) => warn!(identity = self.identity, error = %e, "relay failed"),
                Err(e) => warn!(identity = self.identity, error = %e, "relay task panicked"),
            }
        }
    }
}

/// Children created by one fan-out call.
#[derive(Debug, Default)]
pub struct FanOut {
    pub children: Vec<ChildHandle>,
}

impl FanOut {
    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn pids(&self) -> Vec<u32> {
        self.children.iter().filter_map(|c| c.pid).collect()
    }

    /// Wait until every child's relayed output has been fully forwarded.
    ///
    /// This does not wait for exit: a child that closes its streams early is
    /// considered drained.
    pub async fn drain(&mut self) {
        for child in &mut self.children {
            child.drain_relays().await;
        }
    }
}

/// Decides and performs fan-out for one node.
#[derive(Debug, Clone, Copy)]
pub struct SpawnCoordinator {
    policy: FanoutPolicy,
}

impl SpawnCoordinator {
    pub const fn new(policy: FanoutPolicy) -> Self {
        Self { policy }
    }

    pub const fn policy(&self) -> FanoutPolicy {
        self.policy
    }

    /// Children `node` should create, in spawn order.
    pub fn plan(&self, node: &NodeConfig) -> Vec<SpawnRequest> {
        if !self.policy.fans_out(node) {
            return Vec::new();
        }
        let Some(depth) = node.depth.checked_add(1) else {
            warn!(%node, "Depth limit of the counter reached, not fanning out");
            return Vec::new();
        };
        (1..=self.policy.children())
            .map(|identity| SpawnRequest {
                variant: node.variant,
                identity,
                depth,
                argv: node.argv.clone(),
            })
            .collect()
    }

    /// Issue every planned spawn and return immediately with the handles.
    ///
    /// Stops at the first spawn failure. Children already created keep running.
    pub fn fan_out<S: Spawner + ?Sized>(&self, node: &NodeConfig, spawner: &S) -> Result<FanOut> {
        let requests = self.plan(node);
        if requests.is_empty() {
            debug!(%node, "Leaf node, no fan-out");
            return Ok(FanOut::default());
        }

        info!(%node, children = requests.len(), "Fanning out");
        let mut fan_out = FanOut::default();
        for request in &requests {
            match spawner.spawn(request) {
                Ok(handle) => {
                    debug!(
                        identity = request.identity,
                        depth = request.depth,
                        child_pid = ?handle.pid,
                        "Spawned child"
                    );
                    fan_out.children.push(handle);
                }
                Err(e) => {
                    warn!(
                        identity = request.identity,
                        depth = request.depth,
                        already_spawned = fan_out.len(),
                        error = %e,
                        "Fan-out aborted"
                    );
                    return Err(e);
                }
            }
        }
        Ok(fan_out)
    }
}

/// Spawns real OS processes and relays their output into ours.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
}

impl ProcessSpawner {
    /// Re-launch the currently running executable.
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe().map_err(|e| {
            Error::Config(format!("Cannot determine current executable: {e}"))
        })?;
        Ok(Self { program })
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Spawner for ProcessSpawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<ChildHandle> {
        let spawn_error = |source| Error::Spawn {
            identity: request.identity,
            depth: request.depth,
            source,
        };

        let mut child = Command::new(&self.program)
            .args(request.child_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        let mut relays = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            relays.push(tokio::spawn(relay(stdout, tokio::io::stdout())));
        }
        if let Some(stderr) = child.stderr.take() {
            relays.push(tokio::spawn(relay(stderr, tokio::io::stderr())));
        }

        Ok(ChildHandle {
            identity: request.identity,
            depth: request.depth,
            pid: child.id(),
            child: Some(child),
            relays,
        })
    }
}

/// Copy a child stream into one of our own until EOF.
async fn relay<R, W>(mut from: R, mut to: W) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let bytes = tokio::io::copy(&mut from, &mut to).await?;
    to.flush().await?;
    Ok(bytes)
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use super::*;
    use crate::node::{MarkerPolicy, NodeArgs};

    #[derive(Default)]
    struct RecordingSpawner {
        requests: Mutex<Vec<SpawnRequest>>,
        fail_at: Option<u32>,
    }

    impl Spawner for RecordingSpawner {
        fn spawn(&self, request: &SpawnRequest) -> Result<ChildHandle> {
            if self.fail_at == Some(request.identity) {
                return Err(Error::Spawn {
                    identity: request.identity,
                    depth: request.depth,
                    source: std::io::Error::other("resource temporarily unavailable"),
                });
            }
            self.requests.lock().unwrap().push(request.clone());
            Ok(ChildHandle::detached(request.identity, request.depth, None))
        }
    }

    fn fixed(children: u32) -> SpawnCoordinator {
        SpawnCoordinator::new(FanoutPolicy::Fixed { children })
    }

    fn deep(children: u32, max_depth: u32) -> SpawnCoordinator {
        SpawnCoordinator::new(FanoutPolicy::Deep {
            children,
            max_depth,
        })
    }

    /// Rebuild the child node exactly as the child process would.
    fn child_node(request: &SpawnRequest) -> NodeConfig {
        NodeConfig::from_args(
            NodeArgs::split(request.child_args()),
            request.variant,
            MarkerPolicy::Strict,
        )
        .unwrap()
    }

    /// Walk the whole tree, returning (descendants, deepest depth).
    fn walk(coordinator: &SpawnCoordinator, node: &NodeConfig) -> (usize, u32) {
        let mut count = 0;
        let mut deepest = node.depth;
        for request in coordinator.plan(node) {
            let child = child_node(&request);
            assert_eq!(child.depth, node.depth + 1);
            assert_eq!(child.argv, node.argv);
            let (sub, sub_deepest) = walk(coordinator, &child);
            count += 1 + sub;
            deepest = deepest.max(sub_deepest);
        }
        (count, deepest)
    }

    #[test]
    fn fixed_root_spawns_exactly_n_with_unique_identities() {
        for n in 0..6 {
            let root = NodeConfig::root(Variant::Fixed, Vec::new());
            let plan = fixed(n).plan(&root);
            assert_eq!(plan.len(), n as usize);
            let ids: HashSet<u32> = plan.iter().map(|r| r.identity).collect();
            assert_eq!(ids, (1..=n).collect());
        }
    }

    #[test]
    fn fixed_children_never_respawn() {
        let coordinator = fixed(4);
        let root = NodeConfig::root(Variant::Fixed, vec!["--wait-ms".into(), "0".into()]);
        let (count, deepest) = walk(&coordinator, &root);
        assert_eq!(count, 4);
        assert_eq!(deepest, 1);
    }

    #[test]
    fn fixed_child_args_carry_marker_and_identity() {
        let root = NodeConfig::root(Variant::Fixed, vec!["--children".into(), "2".into()]);
        let plan = fixed(2).plan(&root);
        assert_eq!(plan[0].child_args(), vec!["--children", "2", "--ischild", "1"]);
        assert_eq!(plan[1].child_args(), vec!["--children", "2", "--ischild", "2"]);
    }

    #[test]
    fn deep_tree_reference_configuration_has_thirty_descendants() {
        let root = NodeConfig::root(Variant::Deep, Vec::new());
        let (count, deepest) = walk(&deep(2, 3), &root);
        assert_eq!(count, 2 + 4 + 8 + 16);
        assert_eq!(deepest, 4);
    }

    #[test]
    fn deep_tree_height_and_size_follow_geometric_series() {
        for branching in 0..4u32 {
            for max_depth in 0..4u32 {
                let root = NodeConfig::root(Variant::Deep, Vec::new());
                let (count, deepest) = walk(&deep(branching, max_depth), &root);
                let expected: u32 = (1..=max_depth + 1).map(|k| branching.pow(k)).sum();
                assert_eq!(count, expected as usize);
                let expected_height = if branching == 0 { 0 } else { max_depth + 1 };
                assert_eq!(deepest, expected_height);
            }
        }
    }

    #[test]
    fn deep_child_marker_carries_depth() {
        let root = NodeConfig::root(Variant::Deep, Vec::new());
        let plan = deep(2, 3).plan(&root);
        assert!(plan.iter().all(|r| r.child_args().ends_with(&["--ischild".to_string(), "1".to_string()])));
    }

    #[test]
    fn node_at_counter_limit_is_a_leaf() {
        let limit = u32::MAX.to_string();
        let node = NodeConfig::from_args(
            NodeArgs::split(["--ischild", limit.as_str()]),
            Variant::Deep,
            MarkerPolicy::Strict,
        )
        .unwrap();
        assert!(deep(2, u32::MAX).plan(&node).is_empty());
    }

    #[test]
    fn fan_out_issues_every_request() {
        let spawner = RecordingSpawner::default();
        let root = NodeConfig::root(Variant::Fixed, Vec::new());
        let fan_out = fixed(3).fan_out(&root, &spawner).unwrap();
        assert_eq!(fan_out.len(), 3);
        let recorded = spawner.requests.lock().unwrap();
        let ids: Vec<u32> = recorded.iter().map(|r| r.identity).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn leaf_fan_out_is_empty() {
        let spawner = RecordingSpawner::default();
        let leaf = NodeConfig::from_args(
            NodeArgs::split(["--ischild", "5"]),
            Variant::Deep,
            MarkerPolicy::Strict,
        )
        .unwrap();
        let fan_out = deep(2, 3).fan_out(&leaf, &spawner).unwrap();
        assert!(fan_out.is_empty());
    }

    #[test]
    fn spawn_failure_reports_the_failed_child() {
        let spawner = RecordingSpawner {
            fail_at: Some(2),
            ..RecordingSpawner::default()
        };
        let root = NodeConfig::root(Variant::Fixed, Vec::new());
        let err = fixed(3).fan_out(&root, &spawner).unwrap_err();
        assert!(matches!(err, Error::Spawn { identity: 2, depth: 1, .. }));
        assert_eq!(spawner.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let spawner = ProcessSpawner::with_program("/nonexistent/spawntree-binary");
        let request = SpawnRequest {
            variant: Variant::Fixed,
            identity: 7,
            depth: 1,
            argv: Vec::new(),
        };
        let err = spawner.spawn(&request).unwrap_err();
        assert!(matches!(err, Error::Spawn { identity: 7, .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_spawner_returns_joinable_handles() {
        let spawner = ProcessSpawner::with_program("true");
        let root = NodeConfig::root(Variant::Fixed, Vec::new());
        let mut fan_out = fixed(2).fan_out(&root, &spawner).unwrap();
        assert_eq!(fan_out.pids().len(), 2);
        fan_out.drain().await;
        for child in &mut fan_out.children {
            let status = child.wait().await.unwrap().unwrap();
            assert!(status.success());
        }
    }
}
