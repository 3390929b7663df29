//! Node identity.
//!
//! A node decides once at startup whether it is the root of the tree or a
//! spawned child, based solely on the presence of the [`CHILD_MARKER`] flag in
//! its own argv. The value following the marker is the node's identity in the
//! fixed-fanout tree, or its depth in the deep-recursion tree.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::Variant;
use crate::error::{Error, Result};

/// Flag appended to every spawned child's argv.
pub const CHILD_MARKER: &str = "--ischild";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Root,
    Spawned,
}

/// How to treat a marker whose value is missing or not an integer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerPolicy {
    /// Fail fast with a configuration error.
    #[default]
    Strict,
    /// Log a warning and fall back to 0.
    Lenient,
}

impl FromStr for MarkerPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "strict" => Ok(Self::Strict),
            "lenient" => Ok(Self::Lenient),
            other => Err(format!("unknown marker policy '{other}' (expected strict or lenient)")),
        }
    }
}

/// Raw invocation arguments split into the marker value and everything else.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeArgs {
    /// Arguments forwarded verbatim to children.
    pub forwarded: Vec<String>,
    /// `None` for the root, `Some(None)` when the marker has no value.
    pub marker: Option<Option<String>>,
}

impl NodeArgs {
    /// Split an argv (without the program name) around the child marker.
    pub fn split<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut forwarded = Vec::new();
        let mut marker = None;
        let mut iter = argv.into_iter().map(Into::into);
        while let Some(arg) = iter.next() {
            if arg == CHILD_MARKER {
                marker = Some(iter.next());
            } else {
                forwarded.push(arg);
            }
        }
        Self { forwarded, marker }
    }

    pub const fn is_child(&self) -> bool {
        self.marker.is_some()
    }
}

/// Typed identity of the running node, built once and passed down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub role: Role,
    pub variant: Variant,
    /// Unique among siblings of one fan-out call. Always 0 in the deep tree.
    pub identity: u32,
    /// Spawn hops from the root.
    pub depth: u32,
    /// Arguments shared by the whole tree.
    pub argv: Vec<String>,
    /// OS process id, for diagnostics only.
    pub pid: u32,
}

impl NodeConfig {
    /// The root node of a tree.
    pub fn root(variant: Variant, argv: Vec<String>) -> Self {
        Self {
            role: Role::Root,
            variant,
            identity: 0,
            depth: 0,
            argv,
            pid: std::process::id(),
        }
    }

    /// Derive this node's identity from its split argv.
    pub fn from_args(args: NodeArgs, variant: Variant, policy: MarkerPolicy) -> Result<Self> {
        let Some(raw) = args.marker else {
            return Ok(Self::root(variant, args.forwarded));
        };
        let value = parse_marker_value(raw.as_deref(), policy)?;
        let (identity, depth) = match variant {
            Variant::Fixed => (value, 1),
            Variant::Deep => (0, value),
        };
        Ok(Self {
            role: Role::Spawned,
            variant,
            identity,
            depth,
            argv: args.forwarded,
            pid: std::process::id(),
        })
    }

    pub fn is_root(&self) -> bool {
        self.role == Role::Root
    }

    /// Human-readable line announcing this node.
    pub fn status_line(&self) -> String {
        match (self.role, self.variant) {
            (Role::Root, _) => format!("Running master process (pid {})", self.pid),
            (Role::Spawned, Variant::Fixed) => {
                format!("Running child process #{} (pid {})", self.identity, self.pid)
            }
            (Role::Spawned, Variant::Deep) => {
                format!("Running child process at depth {} (pid {})", self.depth, self.pid)
            }
        }
    }

    /// Name of the private disk workload file.
    ///
    /// Deep-tree siblings share a depth, so the pid keeps their files apart.
    pub fn test_file_name(&self) -> String {
        match self.variant {
            Variant::Fixed => format!("file{}.test", self.identity),
            Variant::Deep => format!("file-d{}-{}.test", self.depth, self.pid),
        }
    }
}

impl fmt::Display for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.role {
            Role::Root => write!(f, "root"),
            Role::Spawned => write!(f, "child #{} at depth {}", self.identity, self.depth),
        }
    }
}

fn parse_marker_value(raw: Option<&str>, policy: MarkerPolicy) -> Result<u32> {
    let parsed = raw.map(str::parse::<u32>);
    match (parsed, policy) {
        (Some(Ok(n)), _) => Ok(n),
        (_, MarkerPolicy::Lenient) => {
            warn!(value = ?raw, "Malformed {CHILD_MARKER} value, defaulting to 0");
            Ok(0)
        }
        (None, MarkerPolicy::Strict) => {
            Err(Error::Config(format!("{CHILD_MARKER} requires an integer value")))
        }
        (Some(Err(e)), MarkerPolicy::Strict) => Err(Error::Config(format!(
            "invalid {CHILD_MARKER} value {:?}: {e}",
            raw.unwrap_or_default()
        ))),
    }
}
