//! spawntree Core Library
//!
//! Shared functionality for the spawntree load harness:
//! - Layered harness configuration
//! - Node identity parsed from the `--ischild` marker
//! - Spawn coordination for the fixed-fanout and deep-recursion trees
//! - CPU, memory and disk workload actions
//! - Process-tree inspection
//! - Common error types

pub mod config;
pub mod coordinator;
pub mod error;
pub mod inspect;
pub mod lifecycle;
pub mod node;
pub mod tracing_init;
pub mod workload;

pub use config::{HarnessConfig, Variant};
pub use coordinator::{FanOut, FanoutPolicy, ProcessSpawner, SpawnCoordinator, SpawnRequest};
pub use error::{Error, Result};
pub use lifecycle::NodeState;
pub use node::{MarkerPolicy, NodeArgs, NodeConfig, Role};
