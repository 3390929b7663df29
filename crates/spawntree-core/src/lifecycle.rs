//! Per-node lifecycle.
//!
//! ```text
//! RunningWorkload -> Spawning -> Finished            (fixed tree)
//! RunningWorkload -> Spawning -> IdleTerminal -> ... (deep tree)
//! ```
//!
//! Deep-tree nodes stay alive in `IdleTerminal` so an external observer can
//! see the whole tree at once. They leave it on SIGINT/SIGTERM, or after the
//! configured idle timeout.

use std::time::Duration;

use tracing::{debug, info};

use crate::config::{HarnessConfig, Variant};
use crate::coordinator::{FanOut, FanoutPolicy, SpawnCoordinator, Spawner};
use crate::error::Result;
use crate::node::NodeConfig;
use crate::workload::Workload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    RunningWorkload,
    Spawning,
    IdleTerminal,
    Finished,
}

impl NodeState {
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::RunningWorkload, Self::Spawning)
                | (Self::Spawning, Self::IdleTerminal | Self::Finished)
                | (Self::IdleTerminal, Self::Finished)
        )
    }
}

/// Why a node left `IdleTerminal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleExit {
    Signal,
    Timeout,
}

/// Drives one node from startup to termination.
#[derive(Debug)]
pub struct Lifecycle {
    node: NodeConfig,
    config: HarnessConfig,
    state: NodeState,
}

impl Lifecycle {
    pub const fn new(node: NodeConfig, config: HarnessConfig) -> Self {
        Self {
            node,
            config,
            state: NodeState::RunningWorkload,
        }
    }

    pub const fn state(&self) -> NodeState {
        self.state
    }

    pub const fn node(&self) -> &NodeConfig {
        &self.node
    }

    fn transition(&mut self, next: NodeState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {:?} -> {next:?}",
            self.state
        );
        debug!(node = %self.node, from = ?self.state, to = ?next, "State transition");
        self.state = next;
    }

    /// Run the workload, fan out, then idle or finish depending on tree shape.
    ///
    /// Returns the number of children spawned.
    pub async fn run<S: Spawner + ?Sized>(&mut self, spawner: &S) -> Result<usize> {
        if self.config.workload {
            Workload::from_config(&self.config).run(&self.node).await?;
        }

        self.transition(NodeState::Spawning);
        let coordinator = SpawnCoordinator::new(FanoutPolicy::from_config(&self.config));
        let mut fan_out = coordinator.fan_out(&self.node, spawner)?;
        let spawned = fan_out.len();

        if self.config.variant == Variant::Deep {
            self.transition(NodeState::IdleTerminal);
            if idle(self.config.idle_timeout).await? == IdleExit::Signal {
                // children are still idling with their streams open
                self.transition(NodeState::Finished);
                return Ok(spawned);
            }
        }

        finish(&mut fan_out).await;
        self.transition(NodeState::Finished);
        Ok(spawned)
    }
}

async fn finish(fan_out: &mut FanOut) {
    if !fan_out.is_empty() {
        debug!(children = fan_out.len(), "Draining child output");
        fan_out.drain().await;
    }
}

/// Wait until terminated, or until `timeout` when one is set.
pub async fn idle(timeout: Option<Duration>) -> Result<IdleExit> {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    let timeout_future = async {
        match timeout {
            Some(t) => tokio::time::sleep(t).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, leaving idle");
            Ok(IdleExit::Signal)
        }
        _ = sigterm_future => {
            info!("Received SIGTERM, leaving idle");
            Ok(IdleExit::Signal)
        }
        () = timeout_future => {
            debug!(?timeout, "Idle timeout elapsed");
            Ok(IdleExit::Timeout)
        }
    }
}
