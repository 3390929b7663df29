//! Tracing/logging initialization.
//!
//! Log lines go to stderr so the per-node status lines on stdout stay
//! readable when the whole tree's output is aggregated at the root.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Filter from `RUST_LOG`, or `default_filter` when it is unset or unparsable.
pub fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Install the global subscriber for this node.
///
/// Children inherit the parent's environment, so one `RUST_LOG` applies to
/// the whole tree. `log_json` switches every node to JSON lines.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(env_filter(default_filter));
    if log_json {
        registry.with(stderr.json()).init();
    } else {
        registry.with(stderr).init();
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_applies_without_rust_log() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let filter = env_filter("spawntree_core=debug");
        assert_eq!(filter.to_string(), "spawntree_core=debug");
    }
}
