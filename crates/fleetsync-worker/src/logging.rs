//! Log subscriber setup.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Parse a configured level, falling back to `info`.
pub fn parse_level(level: &str) -> LevelFilter {
    level.trim().parse().unwrap_or(LevelFilter::INFO)
}

/// Filter from `RUST_LOG` when set, else the configured level.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(parse_level(level).into())
        .from_env_lossy()
}

/// Install the global fmt subscriber. Later calls are no-ops.
pub fn init(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(false)
        .try_init();
}
