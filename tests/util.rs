#![allow(dead_code)]

/// Initializes a `tracing` subscriber that writes to the test harness, using
/// `RUST_LOG` if it is set.
pub fn trace_init() {
    use tracing_subscriber::filter::{EnvFilter, LevelFilter};
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
