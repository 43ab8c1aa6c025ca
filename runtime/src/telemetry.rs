use tracing_subscriber::EnvFilter;

/// Install a stdout `tracing` subscriber filtered by `RUST_LOG`.
///
/// Falls back to `info,workflow_runtime=debug`. Safe to call more than once;
/// only the first call installs anything.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,workflow_runtime=debug"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
