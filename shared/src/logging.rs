use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Lambda logs already carry timestamps, so
/// the formatter omits them along with ANSI colors. Repeated calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .without_time()
        .with_target(false)
        .try_init();
}
