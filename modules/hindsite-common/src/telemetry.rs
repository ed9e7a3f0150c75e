use tracing_subscriber::EnvFilter;

/// Initialize tracing for a binary. Respects RUST_LOG; defaults to info for
/// our crates and warn elsewhere. JSON output when LOG_FORMAT=json.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v == "json");
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
