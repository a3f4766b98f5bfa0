use std::sync::OnceLock;

/// Ensure tracing is initialized only once across the application.
static TRACING: OnceLock<()> = OnceLock::new();

/// Initialize tracing once, safe to call multiple times. `RUST_LOG` drives
/// the filter (default `info`); `MG_LOG_FORMAT=json` switches to JSON
/// output.
pub fn init_tracing_once() {
    TRACING.get_or_init(|| {
        let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
        let json = std::env::var("MG_LOG_FORMAT")
            .map(|v| v == "json")
            .unwrap_or(false);
        let builder = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
            .with_target(true);
        let _ = if json {
            builder.json().try_init()
        } else {
            builder.compact().try_init()
        };
    });
}
