//! Logging setup: a `tracing_subscriber::fmt` subscriber honoring `RUST_LOG`,
//! with `info` as the default filter when the variable is unset. No
//! OpenTelemetry export — the runtime's tracing spans (one per agent turn,
//! per tool call) are consumed locally by this formatter only.
pub fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}
