//! Tracing/logging setup shared by the orchestrator binaries.

/// Initialize process-wide observability (tracing/logging).
///
/// The format comes from `FQDECOMP_LOG_FORMAT` (`json`, the default, or `pretty`).
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    let format = std::env::var("FQDECOMP_LOG_FORMAT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    tracing::init(format);
}

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use tracing::LogFormat;
