//! Tracing and logging (shared setup for every jobrelay binary).

pub use self::tracing::LogFormat;

/// Initialize process-wide tracing/logging, format taken from `LOG_FORMAT`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(LogFormat::from_env());
}

/// Tracing configuration (filters, output format).
pub mod tracing;
