use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Guards the global tracing subscriber; dropping it flushes pending events.
pub struct LogGuard {}

pub fn init(debug: bool) -> Result<LogGuard, String> {
    let filter = if debug {
        EnvFilter::new("trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let subscriber = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(filter);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|_| "failed to install global tracing subscriber".to_string())?;
    Ok(LogGuard {})
}
