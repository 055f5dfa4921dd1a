/// Tracing subscriber setup

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

/// Build the log filter: `RUST_LOG` when set, otherwise `level`
pub fn log_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).with_context(|| format!("Invalid log level: {}", level))
}

/// Install the global subscriber, writing to stderr so stdout stays clean
/// for `collect` output
pub fn init_tracing(level: &str, json: bool) -> Result<()> {
    let filter = log_filter(level)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = if json {
        builder.json().flatten_event(true).try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|err| anyhow!("Failed to install tracing subscriber: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_accepts_directives() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert!(log_filter("debug").is_ok());
        assert!(log_filter("info,edgebeat=trace").is_ok());
        assert!(log_filter("edgebeat=loud").is_err());
    }
}
