//! Diagnostic logging setup.
//!
//! Output goes to stderr so stdout carries only command results.

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Environment variable read before `RUST_LOG`.
pub const LOG_ENV: &str = "OMNIQC_LOG";

/// Filter directives: `OMNIQC_LOG`, then `RUST_LOG`, then a default that
/// depends on `verbose`.
pub fn filter_directives(verbose: bool, lookup: impl Fn(&str) -> Option<String>) -> String {
    lookup(LOG_ENV)
        .or_else(|| lookup("RUST_LOG"))
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| {
            if verbose {
                "omniqc=debug,info".to_string()
            } else {
                "info".to_string()
            }
        })
}

/// Install the global subscriber. Call once, before any work.
pub fn init(verbose: bool, json: bool) -> Result<()> {
    let directives = filter_directives(verbose, |key| std::env::var(key).ok());
    let filter = EnvFilter::try_new(&directives)
        .map_err(|e| anyhow!("Invalid log filter {:?}: {}", directives, e))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };
    result.map_err(|e| anyhow!("Failed to install log subscriber: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_omniqc_log_wins() {
        let lookup = |key: &str| match key {
            "OMNIQC_LOG" => Some("trace".to_string()),
            "RUST_LOG" => Some("error".to_string()),
            _ => None,
        };
        assert_eq!(filter_directives(false, lookup), "trace");
    }

    #[test]
    fn test_rust_log_fallback() {
        let lookup = |key: &str| (key == "RUST_LOG").then(|| "omniqc=info".to_string());
        assert_eq!(filter_directives(true, lookup), "omniqc=info");
    }

    #[test]
    fn test_verbose_default() {
        assert_eq!(filter_directives(true, |_| None), "omniqc=debug,info");
        assert_eq!(filter_directives(false, |_| None), "info");
    }
}
