// src/utils/logging.rs
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_DIRECTIVES: &str = "info";
// Keeps dependency noise (reqwest, hyper) at info while our own spans go to debug
const DEBUG_DIRECTIVES: &str = "info,register_extractor=debug";

/// Picks the filter: an explicit `RUST_LOG` always wins, otherwise `--debug` turns on
/// this crate's debug events.
fn filter_directives(rust_log: Option<&str>, debug: bool) -> &str {
    match rust_log.map(str::trim).filter(|s| !s.is_empty()) {
        Some(directives) => directives,
        None if debug => DEBUG_DIRECTIVES,
        None => DEFAULT_DIRECTIVES,
    }
}

/// Installs the global subscriber. Logs go to stderr so the JSON run summary owns stdout.
pub fn setup_logging(debug: bool) {
    let rust_log = std::env::var("RUST_LOG").ok();
    let directives = filter_directives(rust_log.as_deref(), debug);
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|e| {
        eprintln!("Ignoring invalid RUST_LOG '{}': {}", directives, e);
        EnvFilter::new(DEFAULT_DIRECTIVES)
    });

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(debug)
        .init();

    tracing::debug!("Logging to stderr with filter '{}'", directives);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_log_wins_over_debug_flag() {
        assert_eq!(filter_directives(Some("warn"), true), "warn");
        assert_eq!(filter_directives(Some("  "), false), DEFAULT_DIRECTIVES);
    }

    #[test]
    fn test_debug_flag_raises_own_level() {
        assert_eq!(filter_directives(None, false), "info");
        assert_eq!(filter_directives(None, true), "info,register_extractor=debug");
        assert!(EnvFilter::try_new(DEBUG_DIRECTIVES).is_ok());
    }
}
