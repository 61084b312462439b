//! Log-level initialization helper for binaries embedding this crate
//! ([SPEC_FULL] Section 1.1, Section 6). This crate itself never installs a
//! `tracing` subscriber; it only emits `tracing` events at module
//! boundaries. Call [`init_from_env`] (or build an `EnvFilter` some other
//! way) from a binary's `main`.

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Name of the environment variable reference implementations use to pick a
/// default log verbosity ([SPEC_FULL] Section 6).
pub const BUMBLE_LOGLEVEL: &str = "BUMBLE_LOGLEVEL";

/// Builds an [`EnvFilter`] from `BUMBLE_LOGLEVEL`, falling back to `info`
/// when unset or unparseable. Accepts either a bare level name (`"debug"`)
/// or a full `tracing_subscriber` directive string (`"fathom=trace,warn"`).
#[must_use]
pub fn env_filter() -> EnvFilter {
    match std::env::var(BUMBLE_LOGLEVEL) {
        Ok(v) if !v.is_empty() => {
            EnvFilter::try_new(&v).unwrap_or_else(|_| EnvFilter::new(LevelFilter::INFO.to_string()))
        }
        _ => EnvFilter::new(LevelFilter::INFO.to_string()),
    }
}

/// Installs a global `tracing` subscriber from [`env_filter`]. Intended for
/// standalone binaries and integration tests, not for this library itself —
/// a crate that installs its own global subscriber breaks embedders who want
/// to pick their own. Returns `Err` if a subscriber is already installed.
pub fn init_from_env() -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .finish();
    tracing::subscriber::set_global_default(subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_env_var_defaults_to_info() {
        std::env::remove_var(BUMBLE_LOGLEVEL);
        assert_eq!(env_filter().to_string(), "info");
    }

    #[test]
    fn env_var_directive_is_honored() {
        std::env::set_var(BUMBLE_LOGLEVEL, "debug");
        assert_eq!(env_filter().to_string(), "debug");
        std::env::remove_var(BUMBLE_LOGLEVEL);
    }
}
