//! Tracing setup for hosts and tests.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! the host's choice. [`init_tracing`] is a convenience for binaries and tests.

use tracing_subscriber::EnvFilter;

/// Filter directives are read from this variable, e.g. `PREP_CACHE_LOG=prep_cache=debug`.
pub const LOG_ENV: &str = "PREP_CACHE_LOG";

/// Install a fmt subscriber filtered by [`LOG_ENV`] (default `info`).
///
/// Returns `false` when a global subscriber was already installed, which
/// makes repeated calls harmless.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        init_tracing();
        assert!(!init_tracing());
    }
}
