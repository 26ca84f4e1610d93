//! Structured logging setup.
//!
//! Log lines go to stderr so they never mix with the status lines and diffs
//! the reporter writes to stdout. `RUST_LOG` takes precedence over the
//! verbosity-derived default.

use tracing_subscriber::EnvFilter;

/// Default filter directive for a `-v` count.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "snapbook=warn",
        1 => "snapbook=info",
        2 => "snapbook=debug",
        _ => "snapbook=trace",
    }
}

/// Installs the global subscriber. Calling it again is a no-op.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(default_directive(0), "snapbook=warn");
        assert_eq!(default_directive(2), "snapbook=debug");
        assert_eq!(default_directive(9), "snapbook=trace");
    }

    #[test]
    fn init_twice_is_harmless() {
        init(0);
        init(3);
    }
}
