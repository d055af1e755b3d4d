//! Logging setup shared by the binaries.

use tracing_subscriber::EnvFilter;

/// Initialize stderr logging.
///
/// `RUST_LOG` wins when set. Otherwise `debug` enables the timestamped step
/// log for the mdv crates and everything else stays at `warn`.
pub fn init_logging(debug: bool) {
    let default_filter = if debug {
        "warn,mdv_install=debug,mdv_cli=debug"
    } else {
        "warn"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // A subscriber may already be installed (tests); keep it.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(debug)
        .try_init();
}
