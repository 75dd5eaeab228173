//! Optional log output for binaries and examples that embed dog-media.

use tracing_subscriber::{fmt, EnvFilter};

/// Default filter when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "info,dog_media=debug";

/// Install a global fmt subscriber honouring `RUST_LOG`.
///
/// Returns false if a subscriber was already installed.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    fmt().with_env_filter(filter).with_target(true).try_init().is_ok()
}

/// Same as [`init_tracing`] but emitting one JSON object per line
pub fn init_json_tracing() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    fmt().json().with_env_filter(filter).try_init().is_ok()
}
