//! Tracing setup shared by the service binaries

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber.
///
/// `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.as_str().to_lowercase()));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
