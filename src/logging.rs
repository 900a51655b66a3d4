//! Log setup shared by the binaries. The library only emits `tracing`
//! events; embedders install whatever subscriber they like.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable holding the log filter, e.g. `chevron=trace`.
pub const LOG_ENV: &str = "CHEVRON_LOG";

/// Installs a stderr subscriber filtered by [`LOG_ENV`] (default `warn`).
/// Does nothing if a global subscriber is already set.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}
