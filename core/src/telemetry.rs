// Tracing setup shared by hosts embedding the messaging core
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize a tracing subscriber with an env-driven filter.
///
/// Filter comes from `RUST_LOG` and falls back to `info`. Safe to call more than
/// once: if a global subscriber is already installed the call is a no-op and
/// returns `false`.
///
/// # Example
///
/// ```no_run
/// courier_core::telemetry::init();
/// tracing::info!("messaging ready");
/// ```
pub fn init() -> bool {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .try_init()
        .is_ok();

    if installed {
        info!(target: "telemetry", "Tracing initialized");
    }
    installed
}
