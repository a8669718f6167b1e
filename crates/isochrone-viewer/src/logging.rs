/*!
Logging integration for the viewer.

Installs a `tracing-subscriber` fmt layer filtered by `RUST_LOG`. When the
`profiling` feature is enabled, `profiling::scope!` markers in both crates are
emitted as tracing spans and show up in the same output.
*/

use tracing_subscriber::prelude::*;

/// Initialize logging with sensible defaults.
///
/// If RUST_LOG is not set, a default is chosen based on the build type.
pub fn setup_logging() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::fmt;

    if std::env::var("RUST_LOG").is_err() {
        // Safety: single-threaded at startup
        unsafe {
            if cfg!(debug_assertions) {
                std::env::set_var(
                    "RUST_LOG",
                    "debug,eframe::native=warn,hyper_util=info,walkers=info,egui::context=warn,reqwest::connect=info,rustls=info",
                );
            } else {
                std::env::set_var("RUST_LOG", "info,eframe=warn,walkers=warn");
            }
        }
    }

    let fmt_layer = fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(fmt_layer).init();

    tracing::info!(
        "Logging initialized ({} {}, profiling {})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        if cfg!(feature = "profiling") {
            "enabled"
        } else {
            "disabled"
        }
    );
}
