//! Isochrone Viewer - Application Library
//!
//! Desktop map client built on `isochrone-lib`: click to add walking-time
//! areas, intersect the first two and count the trees inside the overlap.

mod app;
mod async_runtime;
mod cli;
pub mod logging;

pub use app::IsochroneViewerApp;
pub use app::settings::Settings;

use app::state::Services;
use std::process::ExitCode;

const APP_NAME: &str = "Isochrone Viewer";

/// Native entry point: connect the services, then run the event loop
///
/// The service description is fetched before the window opens; any failure
/// there is fatal and yields a non-zero exit code.
pub fn run_native() -> ExitCode {
    logging::setup_logging();
    let settings = Settings::from_cli();

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to start the async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let services = match rt.block_on(Services::connect(&settings)) {
        Ok(services) => services,
        Err(e) => {
            tracing::error!("Startup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // UI callbacks spawn onto this runtime
    let _guard = rt.enter();

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 720.0])
            .with_title(APP_NAME),
        ..Default::default()
    };

    let result = eframe::run_native(
        APP_NAME,
        native_options,
        Box::new(move |cc| Ok(Box::new(IsochroneViewerApp::new(cc, &settings, services)))),
    );

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Event loop failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
