#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")] // hide console window on Windows in release

fn main() -> std::process::ExitCode {
    isochrone_viewer::run_native()
}
