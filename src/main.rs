// Prevents additional console window on Windows in release
#![cfg_attr(
    all(not(debug_assertions), target_os = "windows"),
    windows_subsystem = "windows"
)]

use termlink::config::{get_config_dir, AppSettings};
use termlink::create_app;

fn main() {
    let filter = get_config_dir()
        .and_then(|dir| AppSettings::load(&dir))
        .map(|settings| settings.logging.filter)
        .unwrap_or_else(|_| AppSettings::default().logging.filter);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .init();

    create_app()
        .run(tauri::generate_context!())
        .expect("error while running termlink");
}
