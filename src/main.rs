//! Cosmic Docs - a small document manager on top of a hosted database
//!
//! Signed-in users keep a list of titled text documents that stays in sync
//! with the backend through its change feed.

mod app;
mod backend;
mod core;
mod ui;

use anyhow::Result;
use app::CosmicDocsApp;
use eframe::egui;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::core::config::AppConfig;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::filter::LevelFilter::INFO)
        .init();

    tracing::info!("Starting Cosmic Docs...");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });
    config.apply_env();

    let backend = backend::connect(&config.backend)?;

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([config.ui.window_width, config.ui.window_height])
            .with_min_inner_size([640.0, 480.0])
            .with_title("Cosmic Docs"),
        ..Default::default()
    };

    eframe::run_native(
        "Cosmic Docs",
        native_options,
        Box::new(move |cc| {
            let app = CosmicDocsApp::new(cc, backend, config)?;
            Ok(Box::new(app))
        }),
    )
    .map_err(|e| anyhow::anyhow!("Window closed with an error: {}", e))
}
