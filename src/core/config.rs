//! Application configuration management

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Backend connection settings
    pub backend: BackendConfig,
    /// UI settings
    pub ui: UiConfig,
    /// Email used for the last successful sign-in
    pub last_email: Option<String>,
}

/// Which backend implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// In-process database, optionally snapshotted to the data directory
    #[default]
    Memory,
    /// Hosted Supabase project
    Supabase,
}

/// Backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Project URL, e.g. `https://xyz.supabase.co`
    pub supabase_url: Option<String>,
    /// Public anon key of the project
    pub supabase_anon_key: Option<String>,
    /// Changefeed polling interval in seconds (0 = only local changes)
    pub poll_interval_secs: u64,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Keep the in-process database in a snapshot file between runs
    pub local_snapshot: bool,
}

/// UI settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    /// Theme (light/dark)
    pub theme: String,
    pub window_width: f32,
    pub window_height: f32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Memory,
            supabase_url: None,
            supabase_anon_key: None,
            poll_interval_secs: 5,
            request_timeout_secs: 15,
            local_snapshot: true,
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            theme: "dark".to_string(),
            window_width: 1100.0,
            window_height: 760.0,
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "cosmic-docs", "CosmicDocs")
}

/// Directory for local data such as the persisted session
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

impl AppConfig {
    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Self::load_from(&path)
    }

    /// Load configuration from a specific file, defaulting when it is missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure config directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::info!("Saved config to: {}", path.display());
        Ok(())
    }

    /// Apply `COSMIC_DOCS_*` environment overrides
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`; values set there win over the file
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("COSMIC_DOCS_SUPABASE_URL") {
            self.backend.supabase_url = Some(url);
            self.backend.kind = BackendKind::Supabase;
        }
        if let Some(key) = lookup("COSMIC_DOCS_SUPABASE_ANON_KEY") {
            self.backend.supabase_anon_key = Some(key);
        }
        match lookup("COSMIC_DOCS_BACKEND").as_deref() {
            Some("memory") => self.backend.kind = BackendKind::Memory,
            Some("supabase") => self.backend.kind = BackendKind::Supabase,
            Some(other) => tracing::warn!("Ignoring unknown COSMIC_DOCS_BACKEND value: {}", other),
            None => {}
        }
    }
}
