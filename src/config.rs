//! Configuration for chatflow.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CHATFLOW_HOME, OPENROUTER_API_KEY, CHATFLOW_MODEL)
//! 2. Config file (.chatflow/config.yaml)
//! 3. Defaults (~/.chatflow)
//!
//! Config file discovery:
//! - Searches current directory and parents for .chatflow/config.yaml
//! - Relative paths in the config file are resolved against the .chatflow/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::ModelSettings;
use crate::conversation::ConversationSettings;
use crate::core::WorkflowSettings;
use crate::guardrails::GuardrailLimits;
use crate::retrieval::RetrievalSettings;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".chatflow";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub guardrails: GuardrailLimits,
    #[serde(default)]
    pub retrieval: RetrievalSettings,
    #[serde(default)]
    pub conversation: ConversationSettings,
    #[serde(default)]
    pub workflow: WorkflowSettings,
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .chatflow/)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,
    /// SQLite file (relative to .chatflow/)
    pub database: Option<String>,
}

fn default_telemetry_enabled() -> bool {
    true
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            database: None,
        }
    }
}

/// Resolved telemetry settings
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySettings {
    pub enabled: bool,
    pub database: PathBuf,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// State directory
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub guardrails: GuardrailLimits,
    pub retrieval: RetrievalSettings,
    pub conversation: ConversationSettings,
    pub workflow: WorkflowSettings,
    pub model: ModelSettings,
    pub telemetry: TelemetrySettings,
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Build the resolved config from an optional file and an env lookup
fn resolve(
    config_file: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig> {
    let file = match &config_file {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };
    let config_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(Path::new("."));

    let home = if let Some(env_home) = env("CHATFLOW_HOME") {
        PathBuf::from(env_home)
    } else if let (Some(home_path), Some(_)) = (&file.paths.home, &config_file) {
        resolve_path(config_dir, home_path)
    } else {
        dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(CONFIG_DIR)
    };

    let database = match (&file.telemetry.database, &config_file) {
        (Some(db), Some(_)) => resolve_path(config_dir, db),
        (Some(db), None) => PathBuf::from(db),
        (None, _) => home.join("telemetry.db"),
    };

    let mut model = file.model;
    if let Some(key) = env("OPENROUTER_API_KEY").filter(|k| !k.trim().is_empty()) {
        model.api_key = Some(key);
    }
    if let Some(name) = env("CHATFLOW_MODEL").filter(|m| !m.trim().is_empty()) {
        model.model = name;
    }

    Ok(ResolvedConfig {
        home,
        config_file,
        guardrails: file.guardrails,
        retrieval: file.retrieval,
        conversation: file.conversation,
        workflow: file.workflow,
        model,
        telemetry: TelemetrySettings {
            enabled: file.telemetry.enabled,
            database,
        },
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    resolve(find_config_file(), |key| std::env::var(key).ok())
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}
