use serde::{Deserialize, Serialize};

use crate::settings::Settings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub mode: RunMode,
    /// Database file; defaults to `~/.fotopipe/data/fotopipe.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    /// Root folder scanned for projects in standalone mode.
    #[serde(default)]
    pub project_root: Option<String>,
    #[serde(default)]
    pub engine: EngineConfig,
    /// Standalone-mode settings overrides; `None` means the built-in
    /// defaults. Ignored in db mode, where each job carries its own group.
    #[serde(default)]
    pub settings: Option<Settings>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            mode: RunMode::default(),
            database_path: None,
            project_root: None,
            engine: EngineConfig::default(),
            settings: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Drain the database-backed job queue, then exit.
    #[default]
    Db,
    /// Discover projects under `project_root` and process each with the
    /// built-in default settings.
    Standalone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Deterministic in-process engine (tests, demos, dry runs).
    #[default]
    Sim,
    /// External headless engine runner spoken to over stdio.
    Remote,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub kind: EngineKind,
    /// Command to launch the engine runner (remote kind only).
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}
