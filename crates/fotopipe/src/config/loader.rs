use std::path::Path;

use crate::config::schema::{Config, EngineKind, RunMode};
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.mode == RunMode::Standalone && config.project_root.is_none() {
        return Err(ConfigError::Validation {
            message: "standalone mode requires project_root".to_string(),
        });
    }

    if config.engine.kind == EngineKind::Remote && config.engine.command.is_none() {
        return Err(ConfigError::Validation {
            message: "remote engine requires engine.command".to_string(),
        });
    }

    if let Some(ref settings) = config.settings {
        settings.validate().map_err(|e| ConfigError::Validation {
            message: e.to_string(),
        })?;
    }

    Ok(())
}
