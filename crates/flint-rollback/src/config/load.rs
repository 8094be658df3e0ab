use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::merge::{apply_overrides_from, merge_layers};
use super::{Config, ConfigLayer};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub fn config_path() -> PathBuf {
    crate::paths::config_path()
}

pub fn load_user_config(path: &Path) -> Result<Option<ConfigLayer>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

/// A loaded config plus the problems met while loading it, for callers that
/// install logging only after the config is known.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    pub fn emit_warnings(&self) {
        for warning in &self.warnings {
            tracing::warn!("{warning}");
        }
    }
}

pub fn load() -> Result<Config, ConfigError> {
    load_from(&config_path())
}

pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let loaded = load_layers(path)?;
    loaded.emit_warnings();
    Ok(loaded.config)
}

fn load_layers(path: &Path) -> Result<LoadedConfig, ConfigError> {
    let user = load_user_config(path)?;
    let mut config = merge_layers(user);
    let warnings = apply_overrides_from(&mut config, env_var);
    Ok(LoadedConfig { config, warnings })
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Loads the user config, writing the defaults first if none exists.
/// Failures fall back to defaults.
pub fn load_or_init() -> Config {
    let loaded = load_or_init_deferred();
    loaded.emit_warnings();
    loaded.config
}

/// Like [`load_or_init`], but hands warnings back instead of logging them.
pub fn load_or_init_deferred() -> LoadedConfig {
    load_or_init_at(&config_path())
}

pub(crate) fn load_or_init_at(path: &Path) -> LoadedConfig {
    let had_user_config = path.exists();

    let mut loaded = match load_layers(path) {
        Ok(loaded) => loaded,
        Err(e) => {
            let mut config = Config::default();
            let mut warnings = vec![format!("config load failed, using defaults: {e}")];
            warnings.extend(apply_overrides_from(&mut config, env_var));
            LoadedConfig { config, warnings }
        }
    };

    if !had_user_config && let Err(e) = write_config(path, &Config::default()) {
        loaded
            .warnings
            .push(format!("failed to write default config: {e}"));
    }

    loaded
}

pub fn write_config(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    fs::create_dir_all(dir).map_err(write_err)?;
    let contents = toml::to_string_pretty(cfg)?;
    let temp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    fs::write(temp.path(), contents.as_bytes()).map_err(write_err)?;
    temp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}
