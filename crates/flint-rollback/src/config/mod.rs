//! Config loading and persistence.

mod load;
mod merge;
mod schema;

pub use load::{
    ConfigError, LoadedConfig, config_path, load, load_from, load_or_init, load_or_init_deferred,
    load_user_config, write_config,
};
pub use merge::{apply_env_overrides, apply_overrides_from, merge_layers};
pub use schema::{
    Config, ConfigLayer, FileLoggingConfig, FileLoggingConfigOverride, LogFormat, LogRotation,
    LoggingConfig, LoggingConfigOverride, PathsConfig, StoreConfig, StoreConfigOverride,
};
