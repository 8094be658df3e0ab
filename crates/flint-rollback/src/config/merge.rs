use std::path::PathBuf;

use crate::store::StoreDurability;

use super::{Config, ConfigLayer};

pub fn merge_layers(layers: impl IntoIterator<Item = ConfigLayer>) -> Config {
    let mut config = Config::default();
    for layer in layers {
        layer.apply_to(&mut config);
    }
    config
}

pub fn apply_env_overrides(config: &mut Config) {
    for warning in apply_overrides_from(config, |key| std::env::var(key).ok()) {
        tracing::warn!("{warning}");
    }
}

/// Applies `FLINT_*` overrides read through `lookup`. Invalid values are
/// ignored; one message per ignored value is returned.
pub fn apply_overrides_from(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Vec<String> {
    let mut warnings = Vec::new();
    let get = |key: &str| {
        lookup(key)
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
    };

    if let Some(dir) = get("FLINT_DATA_DIR") {
        config.paths.data_dir = Some(PathBuf::from(dir));
    }

    if let Some(raw) = get("FLINT_STORE_DURABILITY") {
        match StoreDurability::parse(&raw) {
            Some(durability) => config.store.durability = durability,
            None => warnings.push(format!("invalid FLINT_STORE_DURABILITY `{raw}`, ignoring")),
        }
    }

    if let Some(raw) = get("FLINT_SCAN_PAGE_SIZE") {
        match raw.parse::<usize>() {
            Ok(0) => warnings.push("FLINT_SCAN_PAGE_SIZE must be positive, ignoring".into()),
            Ok(size) => config.store.scan_page_size = size,
            Err(err) => warnings.push(format!("invalid FLINT_SCAN_PAGE_SIZE, ignoring: {err}")),
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::config::{LogFormat, StoreConfigOverride};

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn merge_layers_respects_precedence() {
        let mut first = ConfigLayer::default();
        first.store.scan_page_size = Some(64);
        first.logging.stdout_format = Some(LogFormat::Json);

        let second = ConfigLayer {
            store: StoreConfigOverride {
                scan_page_size: Some(128),
                ..StoreConfigOverride::default()
            },
            ..ConfigLayer::default()
        };

        let config = merge_layers([first, second]);
        assert_eq!(config.store.scan_page_size, 128);
        assert_eq!(config.logging.stdout_format, LogFormat::Json);
        assert_eq!(config.store.durability, StoreDurability::Cache);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        let warnings = apply_overrides_from(
            &mut config,
            env(&[
                ("FLINT_DATA_DIR", "/srv/flint"),
                ("FLINT_STORE_DURABILITY", "durable"),
                ("FLINT_SCAN_PAGE_SIZE", "32"),
            ]),
        );
        assert_eq!(config.paths.data_dir, Some(PathBuf::from("/srv/flint")));
        assert_eq!(config.store.durability, StoreDurability::Durable);
        assert_eq!(config.store.scan_page_size, 32);
        assert!(warnings.is_empty());
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut config = Config::default();
        let warnings = apply_overrides_from(
            &mut config,
            env(&[
                ("FLINT_DATA_DIR", "   "),
                ("FLINT_STORE_DURABILITY", "paranoid"),
                ("FLINT_SCAN_PAGE_SIZE", "0"),
            ]),
        );
        let defaults = Config::default();
        assert_eq!(config.paths, defaults.paths);
        assert_eq!(config.store, defaults.store);
        assert_eq!(warnings.len(), 2, "{warnings:?}");
    }
}
