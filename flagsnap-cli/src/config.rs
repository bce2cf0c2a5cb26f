use std::env;

use flagsnap_lib::{FeatureDeclaration, FeatureRegistry, RegistryError};
use serde::Deserialize;

/// Top-level fsnap.toml configuration
#[derive(Debug, Deserialize)]
pub struct FsnapConfig {
    #[serde(default = "default_snapshot")]
    pub snapshot: String,
    #[serde(default = "default_tests")]
    pub tests: String,
    #[serde(default)]
    pub features: Vec<FeatureDeclaration>,
}

fn default_snapshot() -> String {
    "flags.json".to_string()
}

fn default_tests() -> String {
    "flags.tests".to_string()
}

impl Default for FsnapConfig {
    fn default() -> Self {
        Self {
            snapshot: default_snapshot(),
            tests: default_tests(),
            features: Vec::new(),
        }
    }
}

impl FsnapConfig {
    /// Load configuration from a TOML file. A missing file yields defaults, a
    /// file that fails to parse yields defaults and a warning.
    pub fn load(path: &str) -> Self {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: failed to parse {}: {}", path, e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        };
        config.apply_overrides(|name| env::var(name).ok());
        config
    }

    /// Apply `FSNAP_SNAPSHOT` / `FSNAP_TESTS` style overrides from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("FSNAP_SNAPSHOT").filter(|v| !v.is_empty()) {
            self.snapshot = val;
        }
        if let Some(val) = lookup("FSNAP_TESTS").filter(|v| !v.is_empty()) {
            self.tests = val;
        }
    }

    pub fn feature_registry(&self) -> Result<FeatureRegistry, RegistryError> {
        FeatureRegistry::from_declarations(&self.features)
    }
}

#[cfg(test)]
mod tests {
    use flagsnap_lib::{DeclaredType, FeatureId, FieldType};

    use super::*;

    const SAMPLE: &str = r#"
snapshot = "config/flags.json"

[[features]]
key = "feature::global::darkMode"
type = "boolean"

[[features]]
key = "feature::global::theme"
type = "enum"
class = "Theme"
variants = ["LIGHT", "DARK"]

[[features]]
key = "feature::global::retry"
type = "record"
class = "RetryPolicy"
fields = { attempts = "integer", backoff = "double" }
"#;

    #[test]
    fn test_parse_sample() {
        let config: FsnapConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.snapshot, "config/flags.json");
        assert_eq!(config.tests, "flags.tests");

        let features = config.feature_registry().unwrap();
        assert_eq!(features.len(), 3);
        let retry: FeatureId = "feature::global::retry".parse().unwrap();
        assert_eq!(
            features.declared_type(&retry),
            Some(&DeclaredType::record(
                "RetryPolicy",
                [("attempts", FieldType::Integer), ("backoff", FieldType::Double)]
            ))
        );
    }

    #[test]
    fn test_env_overrides() {
        let mut config = FsnapConfig::default();
        config.apply_overrides(|name| match name {
            "FSNAP_SNAPSHOT" => Some("remote.json".to_string()),
            "FSNAP_TESTS" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.snapshot, "remote.json");
        assert_eq!(config.tests, "flags.tests");
    }

    #[test]
    fn test_enum_without_variants_is_rejected() {
        let config: FsnapConfig = toml::from_str(
            r#"
[[features]]
key = "feature::global::theme"
type = "enum"
class = "Theme"
"#,
        )
        .unwrap();
        assert!(matches!(
            config.feature_registry(),
            Err(RegistryError::InvalidDeclaration { .. })
        ));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = FsnapConfig::load("does-not-exist/fsnap.toml");
        assert!(config.features.is_empty());
    }
}
