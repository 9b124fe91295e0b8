//! Configuration file loader.
//!
//! Reads the engine TOML, merges the rule files listed in `waf.include`
//! and runs the registered validators before anything is compiled.

use super::error::{ConfigError, ConfigResult};
use super::types::EngineConfig;
use super::validation::{BasicValidator, RuleCompileValidator, ValidationSeverity, Validator};
use crate::modules::waf::{RuleFile, WafError, WafHandler};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const STRING_ORIGIN: &str = "<string>";

/// Loads, merges and validates engine configuration.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    validators: Vec<Box<dyn Validator>>,
}

impl ConfigLoader {
    /// Create a loader without validators.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a loader running the structural checks and a strict rule
    /// compile pass.
    #[must_use]
    pub fn with_default_validators() -> Self {
        Self::new()
            .with_validator(BasicValidator::new())
            .with_validator(RuleCompileValidator::new())
    }

    /// Add a validator to the loader.
    #[must_use]
    pub fn with_validator<V: Validator + 'static>(mut self, validator: V) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    /// Load configuration from a file.
    ///
    /// Relative `waf.include` entries resolve against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or an included rule file is missing or
    /// unreadable, if any TOML is malformed, or if validation fails.
    pub fn load<P: AsRef<Path>>(&self, path: P) -> ConfigResult<EngineConfig> {
        let path = path.as_ref();
        let content = read(path)?;
        debug!(path = %path.display(), "Loading configuration");

        let mut config: EngineConfig = toml::from_str(&content)
            .map_err(|e| ConfigError::parse(path.display().to_string(), e))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        merge_includes(&mut config, base)?;
        self.validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    ///
    /// Relative `waf.include` entries resolve against the working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed, an included rule file
    /// cannot be loaded, or validation fails.
    pub fn load_str(&self, content: &str) -> ConfigResult<EngineConfig> {
        let mut config: EngineConfig =
            toml::from_str(content).map_err(|e| ConfigError::parse(STRING_ORIGIN, e))?;
        merge_includes(&mut config, Path::new("."))?;
        self.validate(&config)?;
        Ok(config)
    }

    /// Load configuration or fall back to defaults when the file is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be loaded.
    pub fn load_or_default<P: AsRef<Path>>(&self, path: P) -> ConfigResult<EngineConfig> {
        let path = path.as_ref();
        if path.exists() {
            self.load(path)
        } else {
            debug!(path = %path.display(), "No configuration file, using defaults");
            Ok(EngineConfig::default())
        }
    }

    /// Load a file and build a ready handler from it.
    ///
    /// Rules that fail to compile are returned next to the handler; run a
    /// [`RuleCompileValidator`] to reject them up front instead.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`ConfigLoader::load`].
    pub fn load_handler<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> ConfigResult<(WafHandler, Vec<WafError>)> {
        let config = self.load(path)?;
        Ok(WafHandler::from_config(&config))
    }

    /// Write configuration as TOML.
    ///
    /// Included rules were merged on load, so they are written inline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn save<P: AsRef<Path>>(&self, config: &EngineConfig, path: P) -> ConfigResult<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(config)?;
        fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    fn validate(&self, config: &EngineConfig) -> ConfigResult<()> {
        let mut errors = Vec::new();
        for validator in &self.validators {
            let result = validator.validate(config);
            for issue in result.issues() {
                match issue.severity {
                    ValidationSeverity::Warning => {
                        warn!(field = %issue.field, "{}", issue.message);
                    },
                    ValidationSeverity::Error => {
                        errors.push(format!("{}: {}", issue.field, issue.message));
                    },
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

fn read(path: &Path) -> ConfigResult<String> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Files named by one include entry: the file itself, or the `*.toml`
/// files of a directory in name order.
fn include_files(path: &Path) -> ConfigResult<Vec<PathBuf>> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let entries = fs::read_dir(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file = entry.path();
        if file.is_file() && file.extension().is_some_and(|ext| ext == "toml") {
            files.push(file);
        }
    }
    files.sort();
    Ok(files)
}

fn merge_includes(config: &mut EngineConfig, base: &Path) -> ConfigResult<()> {
    for entry in std::mem::take(&mut config.waf.include) {
        for file in include_files(&base.join(entry))? {
            let content = read(&file)?;
            let rules: RuleFile = toml::from_str(&content)
                .map_err(|e| ConfigError::parse(file.display().to_string(), e))?;
            info!(
                path = %file.display(),
                rules = rules.rules.len(),
                exceptions = rules.exceptions.len(),
                "Included rule file"
            );
            config.waf.merge(rules);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::waf::RuleConfig;
    use tempfile::tempdir;

    const RULES_A: &str = r#"
        [[rules]]
        id = 10
        variables = ["ARGS"]
        operator = "@contains a"
    "#;

    const RULES_B: &str = r#"
        remove_rule_ids = [10]

        [[rules]]
        id = 20
        variables = ["ARGS"]
        operator = "@contains b"

        [[exceptions]]
        id = 20
        targets = ["!ARGS:safe"]
    "#;

    #[test]
    fn test_load_from_string() {
        let config = ConfigLoader::new()
            .load_str(
                r#"
            [engine]
            name = "inline"
            mode = "detection_only"
        "#,
            )
            .unwrap();
        assert_eq!(config.engine.name, "inline");
        assert!(config.waf.rules.is_empty());
    }

    #[test]
    fn test_parse_error_names_origin() {
        let err = ConfigLoader::new().load_str("[engine").unwrap_err();
        assert!(matches!(&err, ConfigError::Parse { origin, .. } if origin == "<string>"));
    }

    #[test]
    fn test_include_file_and_directory() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("rules.d")).unwrap();
        fs::write(dir.path().join("base.toml"), RULES_A).unwrap();
        fs::write(dir.path().join("rules.d").join("20-extra.toml"), RULES_B).unwrap();
        fs::write(dir.path().join("rules.d").join("README.md"), "not rules").unwrap();

        let config_path = dir.path().join("waf.toml");
        fs::write(
            &config_path,
            r#"
            [waf]
            include = ["base.toml", "rules.d"]

            [[waf.rules]]
            id = 1
            variables = ["REQUEST_URI"]
            operator = "@beginsWith /"
        "#,
        )
        .unwrap();

        let config = ConfigLoader::with_default_validators()
            .load(&config_path)
            .unwrap();
        let ids: Vec<i64> = config.waf.rules.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 10, 20]);
        assert_eq!(config.waf.exceptions.len(), 1);
        assert_eq!(config.waf.remove_rule_ids, vec![10]);
        assert!(config.waf.include.is_empty());
    }

    #[test]
    fn test_missing_include_is_not_found() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("waf.toml");
        fs::write(&config_path, "[waf]\ninclude = [\"missing.toml\"]\n").unwrap();

        let err = ConfigLoader::new().load(&config_path).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(p) if p.ends_with("missing.toml")));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = ConfigLoader::new().load("/nonexistent/path/waf.toml");
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_or_default() {
        let config = ConfigLoader::new().load_or_default("/nonexistent/path").unwrap();
        assert_eq!(config.engine.name, "r0n-waf");
    }

    #[test]
    fn test_validation_errors_are_collected() {
        let loader = ConfigLoader::with_default_validators();
        let err = loader
            .load_str(
                r#"
            [engine]
            name = ""
            [[waf.rules]]
            id = 7
            variables = ["ARGS"]
            operator = "@rx ok"
            [[waf.rules]]
            id = 7
            variables = ["ARGS"]
            operator = "@rx ok"
        "#,
            )
            .unwrap_err();

        let ConfigError::Invalid(errors) = err else {
            panic!("expected validation failure, got {err}");
        };
        assert!(errors.iter().any(|e| e.starts_with("engine.name:")));
        assert!(errors.iter().any(|e| e.contains("Duplicate rule id: 7")));
    }

    #[test]
    fn test_load_handler() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("waf.toml");
        fs::write(&config_path, "[waf]\ninclude = [\"a.toml\"]\n").unwrap();
        fs::write(dir.path().join("a.toml"), RULES_A).unwrap();

        let (handler, errors) = ConfigLoader::new().load_handler(&config_path).unwrap();
        assert!(errors.is_empty());
        assert_eq!(handler.rules().len(), 1);
        assert!(handler.rules().get(10).is_some());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("saved.toml");

        let mut config = EngineConfig::default();
        config.engine.name = "saved-waf".to_string();
        config.waf.rules.push(RuleConfig {
            id: 5,
            variables: vec!["REQUEST_URI".to_string()],
            operator: "@beginsWith /admin".to_string(),
            ..Default::default()
        });

        let loader = ConfigLoader::new();
        loader.save(&config, &config_path).unwrap();

        let loaded = loader.load(&config_path).unwrap();
        assert_eq!(loaded.engine.name, "saved-waf");
        assert_eq!(loaded.waf.rules[0].operator, "@beginsWith /admin");
    }
}
