use crate::adapters::RuntimeFeatureFlags;
use crate::core::checkout::EXCLUSIVE_LOCK_FEATURE;
use crate::core::step::RunnerOptions;
use crate::domain::naming::RenameRule;
use crate::utils::error::{BatchError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub library: LibraryConfig,
    #[serde(default)]
    pub batch: BatchSettings,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub checkout: CheckOutConfig,
    #[serde(default)]
    pub organize: OrganizeConfig,
    #[serde(default)]
    pub purge: PurgeConfig,
    #[serde(default)]
    pub scrape: ScrapeConfig,
    pub monitoring: Option<MonitoringConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// JSON file holding the comic records
    pub database: String,
    /// Base directory for relative comic filenames
    #[serde(default = "default_root")]
    pub root: String,
}

fn default_root() -> String {
    ".".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub chunk_size: usize,
    pub workers: usize,
    pub max_items: Option<usize>,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            workers: 4,
            max_items: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    pub exclusive_lock: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            exclusive_lock: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckOutConfig {
    /// 未設定時無限期等待
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizeConfig {
    pub enabled: bool,
    pub target_directory: Option<String>,
    pub rename_rule: String,
    pub issue_padding: usize,
}

impl Default for OrganizeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_directory: None,
            rename_rule: "$PUBLISHER/$SERIES v$VOLUME/$SERIES #$ISSUE ($COVERDATE)".to_string(),
            issue_padding: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PurgeConfig {
    pub enabled: bool,
    pub delete_files: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    pub enabled: bool,
    pub metadata_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub log_level: Option<String>,
}

impl BatchConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(BatchError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| BatchError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${COMIXED_LIBRARY})；未定義的變數保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| BatchError::ConfigError {
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_json_file("library.database", &self.library.database)?;
        validation::validate_path("library.root", &self.library.root)?;

        validation::validate_at_least("batch.chunk_size", self.batch.chunk_size, 1)?;
        validation::validate_range("batch.workers", self.batch.workers, 1, 64)?;
        if let Some(max_items) = self.batch.max_items {
            validation::validate_at_least("batch.max_items", max_items, 1)?;
        }

        if let Some(timeout) = self.checkout.timeout_seconds {
            validation::validate_range("checkout.timeout_seconds", timeout, 1, 86_400)?;
        }

        if self.organize.enabled {
            let target = validation::validate_required_field(
                "organize.target_directory",
                &self.organize.target_directory,
            )?;
            validation::validate_path("organize.target_directory", target)?;
            validation::validate_range("organize.issue_padding", self.organize.issue_padding, 0, 10)?;
            validation::validate_rename_rule("organize.rename_rule", &self.rename_rule())?;
        }

        if self.scrape.enabled {
            let metadata_file =
                validation::validate_required_field("scrape.metadata_file", &self.scrape.metadata_file)?;
            validation::validate_json_file("scrape.metadata_file", metadata_file)?;
        }

        if !self.organize.enabled && !self.purge.enabled && !self.scrape.enabled {
            return Err(BatchError::ConfigError {
                message: "no batch step is enabled".to_string(),
            });
        }

        Ok(())
    }

    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            chunk_size: self.batch.chunk_size,
            workers: self.batch.workers,
            max_items: self.batch.max_items,
            checkout_timeout: self.checkout.timeout_seconds.map(Duration::from_secs),
        }
    }

    pub fn rename_rule(&self) -> RenameRule {
        RenameRule::new(self.organize.rename_rule.clone(), self.organize.issue_padding)
    }

    pub fn feature_flags(&self) -> RuntimeFeatureFlags {
        RuntimeFeatureFlags::new().with(EXCLUSIVE_LOCK_FEATURE, self.features.exclusive_lock)
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.as_ref().map(|m| m.enabled).unwrap_or(false)
    }
}

impl Validate for BatchConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::FeatureFlags;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_full_config() {
        let toml_content = r#"
[library]
database = "./library.json"
root = "/comics"

[batch]
chunk_size = 25
workers = 8
max_items = 500

[features]
exclusive_lock = false

[checkout]
timeout_seconds = 30

[organize]
enabled = true
target_directory = "/comics/organized"
rename_rule = "$PUBLISHER/$SERIES #$ISSUE"
issue_padding = 4

[purge]
enabled = true
delete_files = true

[monitoring]
enabled = true
"#;

        let config = BatchConfig::from_toml_str(toml_content).unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.library.root, "/comics");
        assert_eq!(
            config.runner_options(),
            RunnerOptions {
                chunk_size: 25,
                workers: 8,
                max_items: Some(500),
                checkout_timeout: Some(Duration::from_secs(30)),
            }
        );
        assert!(!config.feature_flags().is_feature_enabled(EXCLUSIVE_LOCK_FEATURE));
        assert!(config.monitoring_enabled());
        assert!(!config.scrape.enabled);
    }

    #[test]
    fn test_defaults() {
        let config = BatchConfig::from_toml_str(
            r#"
[library]
database = "library.json"

[purge]
enabled = true
"#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.library.root, ".");
        assert_eq!(config.runner_options(), RunnerOptions::default());
        assert!(config.feature_flags().is_feature_enabled(EXCLUSIVE_LOCK_FEATURE));
        assert!(!config.purge.delete_files);
        assert!(!config.monitoring_enabled());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("COMIXED_TEST_TARGET", "/srv/comics");

        let config = BatchConfig::from_toml_str(
            r#"
[library]
database = "library.json"

[organize]
enabled = true
target_directory = "${COMIXED_TEST_TARGET}/organized"
"#,
        )
        .unwrap();
        assert_eq!(
            config.organize.target_directory.as_deref(),
            Some("/srv/comics/organized")
        );

        std::env::remove_var("COMIXED_TEST_TARGET");
    }

    #[test]
    fn test_organize_requires_target_directory() {
        let config = BatchConfig::from_toml_str(
            r#"
[library]
database = "library.json"

[organize]
enabled = true
"#,
        )
        .unwrap();

        assert!(matches!(
            config.validate(),
            Err(BatchError::MissingConfigError { .. })
        ));
    }

    #[test]
    fn test_rejects_rename_rule_outside_target() {
        let config = BatchConfig::from_toml_str(
            r#"
[library]
database = "library.json"

[organize]
enabled = true
target_directory = "library"
rename_rule = "../$SERIES"
"#,
        )
        .unwrap();

        assert!(matches!(
            config.validate(),
            Err(BatchError::InvalidConfigValueError { ref field, .. }) if field == "organize.rename_rule"
        ));
    }

    #[test]
    fn test_rejects_invalid_values() {
        let zero_workers = BatchConfig::from_toml_str(
            r#"
[library]
database = "library.json"

[batch]
workers = 0

[purge]
enabled = true
"#,
        )
        .unwrap();
        assert!(zero_workers.validate().is_err());

        let wrong_database = BatchConfig::from_toml_str(
            r#"
[library]
database = "library.csv"

[purge]
enabled = true
"#,
        )
        .unwrap();
        assert!(wrong_database.validate().is_err());

        let nothing_enabled = BatchConfig::from_toml_str(
            r#"
[library]
database = "library.json"
"#,
        )
        .unwrap();
        assert!(nothing_enabled.validate().is_err());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(
                br#"
[library]
database = "file-test.json"

[scrape]
enabled = true
metadata_file = "metadata.json"
"#,
            )
            .unwrap();

        let config = BatchConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.library.database, "file-test.json");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_toml_is_a_config_error() {
        let result = BatchConfig::from_toml_str("[library");
        assert!(matches!(
            result,
            Err(BatchError::ConfigValidationError { .. })
        ));
    }
}
