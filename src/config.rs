use std::{error::Error, fmt, fs, io, path::Path, time::Duration};

use serde::Deserialize;

use crate::license_enforcement::FeatureRequirements;

#[derive(Debug)]
pub(crate) enum ConfigError {
    Read(io::Error),
    Parse(serde_yaml::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::Read(err) => write!(f, "Failed to read enforcement config: {err}"),
            ConfigError::Parse(err) => write!(f, "Failed to parse enforcement config: {err}"),
            ConfigError::Invalid(reason) => write!(f, "Invalid enforcement config: {reason}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Read(err) => Some(err),
            ConfigError::Parse(err) => Some(err),
            ConfigError::Invalid(_) => None,
        }
    }
}

/// Enforcement tunables. Every field defaults to the production value, so an
/// empty file is a valid config.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", default, deny_unknown_fields)]
pub(crate) struct Config {
    pub(crate) license_revalidation_secs: u64,
    pub(crate) script_check_interval_ms: u64,
    pub(crate) devtools_check_interval_ms: u64,
    pub(crate) devtools_gap_threshold_px: u32,
    pub(crate) free_article_quota: usize,
    pub(crate) usage_escalation_threshold: usize,
    pub(crate) report_threshold: usize,
    pub(crate) tracking_log_cap: usize,
    pub(crate) feature_usage_cap: usize,
    pub(crate) analysis_history_cap: usize,
    pub(crate) license_violations_cap: usize,
    pub(crate) copy_tracking_min_len: usize,
    pub(crate) fingerprint_len: usize,
    pub(crate) watermark_attribute: String,
    pub(crate) protection_scripts: Vec<String>,
    pub(crate) premium_features: FeatureRequirements,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            license_revalidation_secs: 5 * 60,
            script_check_interval_ms: 5_000,
            devtools_check_interval_ms: 500,
            devtools_gap_threshold_px: 160,
            free_article_quota: 5,
            usage_escalation_threshold: 3,
            report_threshold: 5,
            tracking_log_cap: 1000,
            feature_usage_cap: 100,
            analysis_history_cap: 50,
            license_violations_cap: 10,
            copy_tracking_min_len: 50,
            fingerprint_len: 64,
            watermark_attribute: "data-co-watermark".to_owned(),
            protection_scripts: vec!["protected-core.js".to_owned(), "premium.js".to_owned()],
            premium_features: FeatureRequirements::default(),
        }
    }
}

impl Config {
    pub(crate) fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let contents = fs::read_to_string(path).map_err(ConfigError::Read)?;
        Self::from_yaml(&contents)
    }

    pub(crate) fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = if contents.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(contents).map_err(ConfigError::Parse)?
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("license_revalidation_secs", self.license_revalidation_secs),
            ("script_check_interval_ms", self.script_check_interval_ms),
            ("devtools_check_interval_ms", self.devtools_check_interval_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }

        let caps = [
            ("tracking_log_cap", self.tracking_log_cap),
            ("feature_usage_cap", self.feature_usage_cap),
            ("analysis_history_cap", self.analysis_history_cap),
            ("license_violations_cap", self.license_violations_cap),
        ];
        for (name, value) in caps {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }

        if self.watermark_attribute.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "watermark_attribute must not be empty".to_owned(),
            ));
        }

        Ok(())
    }

    pub(crate) fn license_revalidation_interval(&self) -> Duration {
        Duration::from_secs(self.license_revalidation_secs)
    }

    pub(crate) fn script_check_interval(&self) -> Duration {
        Duration::from_millis(self.script_check_interval_ms)
    }

    pub(crate) fn devtools_check_interval(&self) -> Duration {
        Duration::from_millis(self.devtools_check_interval_ms)
    }
}
