//! Configuration validation
//!
//! Validates configuration and reports issues.

use super::types::Config;
use crate::sandbox::Language;

/// Result of configuration validation
#[derive(Debug, Clone)]
pub struct ConfigValidationResult {
    /// Whether the config is valid
    pub valid: bool,
    /// Validation errors (critical)
    pub errors: Vec<ValidationIssue>,
    /// Validation warnings (non-critical)
    pub warnings: Vec<ValidationIssue>,
}

impl ConfigValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        ConfigValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error
    pub fn with_error(mut self, issue: ValidationIssue) -> Self {
        self.valid = false;
        self.errors.push(issue);
        self
    }

    /// Add a warning
    pub fn with_warning(mut self, issue: ValidationIssue) -> Self {
        self.warnings.push(issue);
        self
    }
}

/// A validation issue
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the config field
    pub path: String,
    /// Issue message
    pub message: String,
    /// Suggested fix
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Create a new issue
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Add a suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " ({})", suggestion)?;
        }
        Ok(())
    }
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::valid();

    result = validate_limits(config, result);
    result = validate_languages(config, result);
    result = validate_container(config, result);

    result
}

fn validate_limits(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if config.sandbox.max_code_bytes == 0 {
        result = result.with_error(
            ValidationIssue::new("sandbox.max_code_bytes", "Must be greater than zero")
                .with_suggestion("Remove the field to use the 64 KiB default"),
        );
    }

    if config.sandbox.max_output_bytes == 0 {
        result = result.with_error(
            ValidationIssue::new("sandbox.max_output_bytes", "Must be greater than zero")
                .with_suggestion("Remove the field to use the 1 MiB default"),
        );
    }

    if config.sandbox.workspace_root.as_os_str().is_empty() {
        result = result.with_error(ValidationIssue::new(
            "sandbox.workspace_root",
            "Workspace root must not be empty",
        ));
    }

    result
}

fn validate_languages(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let languages = &config.sandbox.languages;

    for (field, names) in [("enabled", &languages.enabled), ("disabled", &languages.disabled)] {
        for name in names {
            if name.parse::<Language>().is_err() {
                result = result.with_warning(
                    ValidationIssue::new(
                        format!("sandbox.languages.{}", field),
                        format!("Unknown language '{}' will be ignored", name),
                    )
                    .with_suggestion("Valid: python, javascript, bash, java, go"),
                );
            }
        }
    }

    for name in config.sandbox.container.images.keys() {
        if name.parse::<Language>().is_err() {
            result = result.with_warning(ValidationIssue::new(
                "sandbox.container.images",
                format!("Image override for unknown language '{}'", name),
            ));
        }
    }

    result
}

fn validate_container(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let container = &config.sandbox.container;

    if container.cpu_period < 1_000 || container.cpu_period > 1_000_000 {
        result = result.with_error(
            ValidationIssue::new(
                "sandbox.container.cpu_period",
                format!("CPU period {} is outside 1000..=1000000", container.cpu_period),
            )
            .with_suggestion("Use 100000 (the Docker default)"),
        );
    }

    if container.pull_timeout_secs == 0 {
        result = result.with_error(
            ValidationIssue::new(
                "sandbox.container.pull_timeout_secs",
                "Image pulls would always time out",
            )
            .with_suggestion("Set a budget of at least a few seconds"),
        );
    }

    if !container.mount_path.starts_with('/') {
        result = result.with_error(ValidationIssue::new(
            "sandbox.container.mount_path",
            "Container mount path must be absolute",
        ));
    }

    if container.pids_limit <= 0 {
        result = result.with_warning(ValidationIssue::new(
            "sandbox.container.pids_limit",
            "No process limit: fork bombs are only bounded by memory",
        ));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        let result = validate_config(&config);

        assert!(result.valid);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_invalid_container_settings() {
        let mut config = Config::default();
        config.sandbox.container.cpu_period = 10;
        config.sandbox.container.mount_path = "workspace".to_string();

        let result = validate_config(&config);
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn test_unknown_language_warns() {
        let mut config = Config::default();
        config.sandbox.languages.enabled = vec!["cobol".to_string()];

        let result = validate_config(&config);
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].to_string().contains("cobol"));
    }
}
