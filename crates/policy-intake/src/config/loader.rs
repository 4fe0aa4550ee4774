use std::collections::HashSet;
use std::path::Path;

use crate::config::schema::{Config, ExtractorStrategy};
use crate::document::FieldName;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub const ENV_TENANT_ID: &str = "POLICY_INTAKE_TENANT_ID";
pub const ENV_EXTRACTOR: &str = "POLICY_INTAKE_EXTRACTOR";
pub const ENV_CONFIDENCE_THRESHOLD: &str = "POLICY_INTAKE_CONFIDENCE_THRESHOLD";
pub const ENV_REQUIRED_FIELDS: &str = "POLICY_INTAKE_REQUIRED_FIELDS";
pub const ENV_RETRY_BUDGET: &str = "POLICY_INTAKE_RETRY_BUDGET";

/// Loads a config file and applies `POLICY_INTAKE_*` environment overrides.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut config = load_config_from_str(&content)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config)?;

    Ok(config)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

/// Applies overrides looked up through `lookup` (normally the process
/// environment). Blank values are ignored.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(tenant) = get(ENV_TENANT_ID) {
        config.tenant_id = tenant.trim().to_string();
    }

    if let Some(raw) = get(ENV_EXTRACTOR) {
        config.extraction.strategy =
            raw.parse::<ExtractorStrategy>()
                .map_err(|reason| ConfigError::InvalidOverride {
                    name: ENV_EXTRACTOR,
                    value: raw.clone(),
                    reason,
                })?;
    }

    if let Some(raw) = get(ENV_CONFIDENCE_THRESHOLD) {
        config.extraction.confidence_threshold =
            raw.trim()
                .parse::<f64>()
                .map_err(|e| ConfigError::InvalidOverride {
                    name: ENV_CONFIDENCE_THRESHOLD,
                    value: raw.clone(),
                    reason: e.to_string(),
                })?;
    }

    if let Some(raw) = get(ENV_REQUIRED_FIELDS) {
        config.extraction.required_fields = raw
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| name.parse::<FieldName>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|reason| ConfigError::InvalidOverride {
                name: ENV_REQUIRED_FIELDS,
                value: raw.clone(),
                reason,
            })?;
    }

    if let Some(raw) = get(ENV_RETRY_BUDGET) {
        config.extraction.retry_budget =
            raw.trim()
                .parse::<u32>()
                .map_err(|e| ConfigError::InvalidOverride {
                    name: ENV_RETRY_BUDGET,
                    value: raw.clone(),
                    reason: e.to_string(),
                })?;
    }

    Ok(())
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let invalid = |message: String| Err(ConfigError::Validation { message });

    if config.version != "1.0" {
        return invalid(format!("Unsupported config version: {}", config.version));
    }

    if config.tenant_id.trim().is_empty() || config.tenant_id.contains('/') {
        return invalid(format!("Invalid tenant id '{}'", config.tenant_id));
    }

    let threshold = config.extraction.confidence_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        return invalid(format!(
            "confidence_threshold must be within [0, 1], got {}",
            threshold
        ));
    }

    let mut seen = HashSet::new();
    for field in &config.extraction.required_fields {
        if !seen.insert(field) {
            return invalid(format!("Duplicate required field '{}'", field));
        }
    }

    if config.upload.allowed_content_types.is_empty() {
        return invalid("allowed_content_types must not be empty".to_string());
    }

    if config.workers.extract_concurrency == 0 || config.workers.parse_concurrency == 0 {
        return invalid("worker concurrency must be at least 1".to_string());
    }

    if config.extraction.strategy == ExtractorStrategy::Model
        && (config.model.endpoint.is_none() || config.model.model.is_none())
    {
        return invalid("the model extractor needs model.endpoint and model.model".to_string());
    }

    Ok(())
}
