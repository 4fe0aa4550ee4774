//! Credential resolution for external services.
//!
//! A credential may be configured in three ways, checked in this order:
//!
//! 1. **Direct value** (`api_key`), convenient for local runs
//! 2. **File reference** (`api_key_file`), e.g. a mounted secret
//! 3. **Env var reference** (`api_key_env`)

use secrecy::SecretString;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Secret file '{path}' is empty")]
    EmptyFile { path: String },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Where a credential comes from. Resolved lazily, at first use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretSource {
    pub direct: Option<String>,
    pub file_path: Option<String>,
    pub env_var: Option<String>,
}

impl SecretSource {
    pub fn resolve(&self) -> Result<SecretString> {
        resolve_secret(
            self.direct.as_deref(),
            self.file_path.as_deref(),
            self.env_var.as_deref(),
        )
    }

    pub fn is_configured(&self) -> bool {
        [&self.direct, &self.file_path, &self.env_var]
            .iter()
            .any(|s| s.as_deref().is_some_and(|v| !v.is_empty()))
    }
}

/// Resolves a secret from the first non-empty source: direct value, then
/// file contents (trimmed), then environment variable (trimmed).
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        let content = fs::read_to_string(&expanded).map_err(|e| SecretError::FileReadError {
            path: expanded.clone(),
            source: e,
        })?;
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(SecretError::EmptyFile { path: expanded });
        }
        return Ok(SecretString::from(trimmed.to_string()));
    }

    if let Some(var_name) = env_var.filter(|n| !n.is_empty()) {
        return match std::env::var(var_name) {
            Ok(value) => Ok(SecretString::from(value.trim().to_string())),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: var_name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: var_name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

/// Expands a leading `~` to the current user's home directory.
fn expand_home(path: &str) -> String {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => return path.to_string(),
    };
    match dirs::home_dir() {
        Some(home) => {
            let mut expanded: PathBuf = home;
            let rest = rest.trim_start_matches('/');
            if !rest.is_empty() {
                expanded.push(rest);
            }
            expanded.to_string_lossy().into_owned()
        }
        None => path.to_string(),
    }
}
