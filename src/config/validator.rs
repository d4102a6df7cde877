use std::collections::HashSet;
use thiserror::Error;

use crate::config::Settings;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Duplicate entry: {0}")]
    Duplicate(String),
}

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(settings: &Settings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if settings.server.host.is_empty() {
            errors.push(ValidationError::MissingField("server.host".to_string()));
        }
        if settings.server.port == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "server.port".to_string(),
                reason: "Port must be greater than 0".to_string(),
            });
        }

        if settings.gateway.url.is_empty() {
            errors.push(ValidationError::MissingField("gateway.url".to_string()));
        } else if !settings.gateway.url.starts_with("http://")
            && !settings.gateway.url.starts_with("https://")
        {
            errors.push(ValidationError::InvalidValue {
                field: "gateway.url".to_string(),
                reason: "Must be an http:// or https:// URL".to_string(),
            });
        }

        // A status probe must fail faster than a general command
        if settings.gateway.status_timeout_ms >= settings.gateway.command_timeout_ms {
            errors.push(ValidationError::InvalidValue {
                field: "gateway.status_timeout_ms".to_string(),
                reason: "Must be strictly shorter than gateway.command_timeout_ms".to_string(),
            });
        }

        if settings.gateway.retry.max_attempts == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "gateway.retry.max_attempts".to_string(),
                reason: "Must allow at least one attempt".to_string(),
            });
        }

        if settings.cache.allowed_files.is_empty() {
            errors.push(ValidationError::MissingField("cache.allowed_files".to_string()));
        }

        let mut seen = HashSet::new();
        for filename in &settings.cache.allowed_files {
            if filename.is_empty() {
                errors.push(ValidationError::InvalidValue {
                    field: "cache.allowed_files".to_string(),
                    reason: "Filenames must be non-empty".to_string(),
                });
            } else if !seen.insert(filename.clone()) {
                errors.push(ValidationError::Duplicate(format!(
                    "cache.allowed_files: '{}'",
                    filename
                )));
            }
        }

        // mpsc channels reject a zero capacity at construction
        if settings.broadcast.session_buffer == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "broadcast.session_buffer".to_string(),
                reason: "Must hold at least one queued notification".to_string(),
            });
        }

        if settings.broadcast.keepalive_timeout_secs <= settings.broadcast.keepalive_interval_secs {
            errors.push(ValidationError::InvalidValue {
                field: "broadcast.keepalive_timeout_secs".to_string(),
                reason: "Must exceed broadcast.keepalive_interval_secs".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
