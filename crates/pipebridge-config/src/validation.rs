use std::collections::HashSet;

use crate::types::{BridgeConfig, PipeMode, ProviderConfig};
use crate::ConfigError;

impl BridgeConfig {
    /// Validate the configuration and return a list of errors.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if let ProviderConfig::Fs(fs) = &self.provider {
            if fs.root.trim().is_empty() {
                errors.push(ConfigError::InvalidConfig(
                    "provider 'fs' requires a non-empty root".to_string(),
                ));
            }
        }

        if self.transfer.chunk_size.as_bytes() == 0 {
            errors.push(ConfigError::InvalidConfig(
                "transfer.chunk_size must be greater than zero".to_string(),
            ));
        }

        let prefix = &self.pipes.prefix;
        if prefix.is_empty() || prefix.contains('/') {
            errors.push(ConfigError::InvalidConfig(format!(
                "pipes.prefix '{}' must be a non-empty file name component",
                prefix
            )));
        }

        if self.pipes.poll_interval.as_duration().is_zero() {
            errors.push(ConfigError::InvalidConfig(
                "pipes.poll_interval must be greater than zero".to_string(),
            ));
        }

        check_mode("pipes.mode", self.pipes.mode, &mut errors);
        check_mode("legacy.mode", self.legacy.mode, &mut errors);

        let mut seen = HashSet::new();
        for path in &self.legacy.paths {
            if !path.is_absolute() {
                errors.push(ConfigError::InvalidPipePath(
                    path.display().to_string(),
                    "legacy pipe paths must be absolute".to_string(),
                ));
            }
            if !seen.insert(path) {
                errors.push(ConfigError::DuplicatePipePath(path.display().to_string()));
            }
        }

        errors
    }

    /// Validate and return Ok(()) if valid, or Err with the first error.
    pub fn validate_or_err(&self) -> Result<(), ConfigError> {
        match self.validate().into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn check_mode(field: &str, mode: PipeMode, errors: &mut Vec<ConfigError>) {
    if mode.bits() & !0o777 != 0 {
        errors.push(ConfigError::InvalidMode(
            field.to_string(),
            format!("{} has bits outside 0777", mode),
        ));
    } else if mode.bits() & 0o600 != 0o600 {
        // The bridge itself opens the FIFO as its owner for both directions.
        errors.push(ConfigError::InvalidMode(
            field.to_string(),
            format!("{} must grant the owner read and write", mode),
        ));
    }
}
