use crate::types::BridgeConfig;

impl BridgeConfig {
    /// Apply default inference rules to the configuration in place.
    pub fn apply_defaults(&mut self) {
        if self.pipes.dir.is_none() {
            self.pipes.dir = Some(std::env::temp_dir().join("pipebridge"));
        }

        // Legacy pool only makes sense when it has paths to hand out.
        if self.legacy.paths.is_empty() {
            self.legacy.enabled = false;
        }
    }

    /// Returns a new config with all defaults applied.
    pub fn effective(&self) -> BridgeConfig {
        let mut config = self.clone();
        config.apply_defaults();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_pipes_dir_defaults_to_temp() {
        let effective = BridgeConfig::default().effective();
        assert_eq!(
            effective.pipes.dir,
            Some(std::env::temp_dir().join("pipebridge"))
        );
    }

    #[test]
    fn test_explicit_pipes_dir_kept() {
        let mut config = BridgeConfig::default();
        config.pipes.dir = Some(PathBuf::from("/run/cam"));
        assert_eq!(config.effective().pipes.dir, Some(PathBuf::from("/run/cam")));
    }

    #[test]
    fn test_legacy_without_paths_disabled() {
        let mut config = BridgeConfig::default();
        config.legacy.enabled = true;
        assert!(!config.effective().legacy.enabled);
    }
}
