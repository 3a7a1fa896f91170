use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pool_lookback_days: i64,
    pub pool_candidate_cap: usize,
    pub anchor_candidate_cap: usize,
    pub anchors_per_range: usize,
    pub min_validated_anchors: usize,
    pub accuracy_ticket_count: usize,
    pub enforce_single_active_session: bool,
    pub rng_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_lookback_days: 30,
            pool_candidate_cap: 100,
            anchor_candidate_cap: 10,
            anchors_per_range: 2,
            min_validated_anchors: 6,
            accuracy_ticket_count: 3,
            enforce_single_active_session: true,
            rng_seed: None,
        }
    }
}

impl EngineConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = fs::read(path)
            .with_context(|| format!("failed to read engine config {}", path.display()))?;
        let config: EngineConfig = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse engine config {}", path.display()))?;
        Ok(config)
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        if seed.is_some() {
            self.rng_seed = seed;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn partial_config_file_keeps_defaults_for_missing_fields() {
        let mut file = tempfile::NamedTempFile::new().expect("temp config file");
        writeln!(file, r#"{{ "pool_lookback_days": 14, "rng_seed": 7 }}"#).expect("write config");

        let config = EngineConfig::load(Some(file.path())).expect("config should load");
        assert_eq!(config.pool_lookback_days, 14);
        assert_eq!(config.rng_seed, Some(7));
        assert_eq!(config.pool_candidate_cap, 100);
        assert_eq!(config.min_validated_anchors, 6);
        assert!(config.enforce_single_active_session);
    }

    #[test]
    fn command_line_seed_overrides_file_seed() {
        let config = EngineConfig {
            rng_seed: Some(1),
            ..EngineConfig::default()
        };
        assert_eq!(config.clone().with_seed(Some(9)).rng_seed, Some(9));
        assert_eq!(config.with_seed(None).rng_seed, Some(1));
    }
}
