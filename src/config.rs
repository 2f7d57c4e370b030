// ⚙️ Detection Configuration - thresholds, cool-down, profiles
// Loaded from JSON; validated once, before any record is compared.

use crate::error::{DedupError, DedupResult};
use crate::profile::ScoringProfile;
use crate::record::EntityType;
use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum composite score for a pair to become a candidate (default: 0.8)
    pub threshold: f64,

    /// Days a rejected pair stays hidden unless a record changes (default: 30)
    pub cooldown_days: i64,

    /// Soft cap on pairwise comparisons per entity type. `None` = unbounded.
    pub max_comparisons: Option<usize>,

    pub profiles: Vec<ScoringProfile>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        DetectionConfig {
            threshold: 0.8,
            cooldown_days: 30,
            max_comparisons: None,
            profiles: vec![
                ScoringProfile::client(),
                ScoringProfile::product(),
                ScoringProfile::supplier(),
            ],
        }
    }
}

impl DetectionConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: DetectionConfig =
            serde_json::from_str(&content).context("Failed to parse detection config JSON")?;

        config.validate()?;
        Ok(config)
    }

    /// Builder: override threshold
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Builder: add or replace the profile for an entity type
    pub fn with_profile(mut self, profile: ScoringProfile) -> Self {
        self.profiles.retain(|p| p.entity_type != profile.entity_type);
        self.profiles.push(profile);
        self
    }

    pub fn profile(&self, entity_type: &EntityType) -> Option<&ScoringProfile> {
        self.profiles.iter().find(|p| &p.entity_type == entity_type)
    }

    /// Cool-down window. Saturates instead of overflowing; `validate`
    /// rejects values that do not fit.
    pub fn cooldown(&self) -> Duration {
        Duration::try_days(self.cooldown_days).unwrap_or_else(Duration::max_value)
    }

    pub fn validate(&self) -> DedupResult<()> {
        validate_threshold(self.threshold)?;

        if self.cooldown_days < 0 || Duration::try_days(self.cooldown_days).is_none() {
            return Err(DedupError::Config(format!(
                "cooldown_days must be between 0 and {}, got {}",
                Duration::max_value().num_days(),
                self.cooldown_days
            )));
        }

        if self.max_comparisons == Some(0) {
            return Err(DedupError::Config(
                "max_comparisons must be positive when set".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for profile in &self.profiles {
            if !seen.insert(&profile.entity_type) {
                return Err(DedupError::Config(format!(
                    "duplicate profile for entity type '{}'",
                    profile.entity_type
                )));
            }
            profile.validate()?;
        }

        Ok(())
    }
}

pub fn validate_threshold(threshold: f64) -> DedupResult<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(DedupError::Config(format!(
            "threshold must be within [0, 1], got {}",
            threshold
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{FieldKind, FieldSpec};

    #[test]
    fn test_default_config_is_valid() {
        let config = DetectionConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.profile(&EntityType::Client).is_some());
        assert!(config.profile(&EntityType::Custom("x".into())).is_none());
        assert_eq!(config.cooldown(), Duration::days(30));
    }

    #[test]
    fn test_threshold_out_of_range() {
        assert!(DetectionConfig::default().with_threshold(1.5).validate().is_err());
        assert!(DetectionConfig::default().with_threshold(-0.1).validate().is_err());
        assert!(DetectionConfig::default().with_threshold(f64::NAN).validate().is_err());
    }

    #[test]
    fn test_cooldown_out_of_range() {
        let config: DetectionConfig =
            serde_json::from_str(r#"{"cooldown_days": 9223372036854775807}"#).unwrap();
        assert!(matches!(config.validate(), Err(DedupError::Config(_))));

        let negative = DetectionConfig {
            cooldown_days: -1,
            ..DetectionConfig::default()
        };
        assert!(negative.validate().is_err());

        let long = DetectionConfig {
            cooldown_days: 36_500,
            ..DetectionConfig::default()
        };
        assert!(long.validate().is_ok());
        assert_eq!(long.cooldown(), Duration::days(36_500));
    }

    #[test]
    fn test_bad_profile_fails_whole_config() {
        let broken = ScoringProfile::new(EntityType::Client)
            .with_field(FieldSpec::new("name", FieldKind::Name, 0.0));
        let config = DetectionConfig::default().with_profile(broken);

        assert!(matches!(config.validate(), Err(DedupError::Config(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DetectionConfig =
            serde_json::from_str(r#"{"threshold": 0.65, "cooldown_days": 7}"#).unwrap();

        assert_eq!(config.threshold, 0.65);
        assert_eq!(config.cooldown_days, 7);
        assert_eq!(config.profiles.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_profile_round_trip() {
        let json = serde_json::to_string(&DetectionConfig::default()).unwrap();
        let back: DetectionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, DetectionConfig::default());
    }
}
