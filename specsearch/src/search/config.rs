use std::path::Path;
use serde::{Deserialize, Serialize};

use speccore::algorithm::mixture::MixtureConfig;
use speccore::algorithm::preprocess::PreprocessConfig;

use crate::error::SearchError;

/// Configuration for the search engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Records must score above this value (0 to 1) to be reported (default: 0.05)
    pub min_match_score: f64,
    /// Worker threads for record scoring, 0 lets rayon decide (default: 0)
    pub num_threads: usize,
    /// Peak pairing window in x units for peak search, none means two grid steps (default: none)
    pub peak_tolerance: Option<f64>,
    /// Number of best spectral hits the mixture decomposer chooses from (default: 50)
    pub mixture_candidate_pool: usize,
    /// Seconds a published transfer block stays alive without acknowledgment (default: 30)
    pub transfer_grace_secs: u64,
    pub preprocess: PreprocessConfig,
    pub mixture: MixtureConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            min_match_score: 0.05,
            num_threads: 0,
            peak_tolerance: None,
            mixture_candidate_pool: 50,
            transfer_grace_secs: 30,
            preprocess: PreprocessConfig::default(),
            mixture: MixtureConfig::default(),
        }
    }
}

impl SearchConfig {
    /// Parses a JSON configuration; missing fields take their defaults.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use specsearch::search::config::SearchConfig;
    /// let config = SearchConfig::from_json_str(r#"{ "min_match_score": 0.2, "mixture": { "max_components": 3 } }"#).unwrap();
    /// assert_eq!(config.min_match_score, 0.2);
    /// assert_eq!(config.mixture.max_components, 3);
    /// assert_eq!(config.mixture_candidate_pool, 50);
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self, SearchError> {
        let config: SearchConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SearchError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        if !(0.0..1.0).contains(&self.min_match_score) {
            return Err(SearchError::InvalidInput(format!(
                "min_match_score must be in [0, 1), got {}",
                self.min_match_score
            )));
        }
        if let Some(tolerance) = self.peak_tolerance {
            if !(tolerance > 0.0) {
                return Err(SearchError::InvalidInput(format!("peak_tolerance must be positive, got {}", tolerance)));
            }
        }
        if self.mixture_candidate_pool == 0 {
            return Err(SearchError::InvalidInput("mixture_candidate_pool must be at least 1".to_string()));
        }
        if !(self.mixture.min_improvement >= 0.0) {
            return Err(SearchError::InvalidInput("mixture.min_improvement must be non-negative".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SearchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_match_score, 0.05);
        assert!(config.preprocess.baseline_correction);
    }

    #[test]
    fn test_invalid_config() {
        assert!(SearchConfig::from_json_str(r#"{ "min_match_score": 1.5 }"#).is_err());
        assert!(SearchConfig::from_json_str(r#"{ "peak_tolerance": -2.0 }"#).is_err());
        assert!(SearchConfig::from_json_str(r#"{ "mixture_candidate_pool": 0 }"#).is_err());
        assert!(SearchConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_nested_preprocess_section() {
        let config = SearchConfig::from_json_str(r#"{ "preprocess": { "raman_excitation_nm": 785.0 } }"#).unwrap();
        assert_eq!(config.preprocess.raman_excitation_nm, Some(785.0));
        assert!(config.preprocess.baseline_correction);
    }
}
