use std::fs::File;
use std::path::Path;
use std::time::Duration;

use color_eyre::eyre::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

use crate::analysis::correlation::{MatchRule, WindowMode};
use crate::analysis::types::HeaderLayout;

/// Largest tolerance accepted; anything wider stops being a clock-drift window
const MAX_TOLERANCE: Duration = Duration::from_secs(1);

/// Analyzer settings, loadable from YAML
///
/// ```yaml
/// tolerance: 200us
/// window: compatible   # or strict
/// header:
///   base: 6
///   data: 2
///   control: 3
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Clock-drift window for matching a send with its receipts
    #[serde(with = "humantime_serde")]
    pub tolerance: Duration,
    pub window: WindowMode,
    pub header: HeaderLayout,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            tolerance: Duration::from_micros(200),
            window: WindowMode::Compatible,
            header: HeaderLayout::default(),
        }
    }
}

impl AnalyzerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.tolerance.is_zero() {
            return Err(ValidationError::InvalidTolerance(
                "tolerance must be greater than zero".to_string(),
            ));
        }
        if self.tolerance > MAX_TOLERANCE {
            return Err(ValidationError::InvalidTolerance(format!(
                "tolerance {:?} exceeds the maximum of {:?}",
                self.tolerance, MAX_TOLERANCE
            )));
        }
        if self.header.base == 0 {
            return Err(ValidationError::InvalidHeader(
                "base header size cannot be zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn match_rule(&self) -> MatchRule {
        MatchRule::new(self.tolerance, self.window)
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid tolerance: {0}")]
    InvalidTolerance(String),
    #[error("Invalid header layout: {0}")]
    InvalidHeader(String),
}

/// Load and validate analyzer settings from a YAML file
pub fn load_config(config_path: &Path) -> Result<AnalyzerConfig> {
    info!("Loading configuration from: {:?}", config_path);

    let file = File::open(config_path)
        .with_context(|| format!("Failed to open config file: {}", config_path.display()))?;
    let config: AnalyzerConfig = serde_yaml::from_reader(file)
        .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

    config.validate()?;

    Ok(config)
}
