//! TOML Configuration for the cellsearch front end
//!
//! Wraps the pipeline configuration together with the capture-file
//! settings. Every field has a default, so a minimal configuration file
//! only names the capture.

use serde::{Deserialize, Serialize};
use sync::config::SyncConfig;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Capture file settings
    pub capture: CaptureConfig,
    /// Synchronization pipeline parameters
    pub sync: SyncConfig,
    /// Optional directory holding PSS_taps_<N_id_2>.hex files; taps are
    /// generated from the sequences when absent
    pub tap_dir: Option<String>,
}

/// Capture input settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Sample data file (interleaved I/Q)
    pub data_file: String,
    /// Optional SigMF-style metadata file; overrides `datatype` and the
    /// configured sample rate when present
    pub meta_file: Option<String>,
    /// Sample format: "ci16_le" or "cf32_le"
    pub datatype: String,
    /// Normalize the capture to the input full scale before processing
    pub normalize: bool,
    /// Stop after this many samples (whole file when absent)
    pub max_samples: Option<usize>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            data_file: String::new(),
            meta_file: None,
            datatype: "ci16_le".to_string(),
            normalize: true,
            max_samples: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [capture]
            data_file = "capture.bin"
            "#,
        )
        .unwrap();
        assert_eq!(config.capture.data_file, "capture.bin");
        assert_eq!(config.capture.datatype, "ci16_le");
        assert!(config.capture.normalize);
        assert!(config.sync.validate().is_ok());
    }

    #[test]
    fn test_sync_overrides() {
        let config: AppConfig = toml::from_str(
            r#"
            [capture]
            data_file = "capture.bin"

            [sync]
            threshold = 65536
            half_cp_advance = false
            "#,
        )
        .unwrap();
        assert_eq!(config.sync.threshold, 65536);
        assert!(!config.sync.half_cp_advance);
    }
}
