//! Configuration surface for the pipeline.
//!
//! All values validate against documented ranges; the `performance` block
//! can be replaced atomically by a named preset.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// AI-detection acceptance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Acceptance threshold in percent (0-100). Content passes when its
    /// measured AI probability is strictly below this value.
    pub threshold: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self { threshold: 25.0 }
    }
}

/// Detect-optimise loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationConfig {
    /// Maximum optimise→detect attempts (1-20).
    pub max_attempts: u32,
    /// Delay between attempts in seconds (0-60).
    pub retry_delay_seconds: u32,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay_seconds: 2,
        }
    }
}

/// Browser/detector timing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Result polling budget after the warm-up, in seconds (5-60).
    pub ai_detection_timeout: u32,
    /// Wait after browser start, in seconds (0.5-5).
    pub browser_startup_wait: f64,
    /// Wait after page navigation, in seconds (1-10).
    pub page_load_wait: f64,
    /// Per-element locator timeout, in seconds (1-15).
    pub element_find_timeout: u32,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            ai_detection_timeout: 15,
            browser_startup_wait: 1.0,
            page_load_wait: 3.0,
            element_find_timeout: 5,
        }
    }
}

/// Named performance presets that replace the whole block at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformancePreset {
    UltraFast,
    Balanced,
    Stable,
}

impl PerformancePreset {
    pub fn config(&self) -> PerformanceConfig {
        match self {
            Self::UltraFast => PerformanceConfig {
                ai_detection_timeout: 10,
                browser_startup_wait: 0.5,
                page_load_wait: 1.5,
                element_find_timeout: 2,
            },
            Self::Balanced => PerformanceConfig::default(),
            Self::Stable => PerformanceConfig {
                ai_detection_timeout: 30,
                browser_startup_wait: 2.0,
                page_load_wait: 5.0,
                element_find_timeout: 10,
            },
        }
    }
}

/// LLM endpoint settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    pub endpoint_url: String,
    pub api_key: String,
    pub default_model: String,
}

/// Optional local proxy-controller endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub controller_url: Option<String>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ai_detection: DetectionConfig,
    pub ai_optimization: OptimizationConfig,
    pub performance: PerformanceConfig,
    pub llm: LlmConfig,
    pub proxy: ProxyConfig,
}

impl AppConfig {
    /// Replace the performance block with a preset.
    pub fn apply_preset(&mut self, preset: PerformancePreset) {
        self.performance = preset.config();
    }

    /// Validate all values against their documented ranges.
    pub fn validate(&self) -> Result<()> {
        check_range(
            "ai_detection.threshold",
            self.ai_detection.threshold,
            0.0,
            100.0,
        )?;
        check_range(
            "ai_optimization.max_attempts",
            f64::from(self.ai_optimization.max_attempts),
            1.0,
            20.0,
        )?;
        check_range(
            "ai_optimization.retry_delay_seconds",
            f64::from(self.ai_optimization.retry_delay_seconds),
            0.0,
            60.0,
        )?;
        check_range(
            "performance.ai_detection_timeout",
            f64::from(self.performance.ai_detection_timeout),
            5.0,
            60.0,
        )?;
        check_range(
            "performance.browser_startup_wait",
            self.performance.browser_startup_wait,
            0.5,
            5.0,
        )?;
        check_range(
            "performance.page_load_wait",
            self.performance.page_load_wait,
            1.0,
            10.0,
        )?;
        check_range(
            "performance.element_find_timeout",
            f64::from(self.performance.element_find_timeout),
            1.0,
            15.0,
        )?;
        Ok(())
    }
}

fn check_range(name: &str, value: f64, min: f64, max: f64) -> Result<()> {
    if value < min || value > max {
        return Err(Error::Config(format!(
            "{name} must be within {min}..={max}, got {value}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_validate() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn test_default_values() {
        let config = AppConfig::default();
        assert_eq!(config.ai_detection.threshold, 25.0);
        assert_eq!(config.ai_optimization.max_attempts, 5);
        assert_eq!(config.ai_optimization.retry_delay_seconds, 2);
        assert_eq!(config.performance, PerformancePreset::Balanced.config());
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut config = AppConfig::default();
        config.ai_detection.threshold = 101.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.ai_optimization.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.performance.browser_startup_wait = 0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_preset_replaces_whole_block() {
        let mut config = AppConfig::default();
        config.performance.page_load_wait = 9.0;
        config.apply_preset(PerformancePreset::UltraFast);
        assert_eq!(config.performance, PerformancePreset::UltraFast.config());
        config.validate().unwrap();

        config.apply_preset(PerformancePreset::Stable);
        assert_eq!(config.performance.ai_detection_timeout, 30);
        config.validate().unwrap();
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut config = AppConfig::default();
        config.llm.endpoint_url = "http://localhost:8000/v1/chat/completions".into();
        config.proxy.controller_url = Some("http://127.0.0.1:9090".into());

        let json = serde_json::to_string(&config).unwrap();
        let back: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.llm.endpoint_url, config.llm.endpoint_url);
        assert_eq!(back.proxy.controller_url, config.proxy.controller_url);
    }
}
