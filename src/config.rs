//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section and field is optional; anything left out takes the
//! default shown in `config/default.toml`.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::calibration::{
    TestDirection, TestParams, REPEATS_MAX, REPEATS_MIN, SAMPLE_COUNT_MAX, SAMPLE_COUNT_MIN,
};
use crate::error::{Result, StickcalError};
use crate::gamepad::{ButtonId, HoldTarget, Personality};
use crate::gamepad::output::{TAP_MAX_MS, TAP_MIN_MS};
use crate::scheduler::{SchedulerConfig, KEEPALIVE_MAX_MS, KEEPALIVE_MIN_MS};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub test: TestConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub keepalive: KeepaliveConfig,
    #[serde(default)]
    pub hold: HoldConfig,
    #[serde(default)]
    pub operator: OperatorConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Virtual gamepad configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    #[serde(default = "default_personality")]
    pub personality: Personality,

    /// Create the virtual pad at startup.
    #[serde(default = "default_device_enabled")]
    pub enabled: bool,
}

/// Measurement protocol configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TestConfig {
    #[serde(default = "default_sample_count")]
    pub sample_count: u32,

    #[serde(default = "default_repeats_per_point")]
    pub repeats_per_point: u32,

    #[serde(default = "default_min_magnitude")]
    pub min_magnitude: f64,

    #[serde(default = "default_max_magnitude")]
    pub max_magnitude: f64,

    #[serde(default = "default_direction")]
    pub direction: TestDirection,

    #[serde(default = "default_deadzone_step")]
    pub deadzone_step: f64,

    #[serde(default = "default_deadzone_back_step")]
    pub deadzone_back_step: f64,
}

/// Axis ranges of the game's response curve editor
#[derive(Debug, Deserialize, Clone)]
pub struct DisplayConfig {
    #[serde(default = "default_display_max")]
    pub x_max: f64,

    #[serde(default = "default_display_max")]
    pub y_max: f64,
}

/// Keepalive tap configuration
#[derive(Debug, Deserialize, Clone)]
pub struct KeepaliveConfig {
    #[serde(default = "default_keepalive_enabled")]
    pub enabled: bool,

    #[serde(default = "default_keepalive_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_keepalive_button")]
    pub button: ButtonId,

    #[serde(default = "default_tap_ms")]
    pub tap_ms: u64,
}

/// Hold-during-test configuration
#[derive(Debug, Deserialize, Clone)]
pub struct HoldConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Button code, `left_trigger` or `right_trigger`.
    #[serde(default)]
    pub target: Option<HoldTarget>,
}

/// Operator event configuration
#[derive(Debug, Deserialize, Clone)]
pub struct OperatorConfig {
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

/// Result export configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    #[serde(default = "default_export_dir")]
    pub dir: PathBuf,

    /// Write each run into its own timestamped directory.
    #[serde(default = "default_timestamped")]
    pub timestamped: bool,
}

/// Log file configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,

    /// Used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_personality() -> Personality { Personality::Ds4 }
fn default_device_enabled() -> bool { true }

fn default_sample_count() -> u32 { 8 }
fn default_repeats_per_point() -> u32 { 5 }
fn default_min_magnitude() -> f64 { 0.10 }
fn default_max_magnitude() -> f64 { 1.0 }
fn default_direction() -> TestDirection { TestDirection::Right }
fn default_deadzone_step() -> f64 { 0.02 }
fn default_deadzone_back_step() -> f64 { 0.005 }

fn default_display_max() -> f64 { 100.0 }

fn default_keepalive_enabled() -> bool { true }
fn default_keepalive_interval_ms() -> u64 { 120 }
fn default_keepalive_button() -> ButtonId { ButtonId::default_keepalive() }
fn default_tap_ms() -> u64 { 30 }

fn default_cooldown_ms() -> u64 { 250 }

fn default_export_dir() -> PathBuf { PathBuf::from("./results") }
fn default_timestamped() -> bool { true }

fn default_log_dir() -> PathBuf { PathBuf::from("./logs") }
fn default_log_file_prefix() -> String { "stickcal.log".to_string() }
fn default_log_level() -> String { "info".to_string() }

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            personality: default_personality(),
            enabled: default_device_enabled(),
        }
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            sample_count: default_sample_count(),
            repeats_per_point: default_repeats_per_point(),
            min_magnitude: default_min_magnitude(),
            max_magnitude: default_max_magnitude(),
            direction: default_direction(),
            deadzone_step: default_deadzone_step(),
            deadzone_back_step: default_deadzone_back_step(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            x_max: default_display_max(),
            y_max: default_display_max(),
        }
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: default_keepalive_enabled(),
            interval_ms: default_keepalive_interval_ms(),
            button: default_keepalive_button(),
            tap_ms: default_tap_ms(),
        }
    }
}

impl Default for HoldConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target: None,
        }
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: default_export_dir(),
            timestamped: default_timestamped(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            file_prefix: default_log_file_prefix(),
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use stickcal::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns error if TOML parsing or validation fails
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns `StickcalError::InvalidConfig` naming the first value out of
    /// its valid range
    pub fn validate(&self) -> Result<()> {
        if !(SAMPLE_COUNT_MIN..=SAMPLE_COUNT_MAX).contains(&self.test.sample_count) {
            return Err(invalid(format!(
                "sample_count must be between {} and {}",
                SAMPLE_COUNT_MIN, SAMPLE_COUNT_MAX
            )));
        }

        if !(REPEATS_MIN..=REPEATS_MAX).contains(&self.test.repeats_per_point) {
            return Err(invalid(format!(
                "repeats_per_point must be between {} and {}",
                REPEATS_MIN, REPEATS_MAX
            )));
        }

        // Remaining protocol ranges are shared with the start-time check
        self.test_params()
            .validate()
            .map_err(|e| invalid(e.to_string()))?;

        if !(KEEPALIVE_MIN_MS..=KEEPALIVE_MAX_MS).contains(&self.keepalive.interval_ms) {
            return Err(invalid(format!(
                "keepalive interval_ms must be between {} and {}",
                KEEPALIVE_MIN_MS, KEEPALIVE_MAX_MS
            )));
        }

        if !(TAP_MIN_MS..=TAP_MAX_MS).contains(&self.keepalive.tap_ms) {
            return Err(invalid(format!(
                "keepalive tap_ms must be between {} and {}",
                TAP_MIN_MS, TAP_MAX_MS
            )));
        }

        if self.hold.enabled && self.hold.target.is_none() {
            return Err(invalid("hold target is required when hold is enabled".to_string()));
        }

        if self.operator.cooldown_ms > 5000 {
            return Err(invalid("operator cooldown_ms must be at most 5000".to_string()));
        }

        if self.export.dir.as_os_str().is_empty() {
            return Err(invalid("export dir cannot be empty".to_string()));
        }

        if self.logging.dir.as_os_str().is_empty() || self.logging.file_prefix.is_empty() {
            return Err(invalid("logging dir and file_prefix cannot be empty".to_string()));
        }

        Ok(())
    }

    /// Test parameters for the calibration state machine.
    #[must_use]
    pub fn test_params(&self) -> TestParams {
        TestParams {
            sample_count: self.test.sample_count,
            repeats_per_point: self.test.repeats_per_point,
            min_magnitude: self.test.min_magnitude,
            max_magnitude: self.test.max_magnitude,
            deadzone_step: self.test.deadzone_step,
            deadzone_back_step: self.test.deadzone_back_step,
            display_x_max: self.display.x_max,
            display_y_max: self.display.y_max,
            direction: self.test.direction,
        }
    }

    /// Settings for the output scheduler.
    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            keepalive_enabled: self.keepalive.enabled,
            keepalive_interval: Duration::from_millis(self.keepalive.interval_ms),
            keepalive_button: self.keepalive.button,
            tap_ms: self.keepalive.tap_ms,
            hold_enabled: self.hold.enabled,
            hold_target: self.hold.target,
        }
    }

    #[must_use]
    pub fn operator_cooldown(&self) -> Duration {
        Duration::from_millis(self.operator.cooldown_ms)
    }
}

fn invalid(message: String) -> StickcalError {
    StickcalError::InvalidConfig(message)
}
