//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{JoycalError, Result};
use crate::joystick::device::ReadMode;
use crate::joystick::mapping::{
    ConversionPolicy, DEFAULT_AXIS_BUTTON_THRESHOLD, DEFAULT_BUTTON_AXIS_PRESSED,
    DEFAULT_BUTTON_AXIS_RELEASED,
};

/// Log levels accepted by `[logging] level`.
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub conversion: ConversionConfig,
    #[serde(default)]
    pub profiles: ProfilesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Joystick device configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    #[serde(default = "default_device_path")]
    pub path: String,

    /// Poll instead of blocking on reads.
    #[serde(default)]
    pub nonblocking: bool,
}

/// Axis↔button conversion defaults for new profiles
#[derive(Debug, Deserialize, Clone)]
pub struct ConversionConfig {
    #[serde(default = "default_axis_button_threshold")]
    pub axis_button_threshold: f32,

    #[serde(default = "default_button_axis_pressed")]
    pub button_axis_pressed: f32,

    #[serde(default = "default_button_axis_released")]
    pub button_axis_released: f32,
}

/// Profile storage configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ProfilesConfig {
    #[serde(default = "default_profiles_directory")]
    pub directory: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write daily-rotated log files here when set.
    #[serde(default)]
    pub directory: Option<String>,
}

// Default value functions
fn default_device_path() -> String { "/dev/input/js0".to_string() }

fn default_axis_button_threshold() -> f32 { DEFAULT_AXIS_BUTTON_THRESHOLD }
fn default_button_axis_pressed() -> f32 { DEFAULT_BUTTON_AXIS_PRESSED }
fn default_button_axis_released() -> f32 { DEFAULT_BUTTON_AXIS_RELEASED }

fn default_profiles_directory() -> String { "./profiles".to_string() }

fn default_log_level() -> String { "info".to_string() }

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: default_device_path(),
            nonblocking: false,
        }
    }
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            axis_button_threshold: default_axis_button_threshold(),
            button_axis_pressed: default_button_axis_pressed(),
            button_axis_released: default_button_axis_released(),
        }
    }
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self {
            directory: default_profiles_directory(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
        }
    }
}

impl DeviceConfig {
    /// Read mode selected by `nonblocking`.
    pub fn read_mode(&self) -> ReadMode {
        if self.nonblocking {
            ReadMode::NonBlocking
        } else {
            ReadMode::Blocking
        }
    }
}

impl ConversionConfig {
    /// Conversion policy for new profiles.
    pub fn policy(&self) -> ConversionPolicy {
        ConversionPolicy {
            axis_button_threshold: self.axis_button_threshold,
            button_axis_pressed: self.button_axis_pressed,
            button_axis_released: self.button_axis_released,
        }
    }
}

impl ProfilesConfig {
    pub fn directory(&self) -> PathBuf {
        PathBuf::from(&self.directory)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
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
    /// use joycal::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read, parsed or
    /// validated.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse and validate configuration from TOML text
    ///
    /// # Examples
    ///
    /// ```
    /// use joycal::config::Config;
    ///
    /// let config = Config::parse("[device]\npath = \"/dev/input/js1\"")?;
    /// assert_eq!(config.device.path, "/dev/input/js1");
    /// assert_eq!(config.logging.level, "info");
    /// # Ok::<(), joycal::error::JoycalError>(())
    /// ```
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Returns
    ///
    /// * `Result<()>` - Ok if valid, Err if invalid
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        if self.device.path.is_empty() {
            return Err(invalid("device path cannot be empty"));
        }

        if self.profiles.directory.is_empty() {
            return Err(invalid("profiles directory cannot be empty"));
        }

        let threshold = self.conversion.axis_button_threshold;
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(invalid("axis_button_threshold must be between 0.0 and 1.0 (exclusive)"));
        }

        for (name, value) in [
            ("button_axis_pressed", self.conversion.button_axis_pressed),
            ("button_axis_released", self.conversion.button_axis_released),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(invalid(format!("{} must be between -1.0 and 1.0", name)));
            }
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(invalid(format!(
                "log level must be one of: {}",
                LOG_LEVELS.join(", ")
            )));
        }

        if matches!(&self.logging.directory, Some(dir) if dir.is_empty()) {
            return Err(invalid("logging directory cannot be empty when set"));
        }

        Ok(())
    }
}

fn invalid<T: std::fmt::Display>(msg: T) -> JoycalError {
    JoycalError::Config(toml::de::Error::custom(msg))
}
