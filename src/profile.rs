//! # Profile Persistence
//!
//! Saves and restores the mapping table and calibration records of a device,
//! keyed by its [`DeviceIdentity`].
//!
//! ## File Layout
//!
//! One TOML file per identity, `{directory}/{identity}.toml`:
//!
//! ```toml
//! format_version = 1
//! identity = "logitech_gamepad_f310-8a11b"
//! device_name = "Logitech Gamepad F310"
//! saved_at = "2024-05-01T12:00:00Z"
//!
//! [mapping]
//! axis_count = 8
//! button_count = 11
//!
//! [mapping.conversion]
//! axis_button_threshold = 0.5
//! button_axis_pressed = 1.0
//! button_axis_released = -1.0
//!
//! [[mapping.entries]]
//! physical_index = 0
//! logical_index = 0
//! kind = "axis"
//! enabled = true
//!
//! [[calibration]]
//! axis = 0
//! min = -32767
//! center = 0
//! max = 32767
//! deadzone = 0
//! inverted = false
//! ```
//!
//! Saves go through a temporary file in the same directory that is synced and
//! then renamed over the target, so a crash never leaves a half-written
//! profile behind.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{JoycalError, Result};
use crate::joystick::calibration::CalibrationRecord;
use crate::joystick::device::{DeviceDescriptor, DeviceIdentity};
use crate::joystick::mapping::{ConversionPolicy, MappingEntry, MappingTable};

/// Version written to, and required from, every profile file.
pub const FORMAT_VERSION: u32 = 1;

/// Mapping and calibration of one device.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub mapping: MappingTable,
    /// One record per logical axis.
    pub calibration: Vec<CalibrationRecord>,
}

impl Profile {
    /// Identity mapping and full-range calibration for a device.
    #[must_use]
    pub fn defaults(descriptor: &DeviceDescriptor) -> Self {
        Self::with_policy(descriptor, ConversionPolicy::default())
    }

    /// Like [`Profile::defaults`] with a specific conversion policy.
    #[must_use]
    pub fn with_policy(descriptor: &DeviceDescriptor, policy: ConversionPolicy) -> Self {
        let mut mapping = MappingTable::identity(descriptor.axis_count, descriptor.button_count);
        if mapping.set_policy(policy).is_err() {
            warn!("Ignoring invalid conversion policy {:?}", policy);
        }
        Self {
            calibration: vec![CalibrationRecord::default(); mapping.logical_axis_count()],
            mapping,
        }
    }

    /// Checks that there is one valid record per logical axis.
    ///
    /// # Errors
    ///
    /// Returns [`JoycalError::InvalidCalibration`] on a count mismatch or an
    /// invalid record.
    pub fn validate(&self) -> Result<()> {
        let axes = self.mapping.logical_axis_count();
        if self.calibration.len() != axes {
            return Err(JoycalError::InvalidCalibration(format!(
                "{} calibration records for {} logical axes",
                self.calibration.len(),
                axes
            )));
        }
        self.calibration.iter().try_for_each(CalibrationRecord::validate)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ProfileFile {
    format_version: u32,
    identity: DeviceIdentity,
    device_name: String,
    saved_at: DateTime<Utc>,
    mapping: MappingSection,
    #[serde(default)]
    calibration: Vec<AxisCalibration>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MappingSection {
    axis_count: usize,
    button_count: usize,
    #[serde(default)]
    conversion: ConversionPolicy,
    #[serde(default)]
    entries: Vec<MappingEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AxisCalibration {
    axis: usize,
    min: i32,
    center: i32,
    max: i32,
    deadzone: u32,
    inverted: bool,
}

impl AxisCalibration {
    fn new(axis: usize, record: &CalibrationRecord) -> Self {
        Self {
            axis,
            min: record.min,
            center: record.center,
            max: record.max,
            deadzone: record.deadzone,
            inverted: record.inverted,
        }
    }

    fn record(&self) -> CalibrationRecord {
        CalibrationRecord {
            min: self.min,
            center: self.center,
            max: self.max,
            deadzone: self.deadzone,
            inverted: self.inverted,
        }
    }
}

/// Directory of saved profiles.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    directory: PathBuf,
    default_policy: ConversionPolicy,
}

impl ProfileStore {
    /// Creates a store rooted at `directory`. The directory is created on
    /// first save.
    pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
        Self {
            directory: directory.into(),
            default_policy: ConversionPolicy::default(),
        }
    }

    /// Sets the conversion policy used for default profiles.
    #[must_use]
    pub fn with_default_policy(mut self, policy: ConversionPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// File a profile for `identity` is stored in.
    #[must_use]
    pub fn path_for(&self, identity: &DeviceIdentity) -> PathBuf {
        self.directory.join(format!("{}.toml", identity))
    }

    /// Default profile for a device.
    #[must_use]
    pub fn defaults(&self, descriptor: &DeviceDescriptor) -> Profile {
        Profile::with_policy(descriptor, self.default_policy)
    }

    /// Loads the saved profile for a device.
    ///
    /// # Returns
    ///
    /// The saved profile, or defaults when none exists.
    ///
    /// # Errors
    ///
    /// - [`JoycalError::ConfigCorrupt`] if the file cannot be parsed, has an
    ///   unknown format version, belongs to another identity, or holds
    ///   invalid mapping/calibration data
    /// - [`JoycalError::Io`] if the file exists but cannot be read
    pub fn load(&self, descriptor: &DeviceDescriptor) -> Result<Profile> {
        let identity = descriptor.identity();
        let path = self.path_for(&identity);

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No saved profile for {}, using defaults", identity);
                return Ok(self.defaults(descriptor));
            }
            Err(e) => return Err(e.into()),
        };

        let corrupt = |reason: String| JoycalError::ConfigCorrupt {
            path: path.display().to_string(),
            reason,
        };

        let contents =
            String::from_utf8(bytes).map_err(|e| corrupt(format!("not valid UTF-8: {}", e)))?;
        let file: ProfileFile = toml::from_str(&contents).map_err(|e| corrupt(e.to_string()))?;

        if file.format_version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version {} (expected {})",
                file.format_version, FORMAT_VERSION
            )));
        }
        if file.identity != identity {
            return Err(corrupt(format!(
                "profile belongs to {}, not {}",
                file.identity, identity
            )));
        }

        let profile = decode_profile(file).map_err(|e| corrupt(e.to_string()))?;
        info!("Loaded profile {}", path.display());
        Ok(profile)
    }

    /// Loads the saved profile, falling back to defaults on any error.
    pub fn load_or_default(&self, descriptor: &DeviceDescriptor) -> Profile {
        self.load(descriptor).unwrap_or_else(|e| {
            warn!("{}; using default profile", e);
            self.defaults(descriptor)
        })
    }

    /// Atomically writes the profile for a device.
    ///
    /// # Returns
    ///
    /// Path of the written file.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile is invalid, or the directory or file
    /// cannot be written.
    pub fn save(&self, descriptor: &DeviceDescriptor, profile: &Profile) -> Result<PathBuf> {
        profile.validate()?;

        let identity = descriptor.identity();
        let path = self.path_for(&identity);
        let file = ProfileFile {
            format_version: FORMAT_VERSION,
            identity,
            device_name: descriptor.name.clone(),
            saved_at: Utc::now(),
            mapping: MappingSection {
                axis_count: profile.mapping.logical_axis_count(),
                button_count: profile.mapping.logical_button_count(),
                conversion: *profile.mapping.policy(),
                entries: profile.mapping.entries().copied().collect(),
            },
            calibration: profile
                .calibration
                .iter()
                .enumerate()
                .map(|(axis, record)| AxisCalibration::new(axis, record))
                .collect(),
        };
        let contents = toml::to_string_pretty(&file)?;

        fs::create_dir_all(&self.directory)?;
        let mut tmp = NamedTempFile::new_in(&self.directory)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;

        info!("Saved profile {}", path.display());
        Ok(path)
    }

    /// Deletes the saved profile for an identity.
    ///
    /// Returns `false` if there was nothing to delete.
    ///
    /// # Errors
    ///
    /// Returns [`JoycalError::Io`] if the file exists but cannot be removed.
    pub fn remove(&self, identity: &DeviceIdentity) -> Result<bool> {
        let path = self.path_for(identity);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Removed profile {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn decode_profile(file: ProfileFile) -> Result<Profile> {
    let section = file.mapping;
    let mapping = MappingTable::from_parts(
        section.axis_count,
        section.button_count,
        section.conversion,
        section.entries,
    )?;

    let mut calibration = vec![CalibrationRecord::default(); mapping.logical_axis_count()];
    let mut seen = vec![false; calibration.len()];
    for entry in &file.calibration {
        if entry.axis >= calibration.len() {
            return Err(JoycalError::InvalidCalibration(format!(
                "axis {} out of range ({} logical axes)",
                entry.axis,
                calibration.len()
            )));
        }
        if seen[entry.axis] {
            return Err(JoycalError::InvalidCalibration(format!(
                "axis {} calibrated more than once",
                entry.axis
            )));
        }
        let record = entry.record();
        record.validate()?;
        calibration[entry.axis] = record;
        seen[entry.axis] = true;
    }

    Ok(Profile { mapping, calibration })
}
