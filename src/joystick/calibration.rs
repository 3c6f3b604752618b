//! # Calibration Module
//!
//! Normalizes raw axis positions into `-1.0..=1.0` using per-axis calibration
//! records, and learns new records from live input.
//!
//! ## Normalization
//!
//! Each logical axis has a [`CalibrationRecord`] `{min, center, max, deadzone,
//! inverted}`. A raw value is turned into a normalized value by:
//!
//! 1. `min == max`: the axis is always centered, result `0.0`
//! 2. `delta = raw - center`
//! 3. `|delta| <= deadzone`: result `0.0`
//! 4. Positive deltas scale against `max - center`, negative ones against
//!    `center - min`, clamped to `-1.0..=1.0`
//! 5. Negate when `inverted` is set
//!
//! A side with zero width yields `0.0`, so a record with `center == min`
//! behaves as a unidirectional axis in `0.0..=1.0` (pedals, triggers).
//!
//! ## Calibration Sessions
//!
//! A [`CalibrationSession`] watches the raw stream of one axis, tracking the
//! observed extremes, and produces a new record on commit. Discarding a
//! session leaves the current record untouched.
//!
//! ## Usage
//!
//! ```
//! use joycal::joystick::calibration::CalibrationRecord;
//!
//! let record = CalibrationRecord::new(-32767, 0, 32767, 500, false)?;
//!
//! // Inside the deadzone
//! assert_eq!(record.normalize(-500), 0.0);
//!
//! // Half deflection
//! assert!((record.normalize(16000) - 0.488).abs() < 0.001);
//! # Ok::<(), joycal::error::JoycalError>(())
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::decoder::AXIS_MAGNITUDE;
use crate::error::{JoycalError, Result};

/// Calibration parameters for one logical axis.
///
/// Invariant: `min <= center <= max`. Use [`CalibrationRecord::new`] or
/// [`CalibrationRecord::validate`] when building records from untrusted data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    /// Lowest raw value of the calibrated range.
    pub min: i32,
    /// Raw value of the rest position.
    pub center: i32,
    /// Highest raw value of the calibrated range.
    pub max: i32,
    /// Radius around `center`, in raw units, treated as exactly centered.
    pub deadzone: u32,
    /// Negate the normalized output.
    pub inverted: bool,
}

impl Default for CalibrationRecord {
    fn default() -> Self {
        Self::full_range()
    }
}

impl CalibrationRecord {
    /// Creates a validated record.
    ///
    /// # Errors
    ///
    /// Returns [`JoycalError::InvalidCalibration`] unless `min <= center <= max`.
    pub fn new(min: i32, center: i32, max: i32, deadzone: u32, inverted: bool) -> Result<Self> {
        let record = Self {
            min,
            center,
            max,
            deadzone,
            inverted,
        };
        record.validate()?;
        Ok(record)
    }

    /// Full native joydev range, no deadzone, not inverted.
    #[must_use]
    pub fn full_range() -> Self {
        Self {
            min: -AXIS_MAGNITUDE,
            center: 0,
            max: AXIS_MAGNITUDE,
            deadzone: 0,
            inverted: false,
        }
    }

    /// Checks the `min <= center <= max` invariant.
    ///
    /// # Errors
    ///
    /// Returns [`JoycalError::InvalidCalibration`] describing the violation.
    pub fn validate(&self) -> Result<()> {
        if self.min > self.center || self.center > self.max {
            return Err(JoycalError::InvalidCalibration(format!(
                "expected min <= center <= max, got min={} center={} max={}",
                self.min, self.center, self.max
            )));
        }
        Ok(())
    }

    /// Returns `true` when the record only covers one direction (`center == min`).
    #[must_use]
    pub fn is_unidirectional(&self) -> bool {
        self.center == self.min && self.min != self.max
    }

    /// Normalizes a raw axis value.
    ///
    /// Never fails and never divides by zero; see the module docs for the
    /// exact policy.
    #[must_use]
    pub fn normalize(&self, raw: i32) -> f32 {
        if self.min == self.max {
            return 0.0;
        }

        let delta = i64::from(raw) - i64::from(self.center);
        if delta.unsigned_abs() <= u64::from(self.deadzone) {
            return 0.0;
        }

        let span = if delta > 0 {
            i64::from(self.max) - i64::from(self.center)
        } else {
            i64::from(self.center) - i64::from(self.min)
        };
        if span <= 0 {
            return 0.0;
        }

        let scaled = (delta as f64 / span as f64).clamp(-1.0, 1.0) as f32;
        if self.inverted {
            -scaled
        } else {
            scaled
        }
    }
}

/// In-progress calibration of a single axis.
///
/// Feed it raw samples with [`observe`](Self::observe), optionally pin the
/// rest position with [`set_center`](Self::set_center), then
/// [`commit`](Self::commit) or [`discard`](Self::discard).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationSession {
    axis: usize,
    previous: CalibrationRecord,
    observed_min: Option<i32>,
    observed_max: Option<i32>,
    center: Option<i32>,
    last: Option<i32>,
    samples: u64,
}

impl CalibrationSession {
    /// Starts a session that will replace `previous` on commit.
    #[must_use]
    pub fn new(axis: usize, previous: CalibrationRecord) -> Self {
        Self {
            axis,
            previous,
            observed_min: None,
            observed_max: None,
            center: None,
            last: None,
            samples: 0,
        }
    }

    /// Logical axis this session calibrates.
    #[must_use]
    pub fn axis(&self) -> usize {
        self.axis
    }

    /// Record in effect when the session started.
    #[must_use]
    pub fn previous(&self) -> &CalibrationRecord {
        &self.previous
    }

    /// Number of raw samples observed.
    #[must_use]
    pub fn sample_count(&self) -> u64 {
        self.samples
    }

    /// Most recently observed raw value.
    #[must_use]
    pub fn last_raw(&self) -> Option<i32> {
        self.last
    }

    /// Observed `(min, max)` so far.
    #[must_use]
    pub fn observed_range(&self) -> Option<(i32, i32)> {
        self.observed_min.zip(self.observed_max)
    }

    /// Explicit center, if one was set.
    #[must_use]
    pub fn center(&self) -> Option<i32> {
        self.center
    }

    /// Records one raw sample.
    pub fn observe(&mut self, raw: i32) {
        self.observed_min = Some(self.observed_min.map_or(raw, |min| min.min(raw)));
        self.observed_max = Some(self.observed_max.map_or(raw, |max| max.max(raw)));
        self.last = Some(raw);
        self.samples += 1;
    }

    /// Pins the rest position.
    pub fn set_center(&mut self, raw: i32) {
        self.center = Some(raw);
    }

    /// Materializes the new record.
    ///
    /// Without observations the previous range is kept. Without an explicit
    /// center the midpoint of the range is used. The range is widened to
    /// contain the center, and deadzone/inversion carry over from the
    /// previous record.
    #[must_use]
    pub fn commit(self) -> CalibrationRecord {
        let (min, max) = self
            .observed_range()
            .unwrap_or((self.previous.min, self.previous.max));
        let center = self.center.unwrap_or_else(|| midpoint(min, max));

        let record = CalibrationRecord {
            min: min.min(center),
            center,
            max: max.max(center),
            deadzone: self.previous.deadzone,
            inverted: self.previous.inverted,
        };
        debug!(
            "Calibration session for axis {} committed after {} samples: {:?}",
            self.axis, self.samples, record
        );
        record
    }

    /// Drops the session without touching any record.
    pub fn discard(self) {
        debug!(
            "Calibration session for axis {} discarded after {} samples",
            self.axis, self.samples
        );
    }
}

fn midpoint(min: i32, max: i32) -> i32 {
    ((i64::from(min) + i64::from(max)) / 2) as i32
}

/// Calibration records for every logical axis of a device.
///
/// Axes past the end of the table normalize with the default record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationEngine {
    records: Vec<CalibrationRecord>,
}

impl CalibrationEngine {
    /// Creates an engine with full-range records for `axis_count` axes.
    #[must_use]
    pub fn new(axis_count: usize) -> Self {
        Self {
            records: vec![CalibrationRecord::default(); axis_count],
        }
    }

    /// Creates an engine from existing records, validating each.
    ///
    /// # Errors
    ///
    /// Returns [`JoycalError::InvalidCalibration`] naming the first bad axis.
    pub fn from_records(records: Vec<CalibrationRecord>) -> Result<Self> {
        if let Some(axis) = records.iter().position(|r| r.validate().is_err()) {
            let r = records[axis];
            return Err(JoycalError::InvalidCalibration(format!(
                "axis {}: expected min <= center <= max, got min={} center={} max={}",
                axis, r.min, r.center, r.max
            )));
        }
        Ok(Self { records })
    }

    /// Number of axes with a record.
    #[must_use]
    pub fn axis_count(&self) -> usize {
        self.records.len()
    }

    /// All records, indexed by logical axis.
    #[must_use]
    pub fn records(&self) -> &[CalibrationRecord] {
        &self.records
    }

    /// Record for one axis.
    #[must_use]
    pub fn record(&self, axis: usize) -> Option<&CalibrationRecord> {
        self.records.get(axis)
    }

    /// Replaces the record for one axis.
    ///
    /// # Errors
    ///
    /// Returns [`JoycalError::InvalidCalibration`] if the axis is unknown or
    /// the record violates its invariant.
    pub fn set_record(&mut self, axis: usize, record: CalibrationRecord) -> Result<()> {
        record.validate()?;
        let slot = self.slot_mut(axis)?;
        *slot = record;
        Ok(())
    }

    /// Normalizes a raw value for a logical axis.
    #[must_use]
    pub fn normalize(&self, axis: usize, raw: i32) -> f32 {
        self.records
            .get(axis)
            .copied()
            .unwrap_or_default()
            .normalize(raw)
    }

    /// Starts a calibration session for one axis.
    ///
    /// # Errors
    ///
    /// Returns [`JoycalError::InvalidCalibration`] if the axis is unknown.
    pub fn begin_session(&self, axis: usize) -> Result<CalibrationSession> {
        let previous = self.record(axis).copied().ok_or_else(|| unknown_axis(axis))?;
        Ok(CalibrationSession::new(axis, previous))
    }

    /// Commits a session and stores the resulting record.
    ///
    /// # Errors
    ///
    /// Returns [`JoycalError::InvalidCalibration`] if the session's axis is unknown.
    pub fn commit_session(&mut self, session: CalibrationSession) -> Result<CalibrationRecord> {
        let axis = session.axis();
        let record = session.commit();
        self.set_record(axis, record)?;
        Ok(record)
    }

    /// Restores the default record for one axis.
    ///
    /// # Errors
    ///
    /// Returns [`JoycalError::InvalidCalibration`] if the axis is unknown.
    pub fn reset(&mut self, axis: usize) -> Result<()> {
        let slot = self.slot_mut(axis)?;
        *slot = CalibrationRecord::default();
        Ok(())
    }

    /// Restores the default record for every axis.
    pub fn reset_all(&mut self) {
        for record in &mut self.records {
            *record = CalibrationRecord::default();
        }
    }

    fn slot_mut(&mut self, axis: usize) -> Result<&mut CalibrationRecord> {
        self.records.get_mut(axis).ok_or_else(|| unknown_axis(axis))
    }
}

fn unknown_axis(axis: usize) -> JoycalError {
    JoycalError::InvalidCalibration(format!("axis {} has no calibration record", axis))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stick(deadzone: u32, inverted: bool) -> CalibrationRecord {
        CalibrationRecord::new(-32767, 0, 32767, deadzone, inverted).unwrap()
    }

    // ==================== Record Tests ====================

    #[test]
    fn test_record_default_is_full_range() {
        let record = CalibrationRecord::default();
        assert_eq!(record.min, -32767);
        assert_eq!(record.center, 0);
        assert_eq!(record.max, 32767);
        assert_eq!(record.deadzone, 0);
        assert!(!record.inverted);
    }

    #[test]
    fn test_record_new_rejects_bad_ordering() {
        assert!(CalibrationRecord::new(10, 0, 20, 0, false).is_err());
        assert!(CalibrationRecord::new(0, 30, 20, 0, false).is_err());
        assert!(CalibrationRecord::new(0, 0, 0, 0, false).is_ok());
        assert!(CalibrationRecord::new(0, 0, 255, 0, false).is_ok());
    }

    #[test]
    fn test_unidirectional_detection() {
        assert!(CalibrationRecord::new(0, 0, 255, 0, false).unwrap().is_unidirectional());
        assert!(!stick(0, false).is_unidirectional());
        assert!(!CalibrationRecord::new(5, 5, 5, 0, false).unwrap().is_unidirectional());
    }

    // ==================== Normalization Tests ====================

    #[test]
    fn test_normalize_example_values() {
        let record = stick(500, false);
        assert!((record.normalize(16000) - 0.488).abs() < 0.001);
        assert_eq!(record.normalize(0), 0.0);
        assert_eq!(record.normalize(-500), 0.0);
        assert!((record.normalize(-16000) + 0.488).abs() < 0.001);
    }

    #[test]
    fn test_normalize_center_is_zero() {
        for center in [-1000, 0, 123, 30000] {
            let record = CalibrationRecord::new(-32767, center, 32767, 0, false).unwrap();
            assert_eq!(record.normalize(center), 0.0);
        }
    }

    #[test]
    fn test_normalize_endpoints() {
        let record = stick(0, false);
        assert!((record.normalize(32767) - 1.0).abs() < 1e-6);
        assert!((record.normalize(-32767) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_min_equals_max_always_zero() {
        let record = CalibrationRecord::new(100, 100, 100, 0, false).unwrap();
        for raw in [i32::MIN, -32768, -1, 0, 99, 100, 101, 32767, i32::MAX] {
            assert_eq!(record.normalize(raw), 0.0, "raw {}", raw);
        }

        let inverted = CalibrationRecord::new(100, 100, 100, 10, true).unwrap();
        assert_eq!(inverted.normalize(5000), 0.0);
    }

    #[test]
    fn test_normalize_deadzone_boundary_inclusive() {
        let record = CalibrationRecord::new(-1000, 100, 1000, 50, false).unwrap();

        assert_eq!(record.normalize(150), 0.0);
        assert_eq!(record.normalize(50), 0.0);
        assert!(record.normalize(151) > 0.0);
        assert!(record.normalize(49) < 0.0);
    }

    #[test]
    fn test_normalize_clamps_beyond_calibrated_range() {
        let record = CalibrationRecord::new(-20000, 0, 20000, 0, false).unwrap();
        assert_eq!(record.normalize(32767), 1.0);
        assert_eq!(record.normalize(-32768), -1.0);
        assert_eq!(record.normalize(i32::MAX), 1.0);
        assert_eq!(record.normalize(i32::MIN), -1.0);
    }

    #[test]
    fn test_normalize_asymmetric_sides() {
        let record = CalibrationRecord::new(-100, 0, 400, 0, false).unwrap();
        assert!((record.normalize(200) - 0.5).abs() < 1e-6);
        assert!((record.normalize(-50) + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_unidirectional_axis() {
        let pedal = CalibrationRecord::new(0, 0, 255, 0, false).unwrap();
        assert_eq!(pedal.normalize(0), 0.0);
        assert!((pedal.normalize(255) - 1.0).abs() < 1e-6);
        assert!((pedal.normalize(51) - 0.2).abs() < 1e-6);
        // Below the zero-width side stays at rest instead of dividing by zero
        assert_eq!(pedal.normalize(-40), 0.0);
    }

    #[test]
    fn test_normalize_is_monotonic() {
        let records = [
            stick(0, false),
            stick(500, false),
            CalibrationRecord::new(-12000, 300, 25000, 900, false).unwrap(),
            CalibrationRecord::new(0, 0, 255, 3, false).unwrap(),
        ];

        for record in records {
            let mut previous = f32::NEG_INFINITY;
            let mut raw = -40000;
            while raw <= 40000 {
                let value = record.normalize(raw);
                assert!(value >= previous, "{:?} not monotonic at {}", record, raw);
                assert!((-1.0..=1.0).contains(&value));
                previous = value;
                raw += 37;
            }
        }
    }

    #[test]
    fn test_inversion_negates() {
        let normal = CalibrationRecord::new(-30000, 250, 31000, 400, false).unwrap();
        let inverted = CalibrationRecord {
            inverted: true,
            ..normal
        };

        let mut raw = -33000;
        while raw <= 33000 {
            assert_eq!(inverted.normalize(raw), -normal.normalize(raw), "raw {}", raw);
            raw += 101;
        }
    }

    // ==================== Session Tests ====================

    #[test]
    fn test_session_tracks_range_and_last() {
        let mut session = CalibrationSession::new(0, CalibrationRecord::default());
        assert_eq!(session.observed_range(), None);

        for raw in [10, -500, 800, 3] {
            session.observe(raw);
        }

        assert_eq!(session.observed_range(), Some((-500, 800)));
        assert_eq!(session.last_raw(), Some(3));
        assert_eq!(session.sample_count(), 4);
    }

    #[test]
    fn test_session_commit_uses_explicit_center() {
        let previous = CalibrationRecord::new(-32767, 0, 32767, 250, true).unwrap();
        let mut session = CalibrationSession::new(2, previous);
        session.observe(-30000);
        session.observe(31000);
        session.set_center(120);

        let record = session.commit();
        assert_eq!(
            record,
            CalibrationRecord {
                min: -30000,
                center: 120,
                max: 31000,
                deadzone: 250,
                inverted: true,
            }
        );
    }

    #[test]
    fn test_session_commit_defaults_center_to_midpoint() {
        let mut session = CalibrationSession::new(0, CalibrationRecord::default());
        session.observe(0);
        session.observe(255);

        let record = session.commit();
        assert_eq!((record.min, record.center, record.max), (0, 127, 255));
        assert_eq!(record.deadzone, 0);
        assert!(!record.inverted);
    }

    #[test]
    fn test_session_commit_widens_range_to_center() {
        let mut session = CalibrationSession::new(0, CalibrationRecord::default());
        session.observe(100);
        session.observe(200);
        session.set_center(50);

        let record = session.commit();
        assert_eq!((record.min, record.center, record.max), (50, 50, 200));
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_session_commit_without_samples_keeps_range() {
        let previous = CalibrationRecord::new(-100, -10, 100, 5, false).unwrap();
        let session = CalibrationSession::new(0, previous);
        let record = session.commit();
        assert_eq!((record.min, record.center, record.max), (-100, 0, 100));
    }

    // ==================== Engine Tests ====================

    #[test]
    fn test_engine_new_has_default_records() {
        let engine = CalibrationEngine::new(3);
        assert_eq!(engine.axis_count(), 3);
        assert!(engine.records().iter().all(|r| *r == CalibrationRecord::default()));
    }

    #[test]
    fn test_engine_normalize_unknown_axis_uses_default() {
        let engine = CalibrationEngine::new(1);
        assert!((engine.normalize(7, 32767) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_engine_set_record() {
        let mut engine = CalibrationEngine::new(2);
        let record = stick(1000, true);
        engine.set_record(1, record).unwrap();
        assert_eq!(engine.record(1), Some(&record));
        assert!((engine.normalize(1, 32767) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_engine_set_record_rejects_bad_input() {
        let mut engine = CalibrationEngine::new(2);
        assert!(engine.set_record(5, stick(0, false)).is_err());

        let bad = CalibrationRecord {
            min: 10,
            center: 0,
            max: 20,
            deadzone: 0,
            inverted: false,
        };
        assert!(engine.set_record(0, bad).is_err());
        assert_eq!(engine.record(0), Some(&CalibrationRecord::default()));
    }

    #[test]
    fn test_engine_from_records_validates() {
        let good = vec![stick(0, false), stick(10, true)];
        assert_eq!(CalibrationEngine::from_records(good).unwrap().axis_count(), 2);

        let bad = vec![
            stick(0, false),
            CalibrationRecord {
                min: 0,
                center: 10,
                max: 5,
                deadzone: 0,
                inverted: false,
            },
        ];
        match CalibrationEngine::from_records(bad) {
            Err(JoycalError::InvalidCalibration(msg)) => assert!(msg.contains("axis 1")),
            other => panic!("Expected InvalidCalibration, got: {:?}", other),
        }
    }

    #[test]
    fn test_engine_session_roundtrip() {
        let mut engine = CalibrationEngine::new(2);
        let mut session = engine.begin_session(1).unwrap();
        session.observe(-20000);
        session.observe(22000);
        session.set_center(500);

        let committed = engine.commit_session(session).unwrap();
        assert_eq!(engine.record(1), Some(&committed));
        assert_eq!(engine.record(0), Some(&CalibrationRecord::default()));
    }

    #[test]
    fn test_engine_discarded_session_leaves_record() {
        let mut engine = CalibrationEngine::new(1);
        engine.set_record(0, stick(300, false)).unwrap();

        let mut session = engine.begin_session(0).unwrap();
        session.observe(5);
        session.discard();

        assert_eq!(engine.record(0), Some(&stick(300, false)));
    }

    #[test]
    fn test_engine_begin_session_unknown_axis() {
        let engine = CalibrationEngine::new(1);
        assert!(engine.begin_session(1).is_err());
    }

    #[test]
    fn test_engine_reset() {
        let mut engine = CalibrationEngine::new(2);
        engine.set_record(0, stick(100, true)).unwrap();
        engine.set_record(1, stick(200, true)).unwrap();

        engine.reset(0).unwrap();
        assert_eq!(engine.record(0), Some(&CalibrationRecord::default()));
        assert_eq!(engine.record(1), Some(&stick(200, true)));

        engine.reset_all();
        assert_eq!(engine.record(1), Some(&CalibrationRecord::default()));
        assert!(engine.reset(9).is_err());
    }
}
