//! # Input Mapping Module
//!
//! Remaps physical axes and buttons to logical ones.
//!
//! ## Entry Kinds
//!
//! | Kind | Source | Target | Output |
//! |------|--------|--------|--------|
//! | `axis` | axis | axis | raw value, calibrated later |
//! | `button` | button | button | pressed state |
//! | `axis_to_button` | axis | button | pressed iff `\|raw\| > threshold * 32767` |
//! | `button_to_axis` | button | axis | pressed/released value, not calibrated |
//!
//! The table is keyed by `(source kind, physical index)`, so one physical
//! input maps to at most one logical output. Physical inputs without an entry,
//! or with a disabled entry, resolve to nothing.
//!
//! ## Usage
//!
//! ```
//! use joycal::joystick::decoder::RawSample;
//! use joycal::joystick::mapping::{LogicalEvent, MappingEntry, MappingKind, MappingTable};
//!
//! let mut table = MappingTable::identity(2, 4);
//! table.set_entry(MappingEntry::new(3, 1, MappingKind::ButtonToAxis))?;
//!
//! assert_eq!(
//!     table.resolve(&RawSample::button(3, true)),
//!     Some(LogicalEvent::AxisValue { index: 1, value: 1.0 })
//! );
//! # Ok::<(), joycal::error::JoycalError>(())
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::decoder::{RawSample, SampleKind, SampleValue, AXIS_MAGNITUDE};
use crate::error::{JoycalError, Result};

/// Default fraction of full deflection an axis must exceed to press a button.
pub const DEFAULT_AXIS_BUTTON_THRESHOLD: f32 = 0.5;

/// Default axis value for a pressed button mapped to an axis.
pub const DEFAULT_BUTTON_AXIS_PRESSED: f32 = 1.0;

/// Default axis value for a released button mapped to an axis.
pub const DEFAULT_BUTTON_AXIS_RELEASED: f32 = -1.0;

/// Upper bound on logical axis and button counts.
///
/// joydev reports counts as `u8`, so no device exposes more inputs than this.
pub const MAX_LOGICAL_INPUTS: usize = u8::MAX as usize + 1;

/// How a physical input is turned into a logical one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingKind {
    Axis,
    Button,
    AxisToButton,
    ButtonToAxis,
}

impl MappingKind {
    /// Kind of physical input this mapping consumes.
    #[must_use]
    pub fn source(self) -> SampleKind {
        match self {
            MappingKind::Axis | MappingKind::AxisToButton => SampleKind::Axis,
            MappingKind::Button | MappingKind::ButtonToAxis => SampleKind::Button,
        }
    }

    /// Kind of logical input this mapping produces.
    #[must_use]
    pub fn target(self) -> SampleKind {
        match self {
            MappingKind::Axis | MappingKind::ButtonToAxis => SampleKind::Axis,
            MappingKind::Button | MappingKind::AxisToButton => SampleKind::Button,
        }
    }
}

/// One physical → logical association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub physical_index: usize,
    pub logical_index: usize,
    pub kind: MappingKind,
    pub enabled: bool,
}

impl MappingEntry {
    /// Creates an enabled entry.
    #[must_use]
    pub fn new(physical_index: usize, logical_index: usize, kind: MappingKind) -> Self {
        Self {
            physical_index,
            logical_index,
            kind,
            enabled: true,
        }
    }

    fn key(&self) -> (SampleKind, usize) {
        (self.kind.source(), self.physical_index)
    }
}

/// Thresholds and values used by the axis↔button conversions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConversionPolicy {
    /// Fraction of [`AXIS_MAGNITUDE`], exclusive, in `(0, 1)`.
    pub axis_button_threshold: f32,
    /// Axis value emitted while the button is pressed, in `[-1, 1]`.
    pub button_axis_pressed: f32,
    /// Axis value emitted while the button is released, in `[-1, 1]`.
    pub button_axis_released: f32,
}

impl Default for ConversionPolicy {
    fn default() -> Self {
        Self {
            axis_button_threshold: DEFAULT_AXIS_BUTTON_THRESHOLD,
            button_axis_pressed: DEFAULT_BUTTON_AXIS_PRESSED,
            button_axis_released: DEFAULT_BUTTON_AXIS_RELEASED,
        }
    }
}

impl ConversionPolicy {
    /// Creates a validated policy.
    ///
    /// # Errors
    ///
    /// Returns [`JoycalError::InvalidMapping`] when a value is out of range.
    pub fn new(threshold: f32, pressed: f32, released: f32) -> Result<Self> {
        let policy = Self {
            axis_button_threshold: threshold,
            button_axis_pressed: pressed,
            button_axis_released: released,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`JoycalError::InvalidMapping`] describing the first bad value.
    pub fn validate(&self) -> Result<()> {
        let t = self.axis_button_threshold;
        if !(t > 0.0 && t < 1.0) {
            return Err(JoycalError::InvalidMapping(format!(
                "axis_button_threshold must be in (0, 1), got {}",
                t
            )));
        }
        for (name, value) in [
            ("button_axis_pressed", self.button_axis_pressed),
            ("button_axis_released", self.button_axis_released),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(JoycalError::InvalidMapping(format!(
                    "{} must be in [-1, 1], got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Whether a raw axis value counts as a pressed button.
    #[must_use]
    pub fn axis_pressed(&self, raw: i32) -> bool {
        f64::from(raw).abs() > f64::from(self.axis_button_threshold) * f64::from(AXIS_MAGNITUDE)
    }

    /// Axis value for a button state.
    #[must_use]
    pub fn button_axis_value(&self, pressed: bool) -> f32 {
        if pressed {
            self.button_axis_pressed
        } else {
            self.button_axis_released
        }
    }
}

/// Result of resolving a raw sample through the table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogicalEvent {
    /// Logical axis with a raw value still to be calibrated.
    Axis { index: usize, raw: i32 },
    /// Logical axis with a final value (button-to-axis).
    AxisValue { index: usize, value: f32 },
    /// Logical button.
    Button { index: usize, pressed: bool },
}

/// Physical → logical mapping for one device.
///
/// Declares the logical axis and button counts the device state is sized
/// from. Every entry targets a logical index inside those counts.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingTable {
    axis_count: usize,
    button_count: usize,
    policy: ConversionPolicy,
    entries: BTreeMap<(SampleKind, usize), MappingEntry>,
}

impl MappingTable {
    /// Identity mapping: physical axis `i` → logical axis `i`, same for buttons.
    #[must_use]
    pub fn identity(axis_count: usize, button_count: usize) -> Self {
        let mut table = Self {
            axis_count,
            button_count,
            policy: ConversionPolicy::default(),
            entries: BTreeMap::new(),
        };
        table.fill_identity();
        table
    }

    /// Rebuilds a table from stored parts.
    ///
    /// # Errors
    ///
    /// Returns [`JoycalError::InvalidMapping`] if a count exceeds
    /// [`MAX_LOGICAL_INPUTS`], the policy is out of range, an entry targets a
    /// logical index beyond the declared counts, or two entries share a
    /// physical input.
    pub fn from_parts(
        axis_count: usize,
        button_count: usize,
        policy: ConversionPolicy,
        entries: impl IntoIterator<Item = MappingEntry>,
    ) -> Result<Self> {
        if axis_count > MAX_LOGICAL_INPUTS || button_count > MAX_LOGICAL_INPUTS {
            return Err(JoycalError::InvalidMapping(format!(
                "{} axes and {} buttons exceed the limit of {}",
                axis_count, button_count, MAX_LOGICAL_INPUTS
            )));
        }
        policy.validate()?;
        let mut table = Self {
            axis_count,
            button_count,
            policy,
            entries: BTreeMap::new(),
        };
        for entry in entries {
            table.check(&entry)?;
            if table.entries.insert(entry.key(), entry).is_some() {
                return Err(JoycalError::InvalidMapping(format!(
                    "physical {:?} {} is mapped more than once",
                    entry.kind.source(),
                    entry.physical_index
                )));
            }
        }
        Ok(table)
    }

    /// Number of logical axes.
    #[must_use]
    pub fn logical_axis_count(&self) -> usize {
        self.axis_count
    }

    /// Number of logical buttons.
    #[must_use]
    pub fn logical_button_count(&self) -> usize {
        self.button_count
    }

    /// Active conversion policy.
    #[must_use]
    pub fn policy(&self) -> &ConversionPolicy {
        &self.policy
    }

    /// Replaces the conversion policy.
    ///
    /// # Errors
    ///
    /// Returns [`JoycalError::InvalidMapping`] if the policy is out of range.
    pub fn set_policy(&mut self, policy: ConversionPolicy) -> Result<()> {
        policy.validate()?;
        debug!("Conversion policy set to {:?}", policy);
        self.policy = policy;
        Ok(())
    }

    /// Entries ordered by source kind (axes first) then physical index.
    pub fn entries(&self) -> impl Iterator<Item = &MappingEntry> {
        self.entries.values()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when no physical input is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for a physical input.
    #[must_use]
    pub fn entry(&self, source: SampleKind, physical_index: usize) -> Option<&MappingEntry> {
        self.entries.get(&(source, physical_index))
    }

    /// Resolves a raw sample to at most one logical event.
    #[must_use]
    pub fn resolve(&self, sample: &RawSample) -> Option<LogicalEvent> {
        let entry = self.entries.get(&(sample.kind(), sample.index))?;
        if !entry.enabled {
            return None;
        }

        let index = entry.logical_index;
        match (entry.kind, sample.value) {
            (MappingKind::Axis, SampleValue::Axis(raw)) => Some(LogicalEvent::Axis { index, raw }),
            (MappingKind::AxisToButton, SampleValue::Axis(raw)) => Some(LogicalEvent::Button {
                index,
                pressed: self.policy.axis_pressed(raw),
            }),
            (MappingKind::Button, SampleValue::Button(pressed)) => {
                Some(LogicalEvent::Button { index, pressed })
            }
            (MappingKind::ButtonToAxis, SampleValue::Button(pressed)) => {
                Some(LogicalEvent::AxisValue {
                    index,
                    value: self.policy.button_axis_value(pressed),
                })
            }
            // Keys are derived from the entry kind, so sources always agree
            _ => None,
        }
    }

    /// Adds or replaces the entry for a physical input.
    ///
    /// Returns the entry it replaced, if any.
    ///
    /// # Errors
    ///
    /// Returns [`JoycalError::InvalidMapping`] if the logical index is beyond
    /// the declared count for the entry's target kind.
    pub fn set_entry(&mut self, entry: MappingEntry) -> Result<Option<MappingEntry>> {
        self.check(&entry)?;
        debug!("Mapping entry set: {:?}", entry);
        Ok(self.entries.insert(entry.key(), entry))
    }

    /// Removes the entry for a physical input, leaving it unmapped.
    pub fn remove_entry(&mut self, source: SampleKind, physical_index: usize) -> Option<MappingEntry> {
        let removed = self.entries.remove(&(source, physical_index));
        if removed.is_some() {
            debug!("Mapping entry removed: {:?} {}", source, physical_index);
        }
        removed
    }

    /// Enables or disables the entry for a physical input.
    ///
    /// # Errors
    ///
    /// Returns [`JoycalError::InvalidMapping`] if the input has no entry.
    pub fn set_enabled(&mut self, source: SampleKind, physical_index: usize, enabled: bool) -> Result<()> {
        let entry = self.entries.get_mut(&(source, physical_index)).ok_or_else(|| {
            JoycalError::InvalidMapping(format!(
                "physical {:?} {} has no mapping entry",
                source, physical_index
            ))
        })?;
        entry.enabled = enabled;
        debug!("Mapping entry {:?} {} enabled={}", source, physical_index, enabled);
        Ok(())
    }

    /// Drops every edit and restores the identity mapping.
    ///
    /// Logical counts and the conversion policy are kept.
    pub fn reset_to_identity(&mut self) {
        self.entries.clear();
        self.fill_identity();
        debug!("Mapping reset to identity");
    }

    fn fill_identity(&mut self) {
        for i in 0..self.axis_count {
            let entry = MappingEntry::new(i, i, MappingKind::Axis);
            self.entries.insert(entry.key(), entry);
        }
        for i in 0..self.button_count {
            let entry = MappingEntry::new(i, i, MappingKind::Button);
            self.entries.insert(entry.key(), entry);
        }
    }

    fn check(&self, entry: &MappingEntry) -> Result<()> {
        let (count, what) = match entry.kind.target() {
            SampleKind::Axis => (self.axis_count, "axis"),
            SampleKind::Button => (self.button_count, "button"),
        };
        if entry.logical_index >= count {
            return Err(JoycalError::InvalidMapping(format!(
                "logical {} {} out of range (table declares {})",
                what, entry.logical_index, count
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Identity Tests ====================

    #[test]
    fn test_identity_table() {
        let table = MappingTable::identity(3, 2);
        assert_eq!(table.logical_axis_count(), 3);
        assert_eq!(table.logical_button_count(), 2);
        assert_eq!(table.len(), 5);

        assert_eq!(
            table.resolve(&RawSample::axis(2, -100)),
            Some(LogicalEvent::Axis { index: 2, raw: -100 })
        );
        assert_eq!(
            table.resolve(&RawSample::button(1, true)),
            Some(LogicalEvent::Button { index: 1, pressed: true })
        );
    }

    #[test]
    fn test_entries_are_ordered_axes_first() {
        let table = MappingTable::identity(2, 2);
        let kinds: Vec<_> = table.entries().map(|e| (e.kind, e.physical_index)).collect();
        assert_eq!(
            kinds,
            vec![
                (MappingKind::Axis, 0),
                (MappingKind::Axis, 1),
                (MappingKind::Button, 0),
                (MappingKind::Button, 1),
            ]
        );
    }

    #[test]
    fn test_empty_table() {
        let table = MappingTable::identity(0, 0);
        assert!(table.is_empty());
        assert_eq!(table.resolve(&RawSample::axis(0, 1)), None);
    }

    // ==================== Resolve Tests ====================

    #[test]
    fn test_out_of_range_physical_index_resolves_to_nothing() {
        let table = MappingTable::identity(2, 2);
        assert_eq!(table.resolve(&RawSample::axis(9, 1000)), None);
        assert_eq!(table.resolve(&RawSample::button(200, true)), None);
    }

    #[test]
    fn test_disabled_entry_swallows_sample() {
        let mut table = MappingTable::identity(2, 2);
        table.set_enabled(SampleKind::Button, 1, false).unwrap();
        assert_eq!(table.resolve(&RawSample::button(1, true)), None);

        table.set_enabled(SampleKind::Button, 1, true).unwrap();
        assert!(table.resolve(&RawSample::button(1, true)).is_some());
    }

    #[test]
    fn test_removed_entry_resolves_to_nothing() {
        let mut table = MappingTable::identity(2, 2);
        let removed = table.remove_entry(SampleKind::Axis, 0).unwrap();
        assert_eq!(removed.kind, MappingKind::Axis);
        assert_eq!(table.resolve(&RawSample::axis(0, 500)), None);
        assert!(table.remove_entry(SampleKind::Axis, 0).is_none());
    }

    #[test]
    fn test_axis_remap_swaps_indices() {
        let mut table = MappingTable::identity(2, 0);
        table.set_entry(MappingEntry::new(0, 1, MappingKind::Axis)).unwrap();
        table.set_entry(MappingEntry::new(1, 0, MappingKind::Axis)).unwrap();

        assert_eq!(
            table.resolve(&RawSample::axis(0, 7)),
            Some(LogicalEvent::Axis { index: 1, raw: 7 })
        );
        assert_eq!(
            table.resolve(&RawSample::axis(1, 8)),
            Some(LogicalEvent::Axis { index: 0, raw: 8 })
        );
    }

    #[test]
    fn test_axis_to_button_threshold_is_strict() {
        let mut table = MappingTable::identity(1, 1);
        table.set_entry(MappingEntry::new(0, 0, MappingKind::AxisToButton)).unwrap();

        // 0.5 * 32767 = 16383.5
        let pressed = |raw| match table.resolve(&RawSample::axis(0, raw)) {
            Some(LogicalEvent::Button { index: 0, pressed }) => pressed,
            other => panic!("Expected button event, got {:?}", other),
        };
        assert!(!pressed(0));
        assert!(!pressed(16383));
        assert!(pressed(16384));
        assert!(pressed(-16384));
        assert!(!pressed(-16383));
        assert!(pressed(32767));
    }

    #[test]
    fn test_axis_to_button_custom_threshold() {
        let mut table = MappingTable::identity(1, 1);
        table.set_entry(MappingEntry::new(0, 0, MappingKind::AxisToButton)).unwrap();
        table.set_policy(ConversionPolicy::new(0.9, 1.0, -1.0).unwrap()).unwrap();

        assert_eq!(
            table.resolve(&RawSample::axis(0, 20000)),
            Some(LogicalEvent::Button { index: 0, pressed: false })
        );
        assert_eq!(
            table.resolve(&RawSample::axis(0, 30000)),
            Some(LogicalEvent::Button { index: 0, pressed: true })
        );
    }

    #[test]
    fn test_button_to_axis_default_values() {
        let mut table = MappingTable::identity(6, 4);
        table.set_entry(MappingEntry::new(3, 5, MappingKind::ButtonToAxis)).unwrap();

        assert_eq!(
            table.resolve(&RawSample::button(3, true)),
            Some(LogicalEvent::AxisValue { index: 5, value: 1.0 })
        );
        assert_eq!(
            table.resolve(&RawSample::button(3, false)),
            Some(LogicalEvent::AxisValue { index: 5, value: -1.0 })
        );
    }

    #[test]
    fn test_button_to_axis_custom_rest_value() {
        let mut table = MappingTable::identity(1, 1);
        table.set_entry(MappingEntry::new(0, 0, MappingKind::ButtonToAxis)).unwrap();
        table.set_policy(ConversionPolicy::new(0.5, 1.0, 0.0).unwrap()).unwrap();

        assert_eq!(
            table.resolve(&RawSample::button(0, false)),
            Some(LogicalEvent::AxisValue { index: 0, value: 0.0 })
        );
    }

    // ==================== Edit Tests ====================

    #[test]
    fn test_set_entry_replaces_existing_source() {
        let mut table = MappingTable::identity(2, 2);
        let previous = table
            .set_entry(MappingEntry::new(0, 1, MappingKind::AxisToButton))
            .unwrap()
            .unwrap();
        assert_eq!(previous.kind, MappingKind::Axis);

        // Still one entry per physical axis
        assert_eq!(table.len(), 4);
        assert_eq!(table.entry(SampleKind::Axis, 0).unwrap().kind, MappingKind::AxisToButton);
    }

    #[test]
    fn test_set_entry_rejects_out_of_range_logical() {
        let mut table = MappingTable::identity(2, 2);
        assert!(matches!(
            table.set_entry(MappingEntry::new(0, 2, MappingKind::Axis)),
            Err(JoycalError::InvalidMapping(_))
        ));
        // Checked against the target kind, not the source kind
        assert!(table.set_entry(MappingEntry::new(0, 5, MappingKind::AxisToButton)).is_err());
        assert!(table.set_entry(MappingEntry::new(0, 1, MappingKind::AxisToButton)).is_ok());
    }

    #[test]
    fn test_set_enabled_unknown_entry() {
        let mut table = MappingTable::identity(1, 1);
        assert!(table.set_enabled(SampleKind::Axis, 4, false).is_err());
    }

    #[test]
    fn test_reset_to_identity_keeps_policy() {
        let mut table = MappingTable::identity(2, 2);
        let policy = ConversionPolicy::new(0.25, 0.5, -0.5).unwrap();
        table.set_policy(policy).unwrap();
        table.set_entry(MappingEntry::new(1, 0, MappingKind::ButtonToAxis)).unwrap();
        table.remove_entry(SampleKind::Axis, 0);

        table.reset_to_identity();

        assert_eq!(table.policy(), &policy);
        let mut expected = MappingTable::identity(2, 2);
        expected.set_policy(policy).unwrap();
        assert_eq!(table, expected);
    }

    #[test]
    fn test_from_parts_roundtrip() {
        let mut table = MappingTable::identity(3, 4);
        table.set_entry(MappingEntry::new(2, 0, MappingKind::AxisToButton)).unwrap();
        table.set_enabled(SampleKind::Button, 1, false).unwrap();

        let rebuilt = MappingTable::from_parts(
            table.logical_axis_count(),
            table.logical_button_count(),
            *table.policy(),
            table.entries().copied().collect::<Vec<_>>(),
        )
        .unwrap();
        assert_eq!(rebuilt, table);
    }

    #[test]
    fn test_from_parts_rejects_duplicate_source() {
        let entries = vec![
            MappingEntry::new(0, 0, MappingKind::Axis),
            MappingEntry::new(0, 0, MappingKind::AxisToButton),
        ];
        let result = MappingTable::from_parts(1, 1, ConversionPolicy::default(), entries);
        assert!(matches!(result, Err(JoycalError::InvalidMapping(_))));
    }

    #[test]
    fn test_from_parts_rejects_bad_policy() {
        let policy = ConversionPolicy {
            axis_button_threshold: 1.5,
            ..ConversionPolicy::default()
        };
        assert!(MappingTable::from_parts(1, 1, policy, Vec::new()).is_err());
    }

    #[test]
    fn test_from_parts_rejects_oversized_counts() {
        let policy = ConversionPolicy::default();

        let result = MappingTable::from_parts(usize::MAX, 1, policy, Vec::new());
        assert!(matches!(result, Err(JoycalError::InvalidMapping(_))));
        let result = MappingTable::from_parts(1, MAX_LOGICAL_INPUTS + 1, policy, Vec::new());
        assert!(matches!(result, Err(JoycalError::InvalidMapping(_))));

        let table =
            MappingTable::from_parts(MAX_LOGICAL_INPUTS, MAX_LOGICAL_INPUTS, policy, Vec::new())
                .unwrap();
        assert_eq!(table.logical_axis_count(), MAX_LOGICAL_INPUTS);
    }

    // ==================== Policy Tests ====================

    #[test]
    fn test_policy_defaults() {
        let policy = ConversionPolicy::default();
        assert_eq!(policy.axis_button_threshold, 0.5);
        assert_eq!(policy.button_axis_value(true), 1.0);
        assert_eq!(policy.button_axis_value(false), -1.0);
    }

    #[test]
    fn test_policy_validation() {
        assert!(ConversionPolicy::new(0.0, 1.0, -1.0).is_err());
        assert!(ConversionPolicy::new(1.0, 1.0, -1.0).is_err());
        assert!(ConversionPolicy::new(f32::NAN, 1.0, -1.0).is_err());
        assert!(ConversionPolicy::new(0.5, 1.5, -1.0).is_err());
        assert!(ConversionPolicy::new(0.5, 1.0, -1.01).is_err());
        assert!(ConversionPolicy::new(0.01, -1.0, 1.0).is_ok());
    }

    #[test]
    fn test_kind_source_and_target() {
        assert_eq!(MappingKind::AxisToButton.source(), SampleKind::Axis);
        assert_eq!(MappingKind::AxisToButton.target(), SampleKind::Button);
        assert_eq!(MappingKind::ButtonToAxis.source(), SampleKind::Button);
        assert_eq!(MappingKind::ButtonToAxis.target(), SampleKind::Axis);
        assert_eq!(MappingKind::Axis.target(), SampleKind::Axis);
        assert_eq!(MappingKind::Button.source(), SampleKind::Button);
    }
}
