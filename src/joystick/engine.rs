//! # Input Engine
//!
//! Runs the per-device pipeline:
//!
//! ```text
//! read → decode → resolve (mapping) → normalize (calibration) → apply (state) → notify (bus)
//! ```
//!
//! The engine owns the mapping table and calibration records behind one
//! read-write lock (the pipeline reads, edits write), the [`StateStore`], the
//! [`EventBus`] and any open calibration sessions. A dispatch lock is held
//! while one sample goes from resolution to notification, so observers see
//! the notifications of one sample before any of the next.
//!
//! Observers run on the pipeline thread while the dispatch lock is held and
//! must not call [`InputEngine::process`] themselves.
//!
//! Code holding both the overlay lock and the session map takes the overlay
//! first.
//!
//! ## Usage
//!
//! ```
//! use std::path::PathBuf;
//! use joycal::joystick::decoder::RawSample;
//! use joycal::joystick::device::DeviceDescriptor;
//! use joycal::joystick::engine::InputEngine;
//! use joycal::profile::Profile;
//!
//! let descriptor = DeviceDescriptor {
//!     path: PathBuf::from("/dev/input/js0"),
//!     name: "Pad".to_string(),
//!     axis_count: 2,
//!     button_count: 1,
//!     driver_version: 0x020100,
//! };
//! let engine = InputEngine::new(descriptor.clone(), Profile::defaults(&descriptor))?;
//!
//! engine.process(&RawSample::axis(1, 32767));
//! assert_eq!(engine.snapshot().axes, vec![0.0, 1.0]);
//! # Ok::<(), joycal::error::JoycalError>(())
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use super::bus::{EventBus, Observer, SubscriptionId};
use super::calibration::{CalibrationEngine, CalibrationRecord, CalibrationSession};
use super::decoder::{RawSample, SampleKind};
use super::device::DeviceDescriptor;
use super::mapping::{ConversionPolicy, LogicalEvent, MappingEntry, MappingTable};
use super::source::SampleSource;
use super::state::{DeviceState, StateChange, StateStore};
use crate::error::{JoycalError, Result};
use crate::profile::Profile;

/// Pause between polls of a source that has nothing pending.
pub const IDLE_BACKOFF: Duration = Duration::from_millis(5);

struct Overlay {
    mapping: MappingTable,
    calibration: CalibrationEngine,
}

/// Mapping, calibration, state and observers of one device.
pub struct InputEngine {
    descriptor: DeviceDescriptor,
    overlay: RwLock<Overlay>,
    sessions: Mutex<HashMap<usize, CalibrationSession>>,
    store: StateStore,
    bus: EventBus,
    dispatch: Mutex<()>,
}

impl std::fmt::Debug for InputEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputEngine")
            .field("descriptor", &self.descriptor)
            .field("store", &self.store)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

impl InputEngine {
    /// Creates an engine whose state is sized from the profile's mapping.
    ///
    /// # Errors
    ///
    /// Returns [`JoycalError::InvalidCalibration`] if the profile does not
    /// hold one valid record per logical axis.
    pub fn new(descriptor: DeviceDescriptor, profile: Profile) -> Result<Self> {
        profile.validate()?;
        let store = StateStore::new(
            profile.mapping.logical_axis_count(),
            profile.mapping.logical_button_count(),
        );
        let calibration = CalibrationEngine::from_records(profile.calibration)?;

        Ok(Self {
            descriptor,
            overlay: RwLock::new(Overlay {
                mapping: profile.mapping,
                calibration,
            }),
            sessions: Mutex::new(HashMap::new()),
            store,
            bus: EventBus::new(),
            dispatch: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    // ---- Pipeline ----

    /// Runs one sample through the pipeline.
    ///
    /// Returns the applied change, or `None` when the sample was unmapped,
    /// disabled, or targeted a logical slot outside the state.
    pub fn process(&self, sample: &RawSample) -> Option<StateChange> {
        let _dispatch = self.dispatch.lock();

        let change = {
            let overlay = self.overlay.read();
            match overlay.mapping.resolve(sample)? {
                LogicalEvent::Axis { index, raw } => {
                    if let Some(session) = self.sessions.lock().get_mut(&index) {
                        session.observe(raw);
                    }
                    StateChange::Axis {
                        index,
                        value: overlay.calibration.normalize(index, raw),
                    }
                }
                LogicalEvent::AxisValue { index, value } => StateChange::Axis { index, value },
                LogicalEvent::Button { index, pressed } => StateChange::Button { index, pressed },
            }
        };

        if !self.store.apply(&change) {
            return None;
        }
        self.bus.notify(&change);
        Some(change)
    }

    // ---- State and observers ----

    /// Copy of the current logical state.
    #[must_use]
    pub fn snapshot(&self) -> DeviceState {
        self.store.snapshot()
    }

    #[must_use]
    pub fn state(&self) -> &StateStore {
        &self.store
    }

    pub fn subscribe(&self, observer: Arc<dyn Observer>) -> SubscriptionId {
        self.bus.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    // ---- Profile ----

    /// Current mapping and calibration, ready to be saved.
    #[must_use]
    pub fn profile(&self) -> Profile {
        let overlay = self.overlay.read();
        Profile {
            mapping: overlay.mapping.clone(),
            calibration: overlay.calibration.records().to_vec(),
        }
    }

    /// Replaces mapping and calibration. Open calibration sessions are
    /// discarded.
    ///
    /// # Errors
    ///
    /// - [`JoycalError::InvalidMapping`] if the profile's logical counts differ
    ///   from the live state
    /// - [`JoycalError::InvalidCalibration`] if the records are invalid
    pub fn load_profile(&self, profile: Profile) -> Result<()> {
        let (axes, buttons) = (self.store.axis_count(), self.store.button_count());
        if profile.mapping.logical_axis_count() != axes
            || profile.mapping.logical_button_count() != buttons
        {
            return Err(JoycalError::InvalidMapping(format!(
                "profile declares {} axes / {} buttons, state has {} / {}",
                profile.mapping.logical_axis_count(),
                profile.mapping.logical_button_count(),
                axes,
                buttons
            )));
        }
        profile.validate()?;
        let calibration = CalibrationEngine::from_records(profile.calibration)?;

        let mut overlay = self.overlay.write();
        *overlay = Overlay {
            mapping: profile.mapping,
            calibration,
        };
        // Sessions captured the old records; clear them under the same guard.
        self.sessions.lock().clear();
        drop(overlay);
        info!("Profile loaded for {}", self.descriptor.identity());
        Ok(())
    }

    // ---- Mapping edits ----

    #[must_use]
    pub fn mapping(&self) -> MappingTable {
        self.overlay.read().mapping.clone()
    }

    /// Adds or replaces a mapping entry. See [`MappingTable::set_entry`].
    pub fn set_mapping_entry(&self, entry: MappingEntry) -> Result<Option<MappingEntry>> {
        self.overlay.write().mapping.set_entry(entry)
    }

    pub fn remove_mapping_entry(&self, source: SampleKind, physical_index: usize) -> Option<MappingEntry> {
        self.overlay.write().mapping.remove_entry(source, physical_index)
    }

    /// Enables or disables a mapping entry. See [`MappingTable::set_enabled`].
    pub fn set_mapping_enabled(&self, source: SampleKind, physical_index: usize, enabled: bool) -> Result<()> {
        self.overlay.write().mapping.set_enabled(source, physical_index, enabled)
    }

    pub fn reset_mapping(&self) {
        self.overlay.write().mapping.reset_to_identity();
    }

    /// Replaces the axis↔button conversion policy.
    pub fn set_conversion_policy(&self, policy: ConversionPolicy) -> Result<()> {
        self.overlay.write().mapping.set_policy(policy)
    }

    // ---- Calibration ----

    #[must_use]
    pub fn calibration(&self) -> Vec<CalibrationRecord> {
        self.overlay.read().calibration.records().to_vec()
    }

    /// Replaces the record of one axis.
    pub fn set_calibration(&self, axis: usize, record: CalibrationRecord) -> Result<()> {
        self.overlay.write().calibration.set_record(axis, record)
    }

    /// Restores the default record of one axis.
    pub fn reset_calibration(&self, axis: usize) -> Result<()> {
        self.overlay.write().calibration.reset(axis)
    }

    /// Restores the default record of every axis.
    pub fn reset_all_calibration(&self) {
        self.overlay.write().calibration.reset_all();
    }

    /// Opens a calibration session for a logical axis.
    ///
    /// An already open session on the same axis is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`JoycalError::InvalidCalibration`] if the axis does not exist.
    pub fn begin_calibration(&self, axis: usize) -> Result<()> {
        let overlay = self.overlay.read();
        let session = overlay.calibration.begin_session(axis)?;
        if let Some(previous) = self.sessions.lock().insert(axis, session) {
            previous.discard();
        }
        drop(overlay);
        info!("Calibration started for axis {}", axis);
        Ok(())
    }

    /// Whether a session is open for the axis.
    #[must_use]
    pub fn is_calibrating(&self, axis: usize) -> bool {
        self.sessions.lock().contains_key(&axis)
    }

    /// Copy of the open session for progress display.
    #[must_use]
    pub fn calibration_session(&self, axis: usize) -> Option<CalibrationSession> {
        self.sessions.lock().get(&axis).cloned()
    }

    /// Pins the rest position of an open session.
    ///
    /// # Errors
    ///
    /// Returns [`JoycalError::NoCalibrationSession`] if none is open.
    pub fn set_calibration_center(&self, axis: usize, raw: i32) -> Result<()> {
        self.with_session(axis, |session| {
            session.set_center(raw);
            Ok(())
        })
    }

    /// Pins the rest position to the last observed raw value.
    ///
    /// # Errors
    ///
    /// - [`JoycalError::NoCalibrationSession`] if none is open
    /// - [`JoycalError::InvalidCalibration`] if nothing was observed yet
    pub fn center_calibration_on_last(&self, axis: usize) -> Result<i32> {
        self.with_session(axis, |session| {
            let raw = session.last_raw().ok_or_else(|| {
                JoycalError::InvalidCalibration(format!("no samples observed on axis {}", axis))
            })?;
            session.set_center(raw);
            Ok(raw)
        })
    }

    /// Closes the session and stores its record.
    ///
    /// # Errors
    ///
    /// Returns [`JoycalError::NoCalibrationSession`] if none is open.
    pub fn commit_calibration(&self, axis: usize) -> Result<CalibrationRecord> {
        let mut overlay = self.overlay.write();
        let session = self
            .sessions
            .lock()
            .remove(&axis)
            .ok_or(JoycalError::NoCalibrationSession(axis))?;
        let record = overlay.calibration.commit_session(session)?;
        drop(overlay);
        info!("Calibration committed for axis {}: {:?}", axis, record);
        Ok(record)
    }

    /// Closes the session without changing the record.
    ///
    /// # Errors
    ///
    /// Returns [`JoycalError::NoCalibrationSession`] if none is open.
    pub fn discard_calibration(&self, axis: usize) -> Result<()> {
        let session = self
            .sessions
            .lock()
            .remove(&axis)
            .ok_or(JoycalError::NoCalibrationSession(axis))?;
        session.discard();
        Ok(())
    }

    fn with_session<R>(&self, axis: usize, f: impl FnOnce(&mut CalibrationSession) -> Result<R>) -> Result<R> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(&axis)
            .ok_or(JoycalError::NoCalibrationSession(axis))?;
        f(session)
    }
}

/// Counters reported when a pipeline stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Samples read from the source.
    pub samples: u64,
    /// Samples that changed the state.
    pub changes: u64,
}

impl PipelineStats {
    fn record(&mut self, change: Option<StateChange>) {
        self.samples += 1;
        if change.is_some() {
            self.changes += 1;
        }
    }
}

/// Feeds samples from `source` into `engine` until the source disconnects.
///
/// Disconnection ends the pipeline normally. A source with nothing pending
/// is polled again after [`IDLE_BACKOFF`].
///
/// # Errors
///
/// Returns any error from the source other than
/// [`JoycalError::DeviceDisconnected`].
pub fn run<S: SampleSource + ?Sized>(engine: &InputEngine, source: &mut S) -> Result<PipelineStats> {
    let mut stats = PipelineStats::default();
    info!("Pipeline started for {}", engine.descriptor().path.display());

    loop {
        match source.read_next() {
            Ok(Some(sample)) => stats.record(engine.process(&sample)),
            Ok(None) => thread::sleep(IDLE_BACKOFF),
            Err(JoycalError::DeviceDisconnected(reason)) => {
                info!(
                    "Pipeline for {} stopped ({}): {} samples, {} changes",
                    engine.descriptor().path.display(),
                    reason,
                    stats.samples,
                    stats.changes
                );
                return Ok(stats);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Processes every sample currently pending on a non-blocking source.
///
/// # Errors
///
/// Returns any error from the source, including disconnection.
pub fn drain<S: SampleSource + ?Sized>(engine: &InputEngine, source: &mut S) -> Result<PipelineStats> {
    let mut stats = PipelineStats::default();
    while let Some(sample) = source.read_next()? {
        stats.record(engine.process(&sample));
    }
    debug!("Drained {} samples", stats.samples);
    Ok(stats)
}
