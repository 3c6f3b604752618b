//! Authoritative snapshot of logical axis and button values.

use parking_lot::RwLock;
use tracing::warn;

/// Logical state of one device.
///
/// Lengths are fixed at creation from the mapping table's logical counts.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    /// Normalized axis values in `-1.0..=1.0`.
    pub axes: Vec<f32>,
    /// Button states, `true` when pressed.
    pub buttons: Vec<bool>,
}

impl DeviceState {
    /// All axes centered, all buttons released.
    #[must_use]
    pub fn new(axis_count: usize, button_count: usize) -> Self {
        Self {
            axes: vec![0.0; axis_count],
            buttons: vec![false; button_count],
        }
    }
}

/// A single logical slot update, as delivered to observers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StateChange {
    Axis { index: usize, value: f32 },
    Button { index: usize, pressed: bool },
}

/// Single-writer, many-reader store for [`DeviceState`].
#[derive(Debug)]
pub struct StateStore {
    state: RwLock<DeviceState>,
}

impl StateStore {
    #[must_use]
    pub fn new(axis_count: usize, button_count: usize) -> Self {
        Self {
            state: RwLock::new(DeviceState::new(axis_count, button_count)),
        }
    }

    /// Number of logical axes.
    #[must_use]
    pub fn axis_count(&self) -> usize {
        self.state.read().axes.len()
    }

    /// Number of logical buttons.
    #[must_use]
    pub fn button_count(&self) -> usize {
        self.state.read().buttons.len()
    }

    /// Writes one slot.
    ///
    /// Returns `false`, leaving the state untouched, when the index is out of
    /// range.
    pub fn apply(&self, change: &StateChange) -> bool {
        let mut state = self.state.write();
        match *change {
            StateChange::Axis { index, value } => {
                if let Some(slot) = state.axes.get_mut(index) {
                    *slot = value;
                    return true;
                }
            }
            StateChange::Button { index, pressed } => {
                if let Some(slot) = state.buttons.get_mut(index) {
                    *slot = pressed;
                    return true;
                }
            }
        }
        warn!("Rejected out-of-range state change: {:?}", change);
        false
    }

    /// Copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> DeviceState {
        self.state.read().clone()
    }

    /// Value of one logical axis.
    #[must_use]
    pub fn axis(&self, index: usize) -> Option<f32> {
        self.state.read().axes.get(index).copied()
    }

    /// State of one logical button.
    #[must_use]
    pub fn button(&self, index: usize) -> Option<bool> {
        self.state.read().buttons.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new_store_is_at_rest() {
        let store = StateStore::new(3, 2);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.axes, vec![0.0; 3]);
        assert_eq!(snapshot.buttons, vec![false; 2]);
        assert_eq!(store.axis_count(), 3);
        assert_eq!(store.button_count(), 2);
    }

    #[test]
    fn test_apply_updates_one_slot() {
        let store = StateStore::new(2, 2);
        assert!(store.apply(&StateChange::Axis { index: 1, value: -0.25 }));
        assert!(store.apply(&StateChange::Button { index: 0, pressed: true }));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.axes, vec![0.0, -0.25]);
        assert_eq!(snapshot.buttons, vec![true, false]);
        assert_eq!(store.axis(1), Some(-0.25));
        assert_eq!(store.button(0), Some(true));
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        let store = StateStore::new(1, 1);
        let before = store.snapshot();

        assert!(!store.apply(&StateChange::Axis { index: 1, value: 1.0 }));
        assert!(!store.apply(&StateChange::Button { index: 7, pressed: true }));

        assert_eq!(store.snapshot(), before);
        assert_eq!(store.axis(1), None);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let store = StateStore::new(1, 0);
        let snapshot = store.snapshot();
        store.apply(&StateChange::Axis { index: 0, value: 0.5 });
        assert_eq!(snapshot.axes[0], 0.0);
        assert_eq!(store.snapshot().axes[0], 0.5);
    }

    #[test]
    fn test_concurrent_readers_see_whole_state() {
        let store = Arc::new(StateStore::new(4, 4));
        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..1000 {
                    let value = if i % 2 == 0 { 1.0 } else { -1.0 };
                    store.apply(&StateChange::Axis { index: i % 4, value });
                }
            })
        };

        for _ in 0..1000 {
            let snapshot = store.snapshot();
            assert_eq!(snapshot.axes.len(), 4);
            assert_eq!(snapshot.buttons.len(), 4);
        }
        writer.join().unwrap();
    }
}
