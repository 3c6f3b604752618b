//! # Joystick Event Decoder
//!
//! Turns raw records read from a Linux joystick device (`/dev/input/jsN`) into
//! typed [`RawSample`]s.
//!
//! ## Record Layout
//!
//! The joydev interface emits fixed 8-byte `struct js_event` records in native
//! byte order:
//!
//! | Offset | Size | Field | Description |
//! |--------|------|-------|-------------|
//! | 0 | 4 | `time` | Event timestamp in milliseconds |
//! | 4 | 2 | `value` | Axis position (-32767..32767) or button state (0/1) |
//! | 6 | 1 | `type` | `0x01` button, `0x02` axis, OR'd with `0x80` for init records |
//! | 7 | 1 | `number` | Physical axis or button index |
//!
//! Right after open the driver replays the current state of every input as
//! init records, so a fresh reader sees the full device state first.
//!
//! Decoding is purely syntactic. Records of the wrong size or unknown type are
//! reported as [`Decoded::Ignored`] and never stop the read loop.

use tracing::debug;

/// Size of one `js_event` record in bytes.
pub const JS_EVENT_SIZE: usize = 8;

/// Record type: button pressed/released.
pub const JS_EVENT_BUTTON: u8 = 0x01;

/// Record type: axis moved.
pub const JS_EVENT_AXIS: u8 = 0x02;

/// Flag set on synthetic records describing the initial device state.
pub const JS_EVENT_INIT: u8 = 0x80;

/// Largest axis magnitude reported by joydev.
pub const AXIS_MAGNITUDE: i32 = 32767;

/// Which kind of physical input a sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SampleKind {
    Axis,
    Button,
}

/// Value carried by a raw sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleValue {
    /// Raw signed axis position in the device's native range.
    Axis(i32),
    /// Button state, `true` when pressed.
    Button(bool),
}

/// A single decoded hardware sample, indexed by physical input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    /// Physical axis or button index as reported by the device.
    pub index: usize,
    /// Decoded value.
    pub value: SampleValue,
    /// Driver timestamp in milliseconds.
    pub timestamp_ms: u32,
    /// `true` for the synthetic records replayed right after open.
    pub initial: bool,
}

impl RawSample {
    /// Creates an axis sample with a zero timestamp.
    ///
    /// # Examples
    ///
    /// ```
    /// use joycal::joystick::decoder::{RawSample, SampleKind};
    ///
    /// let sample = RawSample::axis(2, -1200);
    /// assert_eq!(sample.kind(), SampleKind::Axis);
    /// ```
    #[must_use]
    pub fn axis(index: usize, value: i32) -> Self {
        Self {
            index,
            value: SampleValue::Axis(value),
            timestamp_ms: 0,
            initial: false,
        }
    }

    /// Creates a button sample with a zero timestamp.
    #[must_use]
    pub fn button(index: usize, pressed: bool) -> Self {
        Self {
            index,
            value: SampleValue::Button(pressed),
            timestamp_ms: 0,
            initial: false,
        }
    }

    /// Returns the kind of physical input that produced this sample.
    #[must_use]
    pub fn kind(&self) -> SampleKind {
        match self.value {
            SampleValue::Axis(_) => SampleKind::Axis,
            SampleValue::Button(_) => SampleKind::Button,
        }
    }
}

/// Why a record was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Record was not exactly [`JS_EVENT_SIZE`] bytes long.
    BadLength(usize),
    /// Record type byte is neither button nor axis.
    UnknownType(u8),
}

/// Outcome of decoding one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    Sample(RawSample),
    Ignored(IgnoreReason),
}

/// Stateless `js_event` decoder with diagnostic counters.
///
/// # Examples
///
/// ```
/// use joycal::joystick::decoder::{Decoded, EventDecoder, SampleValue};
///
/// let mut decoder = EventDecoder::new();
///
/// // time = 10ms, value = 1, type = button, number = 3
/// let record = [10, 0, 0, 0, 1, 0, 0x01, 3];
/// match decoder.decode(&record) {
///     Decoded::Sample(sample) => {
///         assert_eq!(sample.index, 3);
///         assert_eq!(sample.value, SampleValue::Button(true));
///     }
///     Decoded::Ignored(reason) => panic!("unexpected: {:?}", reason),
/// }
/// ```
#[derive(Debug, Default)]
pub struct EventDecoder {
    decoded: u64,
    ignored: u64,
}

impl EventDecoder {
    /// Creates a decoder with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes one raw record.
    ///
    /// Never fails: malformed input yields [`Decoded::Ignored`].
    pub fn decode(&mut self, bytes: &[u8]) -> Decoded {
        let record: [u8; JS_EVENT_SIZE] = match bytes.try_into() {
            Ok(record) => record,
            Err(_) => return self.ignore(IgnoreReason::BadLength(bytes.len())),
        };

        let timestamp_ms = u32::from_ne_bytes([record[0], record[1], record[2], record[3]]);
        let raw_value = i16::from_ne_bytes([record[4], record[5]]);
        let event_type = record[6];
        let number = record[7];

        let value = match event_type & !JS_EVENT_INIT {
            JS_EVENT_BUTTON => SampleValue::Button(raw_value != 0),
            JS_EVENT_AXIS => SampleValue::Axis(i32::from(raw_value)),
            _ => return self.ignore(IgnoreReason::UnknownType(event_type)),
        };

        self.decoded += 1;
        Decoded::Sample(RawSample {
            index: usize::from(number),
            value,
            timestamp_ms,
            initial: event_type & JS_EVENT_INIT != 0,
        })
    }

    /// Number of records decoded into samples so far.
    #[must_use]
    pub fn decoded_count(&self) -> u64 {
        self.decoded
    }

    /// Number of records ignored so far.
    #[must_use]
    pub fn ignored_count(&self) -> u64 {
        self.ignored
    }

    fn ignore(&mut self, reason: IgnoreReason) -> Decoded {
        self.ignored += 1;
        debug!("Ignoring joystick record: {:?}", reason);
        Decoded::Ignored(reason)
    }
}

/// Encodes a `js_event` record. Used to fabricate device input in tests.
#[cfg(test)]
pub(crate) fn encode_record(timestamp_ms: u32, value: i16, event_type: u8, number: u8) -> [u8; JS_EVENT_SIZE] {
    let mut record = [0u8; JS_EVENT_SIZE];
    record[0..4].copy_from_slice(&timestamp_ms.to_ne_bytes());
    record[4..6].copy_from_slice(&value.to_ne_bytes());
    record[6] = event_type;
    record[7] = number;
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(bytes: &[u8]) -> Decoded {
        EventDecoder::new().decode(bytes)
    }

    // ==================== Sample Decoding Tests ====================

    #[test]
    fn test_decode_axis_record() {
        let record = encode_record(1234, -16000, JS_EVENT_AXIS, 1);
        let expected = RawSample {
            index: 1,
            value: SampleValue::Axis(-16000),
            timestamp_ms: 1234,
            initial: false,
        };
        assert_eq!(decode_one(&record), Decoded::Sample(expected));
    }

    #[test]
    fn test_decode_button_pressed_and_released() {
        let pressed = encode_record(5, 1, JS_EVENT_BUTTON, 7);
        let released = encode_record(6, 0, JS_EVENT_BUTTON, 7);

        match decode_one(&pressed) {
            Decoded::Sample(sample) => assert_eq!(sample.value, SampleValue::Button(true)),
            other => panic!("Expected sample, got {:?}", other),
        }
        match decode_one(&released) {
            Decoded::Sample(sample) => assert_eq!(sample.value, SampleValue::Button(false)),
            other => panic!("Expected sample, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_button_any_nonzero_is_pressed() {
        let record = encode_record(0, -3, JS_EVENT_BUTTON, 0);
        match decode_one(&record) {
            Decoded::Sample(sample) => assert_eq!(sample.value, SampleValue::Button(true)),
            other => panic!("Expected sample, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_init_records() {
        let record = encode_record(0, 300, JS_EVENT_AXIS | JS_EVENT_INIT, 4);
        match decode_one(&record) {
            Decoded::Sample(sample) => {
                assert!(sample.initial);
                assert_eq!(sample.kind(), SampleKind::Axis);
                assert_eq!(sample.index, 4);
            }
            other => panic!("Expected sample, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_extreme_axis_values() {
        let record = encode_record(0, i16::MIN, JS_EVENT_AXIS, 0);
        match decode_one(&record) {
            Decoded::Sample(sample) => assert_eq!(sample.value, SampleValue::Axis(-32768)),
            other => panic!("Expected sample, got {:?}", other),
        }
    }

    // ==================== Malformed Record Tests ====================

    #[test]
    fn test_short_record_is_ignored() {
        assert_eq!(decode_one(&[1, 2, 3]), Decoded::Ignored(IgnoreReason::BadLength(3)));
        assert_eq!(decode_one(&[]), Decoded::Ignored(IgnoreReason::BadLength(0)));
    }

    #[test]
    fn test_long_record_is_ignored() {
        let bytes = [0u8; 12];
        assert_eq!(decode_one(&bytes), Decoded::Ignored(IgnoreReason::BadLength(12)));
    }

    #[test]
    fn test_unknown_type_is_ignored() {
        let record = encode_record(0, 1, 0x04, 0);
        assert_eq!(decode_one(&record), Decoded::Ignored(IgnoreReason::UnknownType(0x04)));

        let bare_init = encode_record(0, 1, JS_EVENT_INIT, 0);
        assert_eq!(
            decode_one(&bare_init),
            Decoded::Ignored(IgnoreReason::UnknownType(JS_EVENT_INIT))
        );
    }

    #[test]
    fn test_decoder_counters() {
        let mut decoder = EventDecoder::new();
        decoder.decode(&encode_record(0, 1, JS_EVENT_BUTTON, 0));
        decoder.decode(&encode_record(0, 1, 0x40, 0));
        decoder.decode(&[0u8; 3]);
        decoder.decode(&encode_record(0, 100, JS_EVENT_AXIS, 2));

        assert_eq!(decoder.decoded_count(), 2);
        assert_eq!(decoder.ignored_count(), 2);
    }

    // ==================== Helper Tests ====================

    #[test]
    fn test_sample_constructors() {
        let axis = RawSample::axis(3, 42);
        assert_eq!(axis.kind(), SampleKind::Axis);
        assert_eq!(axis.value, SampleValue::Axis(42));
        assert!(!axis.initial);

        let button = RawSample::button(1, true);
        assert_eq!(button.kind(), SampleKind::Button);
        assert_eq!(button.value, SampleValue::Button(true));
    }

    #[test]
    fn test_constants() {
        assert_eq!(JS_EVENT_SIZE, 8);
        assert_eq!(JS_EVENT_BUTTON, 0x01);
        assert_eq!(JS_EVENT_AXIS, 0x02);
        assert_eq!(JS_EVENT_INIT, 0x80);
        assert_eq!(AXIS_MAGNITUDE, 32767);
    }
}
