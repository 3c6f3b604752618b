//! # joycal Library
//!
//! Inspect and calibrate joysticks exposed by Linux as `/dev/input/jsN`.
//!
//! This library owns the device handle, decodes raw samples, remaps and
//! calibrates them, keeps the current state for observers, and persists
//! mapping and calibration per device.

pub mod config;
pub mod error;
pub mod joystick;
pub mod profile;
