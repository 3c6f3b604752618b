//! # Joystick Module
//!
//! Device access and the input pipeline for Linux joystick devices.
//!
//! This module handles:
//! - Opening `/dev/input/jsN` and reading `js_event` records
//! - Decoding records into typed axis/button samples
//! - Remapping physical inputs to logical ones
//! - Calibrating and normalizing axes
//! - Keeping the current state and notifying observers

pub mod bus;
pub mod calibration;
pub mod decoder;
pub mod device;
pub mod engine;
pub mod mapping;
pub mod source;
pub mod state;
