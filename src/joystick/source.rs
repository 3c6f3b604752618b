//! Trait abstraction over sample producers so the pipeline can be tested
//! without hardware.

use super::decoder::RawSample;
use super::device::DeviceHandle;
use crate::error::Result;

/// Anything that yields decoded samples the way a [`DeviceHandle`] does.
#[cfg_attr(test, mockall::automock)]
pub trait SampleSource {
    /// Reads the next sample; `Ok(None)` means nothing is pending right now.
    fn read_next(&mut self) -> Result<Option<RawSample>>;
}

impl SampleSource for DeviceHandle {
    fn read_next(&mut self) -> Result<Option<RawSample>> {
        DeviceHandle::read_next(self)
    }
}
