//! # Joystick Device Module
//!
//! Opens Linux joystick device files (`/dev/input/jsN`) and reads decoded
//! samples from them.
//!
//! ## Device Description
//!
//! The descriptor is queried once at open through the joydev ioctls:
//!
//! - `JSIOCGVERSION`: driver version, also proves the file is a joystick
//! - `JSIOCGAXES` / `JSIOCGBUTTONS`: input counts
//! - `JSIOCGNAME`: human-readable device name
//!
//! ## Reading
//!
//! The file is always opened non-blocking. In [`ReadMode::Blocking`] the handle
//! waits for input with `poll(2)` in short slices and checks its close flag in
//! between, so [`CloseHandle::close`] from another thread ends a pending read
//! with [`JoycalError::DeviceDisconnected`] instead of hanging.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::decoder::{Decoded, EventDecoder, RawSample, JS_EVENT_SIZE};
use crate::error::{JoycalError, Result};

const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = 8;
const IOC_SIZESHIFT: u32 = 16;
const IOC_DIRSHIFT: u32 = 30;
const IOC_READ: u32 = 2;

/// ioctl type byte of the joystick interface.
const JS_IOCTL_TYPE: u8 = b'j';

/// Maximum device name length requested from the driver.
const NAME_BUFFER_LEN: usize = 128;

/// How long a blocking read waits before re-checking the close flag.
const POLL_SLICE_MS: libc::c_int = 50;

const fn ioctl_read(nr: u8, size: usize) -> libc::c_ulong {
    ((IOC_READ << IOC_DIRSHIFT)
        | ((size as u32) << IOC_SIZESHIFT)
        | ((JS_IOCTL_TYPE as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)) as libc::c_ulong
}

const JSIOCGVERSION: libc::c_ulong = ioctl_read(0x01, std::mem::size_of::<u32>());
const JSIOCGAXES: libc::c_ulong = ioctl_read(0x11, std::mem::size_of::<u8>());
const JSIOCGBUTTONS: libc::c_ulong = ioctl_read(0x12, std::mem::size_of::<u8>());
const JSIOCGNAME: libc::c_ulong = ioctl_read(0x13, NAME_BUFFER_LEN);

/// Whether `read_next` waits for input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Wait until a sample arrives or the handle is closed.
    Blocking,
    /// Return `Ok(None)` when nothing is pending.
    NonBlocking,
}

/// Stable key used to look up saved profiles across program runs.
///
/// Derived from the device name and its input counts, so two identical pads
/// share one profile while a different model never picks it up.
///
/// # Examples
///
/// ```
/// use joycal::joystick::device::DeviceIdentity;
///
/// let id = DeviceIdentity::new("Logitech Gamepad F310", 8, 11);
/// assert_eq!(id.as_str(), "logitech_gamepad_f310-8a11b");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// Builds the identity key for a device name and its input counts.
    #[must_use]
    pub fn new(name: &str, axis_count: usize, button_count: usize) -> Self {
        let mut slug = String::with_capacity(name.len());
        for c in name.chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c.to_ascii_lowercase());
            } else if !slug.is_empty() && !slug.ends_with('_') {
                slug.push('_');
            }
        }
        while slug.ends_with('_') {
            slug.pop();
        }
        if slug.is_empty() {
            slug.push_str("unknown");
        }

        Self(format!("{}-{}a{}b", slug, axis_count, button_count))
    }

    /// Returns the key as a string slice; safe to use as a file stem.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Static description of an open joystick, captured at open time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Device file the handle was opened from.
    pub path: PathBuf,
    /// Name reported by the driver.
    pub name: String,
    /// Number of physical axes.
    pub axis_count: usize,
    /// Number of physical buttons.
    pub button_count: usize,
    /// Raw joydev driver version (`0xMMmmpp`).
    pub driver_version: u32,
}

impl DeviceDescriptor {
    /// Returns the identity key used for profile lookup.
    #[must_use]
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(&self.name, self.axis_count, self.button_count)
    }

    /// Formats the driver version as `major.minor.patch`.
    #[must_use]
    pub fn driver_version_string(&self) -> String {
        format!(
            "{}.{}.{}",
            self.driver_version >> 16,
            (self.driver_version >> 8) & 0xff,
            self.driver_version & 0xff
        )
    }
}

/// Thread-safe trigger that closes a [`DeviceHandle`] from elsewhere.
///
/// A pending blocking read notices the close within one poll slice and returns
/// [`JoycalError::DeviceDisconnected`]; the reader then releases the file.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    closed: Arc<AtomicBool>,
}

impl CloseHandle {
    /// Requests the handle to close.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Returns `true` once a close was requested.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Open connection to a joystick device file.
///
/// Owns the file exclusively. The file is released by [`DeviceHandle::close`],
/// on drop, and whenever a read ends in a terminal error.
pub struct DeviceHandle {
    file: Option<File>,
    descriptor: DeviceDescriptor,
    mode: ReadMode,
    decoder: EventDecoder,
    closed: Arc<AtomicBool>,
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("descriptor", &self.descriptor)
            .field("mode", &self.mode)
            .field("open", &self.file.is_some())
            .finish_non_exhaustive()
    }
}

impl DeviceHandle {
    /// Opens a joystick device file and queries its descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`JoycalError::DeviceUnavailable`] if the file is missing, access
    /// is denied, or the file does not answer the joystick ioctls.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use joycal::joystick::device::{DeviceHandle, ReadMode};
    ///
    /// let handle = DeviceHandle::open("/dev/input/js0", ReadMode::Blocking)?;
    /// println!("{} axes", handle.descriptor().axis_count);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open<P: AsRef<Path>>(path: P, mode: ReadMode) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| unavailable(path, describe_open_error(&e)))?;

        let descriptor = query_descriptor(&file, path)?;
        info!(
            "Opened joystick {} at {} ({} axes, {} buttons, driver {})",
            descriptor.name,
            path.display(),
            descriptor.axis_count,
            descriptor.button_count,
            descriptor.driver_version_string()
        );

        Ok(Self::from_parts(file, descriptor, mode))
    }

    fn from_parts(file: File, descriptor: DeviceDescriptor, mode: ReadMode) -> Self {
        Self {
            file: Some(file),
            descriptor,
            mode,
            decoder: EventDecoder::new(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns the descriptor captured at open time.
    #[must_use]
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Returns the read mode chosen at open time.
    #[must_use]
    pub fn mode(&self) -> ReadMode {
        self.mode
    }

    /// Returns `true` while the underlying file is held.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.file.is_some() && !self.closed.load(Ordering::Acquire)
    }

    /// Returns a trigger that closes this handle from another thread.
    #[must_use]
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            closed: Arc::clone(&self.closed),
        }
    }

    /// Reads the next decoded sample.
    ///
    /// Malformed records are skipped silently. In blocking mode this waits
    /// until a sample arrives; in non-blocking mode it returns `Ok(None)` when
    /// nothing is pending.
    ///
    /// # Errors
    ///
    /// Returns [`JoycalError::DeviceDisconnected`] when the device is removed,
    /// reaches end of stream, or the handle was closed. The file is released
    /// before the error is returned.
    pub fn read_next(&mut self) -> Result<Option<RawSample>> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                self.release();
                return Err(JoycalError::DeviceDisconnected(
                    "handle closed".to_string(),
                ));
            }

            let file = match self.file.as_mut() {
                Some(file) => file,
                None => {
                    return Err(JoycalError::DeviceDisconnected(
                        "handle closed".to_string(),
                    ))
                }
            };

            let mut record = [0u8; JS_EVENT_SIZE];
            match file.read(&mut record) {
                Ok(0) => {
                    self.release();
                    return Err(JoycalError::DeviceDisconnected(
                        "end of stream".to_string(),
                    ));
                }
                Ok(n) => match self.decoder.decode(&record[..n]) {
                    Decoded::Sample(sample) => return Ok(Some(sample)),
                    Decoded::Ignored(_) => continue,
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => match self.mode {
                    ReadMode::NonBlocking => return Ok(None),
                    ReadMode::Blocking => {
                        if let Err(e) = self.wait_readable() {
                            self.release();
                            return Err(e);
                        }
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.release();
                    return Err(JoycalError::DeviceDisconnected(format!(
                        "read failed: {}",
                        e
                    )));
                }
            }
        }
    }

    /// Closes the handle and releases the device file. Idempotent.
    pub fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.release();
    }

    /// Waits up to one poll slice for the file to become readable.
    fn wait_readable(&self) -> Result<()> {
        let fd = match self.file.as_ref() {
            Some(file) => file.as_raw_fd(),
            None => {
                return Err(JoycalError::DeviceDisconnected(
                    "handle closed".to_string(),
                ))
            }
        };

        let mut pollfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };

        // SAFETY: `pollfd` is a valid, exclusively borrowed pollfd and nfds is 1.
        let rc = unsafe { libc::poll(&mut pollfd, 1, POLL_SLICE_MS) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(JoycalError::DeviceDisconnected(format!(
                "poll failed: {}",
                err
            )));
        }

        let hangup = libc::POLLERR | libc::POLLHUP | libc::POLLNVAL;
        if pollfd.revents & hangup != 0 && pollfd.revents & libc::POLLIN == 0 {
            return Err(JoycalError::DeviceDisconnected(
                "device hung up".to_string(),
            ));
        }

        Ok(())
    }

    fn release(&mut self) {
        if let Some(file) = self.file.take() {
            drop(file);
            info!(
                "Closed joystick at {} ({} samples decoded, {} records ignored)",
                self.descriptor.path.display(),
                self.decoder.decoded_count(),
                self.decoder.ignored_count()
            );
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.release();
    }
}

fn unavailable(path: &Path, reason: String) -> JoycalError {
    JoycalError::DeviceUnavailable {
        path: path.display().to_string(),
        reason,
    }
}

fn describe_open_error(err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::NotFound => "no such device".to_string(),
        io::ErrorKind::PermissionDenied => "permission denied".to_string(),
        _ => err.to_string(),
    }
}

/// Issues a read-direction joystick ioctl into `out`.
fn ioctl_read_into<T>(file: &File, request: libc::c_ulong, out: &mut T) -> io::Result<libc::c_int> {
    // SAFETY: `out` is a valid, exclusively borrowed buffer whose size matches
    // the size encoded in `request`, and the fd stays open for the call.
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), request as _, out as *mut T) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

fn query_descriptor(file: &File, path: &Path) -> Result<DeviceDescriptor> {
    let mut driver_version: u32 = 0;
    ioctl_read_into(file, JSIOCGVERSION, &mut driver_version)
        .map_err(|e| unavailable(path, format!("not a joystick device ({})", e)))?;

    let mut axes: u8 = 0;
    ioctl_read_into(file, JSIOCGAXES, &mut axes)
        .map_err(|e| unavailable(path, format!("cannot query axis count ({})", e)))?;

    let mut buttons: u8 = 0;
    ioctl_read_into(file, JSIOCGBUTTONS, &mut buttons)
        .map_err(|e| unavailable(path, format!("cannot query button count ({})", e)))?;

    let mut name_buf = [0u8; NAME_BUFFER_LEN];
    let name = match ioctl_read_into(file, JSIOCGNAME, &mut name_buf) {
        Ok(_) => {
            let end = name_buf.iter().position(|&b| b == 0).unwrap_or(NAME_BUFFER_LEN);
            String::from_utf8_lossy(&name_buf[..end]).into_owned()
        }
        Err(e) => {
            debug!("JSIOCGNAME failed for {}: {}", path.display(), e);
            "Unknown Joystick".to_string()
        }
    };

    Ok(DeviceDescriptor {
        path: path.to_path_buf(),
        name,
        axis_count: usize::from(axes),
        button_count: usize::from(buttons),
        driver_version,
    })
}
