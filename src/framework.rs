//! Capabilities normally supplied by the containing debug-adapter framework.
//!
//! Everything in this module is an "external collaborator" per the design
//! scope: generic command dispatch, target halt/resume, flash-bank
//! enumeration, and OS-level device access all live in the host framework.
//! We only need the seams, so each collaborator is expressed as a trait the
//! framework is expected to implement, plus (for `HostMmioMapper`) a default
//! Linux implementation so the crate is usable standalone.

use std::time::{Duration, Instant};

/// A target-bus access failed.
///
/// The concrete cause (probe disconnected, target not halted at the
/// transport layer, bus fault, ...) is the framework's to report; we only
/// need to know that the access did not complete.
#[derive(Debug, thiserror::Error)]
#[error("target bus access failed")]
pub struct BusAccessError(#[source] pub anyhow::Error);

/// 32-bit aligned read/write access to arbitrary physical addresses on the
/// attached target, as provided by the debug-adapter framework's transport.
pub trait TargetBus {
    /// Reads a 32 bit word at `address`.
    fn read_u32(&mut self, address: u32) -> Result<u32, BusAccessError>;

    /// Writes a 32 bit word to `address`.
    fn write_u32(&mut self, address: u32, value: u32) -> Result<(), BusAccessError>;
}

/// Whether the target is currently halted.
pub trait HaltStateQuery {
    /// Returns `true` if the target is halted.
    fn is_halted(&mut self) -> bool;
}

/// A keep-alive hook invoked while a long-running command is polled.
///
/// The framework uses this to service its own event loop (GUI updates,
/// TCL server heartbeats, ...) while we spin-wait on hardware.
pub trait KeepAlive {
    /// Called roughly every 500 ms while waiting for a command to complete.
    fn poll(&mut self);
}

impl KeepAlive for () {
    fn poll(&mut self) {}
}

/// A monotonic clock, abstracted so command-completion timeouts are
/// deterministically testable.
pub trait Clock {
    /// Returns the time elapsed since some arbitrary, fixed epoch.
    fn now(&mut self) -> Duration;
}

/// The real wall-clock, backed by [`std::time::Instant`].
#[derive(Debug)]
pub struct SystemClock(Instant);

impl SystemClock {
    /// Creates a clock whose epoch is "now".
    pub fn new() -> Self {
        Self(Instant::now())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&mut self) -> Duration {
        self.0.elapsed()
    }
}

/// A physical-memory window mapped into the host process's address space.
///
/// Reads and writes are volatile 32 bit accesses at a byte offset relative
/// to the window's base.
pub trait MappedWindow: std::fmt::Debug {
    /// Reads a 32 bit word at `offset` bytes from the window base.
    fn read_u32(&self, offset: usize) -> u32;

    /// Writes a 32 bit word at `offset` bytes from the window base.
    fn write_u32(&self, offset: usize, value: u32);

    /// The size in bytes of the mapped window.
    fn len(&self) -> usize;

    /// Unmaps the window. Errors are logged by the caller, not propagated
    /// into command failures: a failed unmap cannot be retried usefully.
    fn unmap(self: Box<Self>) -> Result<(), MapError>;
}

/// Failure to map or unmap a physical window into the host process.
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    /// The backing device could not be opened.
    #[error("failed to open device {path}")]
    DeviceOpen {
        /// Device path, e.g. `/dev/mem`.
        path: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// The `mmap` (or equivalent) call itself failed.
    #[error("failed to map physical window")]
    Mmap(#[source] std::io::Error),
    /// The `munmap` (or equivalent) call failed.
    #[error("failed to unmap physical window")]
    Unmap(#[source] std::io::Error),
    /// A window base or size violated the host's page-alignment requirement.
    #[error("address {0:#x} is not aligned to the host page size")]
    Alignment(u64),
}

/// Maps a physical address range into the host process.
///
/// Implemented by the OS-integration layer; out of scope for this crate's
/// core design, but a default Linux `/dev/mem`-backed implementation is
/// provided in [`LinuxMmioMapper`] so the crate is usable on its own.
pub trait HostMmioMapper {
    /// Maps `len` bytes of physical memory starting at `phys_base`, via the
    /// device at `device_path`.
    fn map(
        &mut self,
        device_path: &str,
        phys_base: u64,
        len: usize,
    ) -> Result<Box<dyn MappedWindow>, MapError>;

    /// The host's page size, used to compute mapping alignment padding.
    fn page_size(&self) -> usize;
}

/// A [`HostMmioMapper`] backed by `mmap(2)` over an opened device file.
#[derive(Debug, Default)]
pub struct LinuxMmioMapper;

impl HostMmioMapper for LinuxMmioMapper {
    fn map(
        &mut self,
        device_path: &str,
        phys_base: u64,
        len: usize,
    ) -> Result<Box<dyn MappedWindow>, MapError> {
        linux::map(device_path, phys_base, len)
    }

    fn page_size(&self) -> usize {
        linux::page_size()
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use super::{MapError, MappedWindow};
    use std::ffi::CString;
    use std::os::unix::io::RawFd;

    pub(super) fn page_size() -> usize {
        // SAFETY: `_SC_PAGESIZE` is always a valid `sysconf` argument.
        unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
    }

    pub(super) fn map(
        device_path: &str,
        phys_base: u64,
        len: usize,
    ) -> Result<Box<dyn MappedWindow>, MapError> {
        let path = CString::new(device_path).map_err(|_| MapError::DeviceOpen {
            path: device_path.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "NUL in device path"),
        })?;

        // SAFETY: standard POSIX `open` of a caller-supplied path.
        let fd: RawFd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR | libc::O_SYNC) };
        if fd < 0 {
            return Err(MapError::DeviceOpen {
                path: device_path.to_string(),
                source: std::io::Error::last_os_error(),
            });
        }

        // SAFETY: `fd` was just opened successfully and `len` is caller-checked.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                phys_base as libc::off_t,
            )
        };

        if ptr == libc::MAP_FAILED {
            let err = std::io::Error::last_os_error();
            // SAFETY: `fd` is open and owned by us.
            unsafe { libc::close(fd) };
            return Err(MapError::Mmap(err));
        }

        Ok(Box::new(LinuxWindow {
            ptr: ptr as *mut u8,
            len,
            fd,
        }))
    }

    #[derive(Debug)]
    struct LinuxWindow {
        ptr: *mut u8,
        len: usize,
        fd: RawFd,
    }

    // The windows this crate maps are debug-bus MMIO: every access is
    // intentionally racing hardware state, not other Rust code, so shared
    // volatile access from `&self` is the right shape.
    unsafe impl Send for LinuxWindow {}
    unsafe impl Sync for LinuxWindow {}

    impl MappedWindow for LinuxWindow {
        fn read_u32(&self, offset: usize) -> u32 {
            assert!(offset + 4 <= self.len, "read out of mapped window bounds");
            // SAFETY: offset checked above; pointer is valid for `self.len` bytes.
            unsafe { std::ptr::read_volatile(self.ptr.add(offset) as *const u32) }
        }

        fn write_u32(&self, offset: usize, value: u32) {
            assert!(offset + 4 <= self.len, "write out of mapped window bounds");
            // SAFETY: offset checked above; pointer is valid for `self.len` bytes.
            unsafe { std::ptr::write_volatile(self.ptr.add(offset) as *mut u32, value) }
        }

        fn len(&self) -> usize {
            self.len
        }

        fn unmap(self: Box<Self>) -> Result<(), MapError> {
            // SAFETY: `ptr`/`len` came from a successful `mmap` of this size.
            let rc = unsafe { libc::munmap(self.ptr as *mut libc::c_void, self.len) };
            // SAFETY: `fd` is open and owned by us.
            unsafe { libc::close(self.fd) };
            if rc != 0 {
                return Err(MapError::Unmap(std::io::Error::last_os_error()));
            }
            Ok(())
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod linux {
    use super::{MapError, MappedWindow};

    pub(super) fn page_size() -> usize {
        4096
    }

    pub(super) fn map(
        device_path: &str,
        _phys_base: u64,
        _len: usize,
    ) -> Result<Box<dyn MappedWindow>, MapError> {
        Err(MapError::DeviceOpen {
            path: device_path.to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "direct physical-memory mapping is only implemented on Linux",
            ),
        })
    }
}

/// Rounds `value` up to the next multiple of `align` (which must be a power
/// of two).
pub(crate) fn align_up(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (value + (align - 1)) & !(align - 1)
}

/// Rounds `value` down to the previous multiple of `align` (a power of two).
pub(crate) fn align_down(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}
