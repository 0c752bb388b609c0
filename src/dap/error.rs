//! Error taxonomy for [`super::DmemDap`].

use crate::framework::MapError;

/// Errors produced by [`super::DmemDap`] operations.
#[derive(Debug, thiserror::Error)]
pub enum DapError {
    /// `init` was called with no DAP window base address configured.
    #[error("no DAP base address configured")]
    NotConfigured,

    /// A window base or size was not aligned to the host page size.
    #[error("address {0:#x} is not aligned to the host page size")]
    AlignmentError(u64),

    /// Mapping (or unmapping) a physical window failed.
    #[error(transparent)]
    MapFailed(#[from] MapError),

    /// An operation was attempted before `init` mapped the windows.
    #[error("DAP has not been initialized")]
    NotInitialized,

    /// A newer debug-architecture (ADIv6) Access Port was addressed; this
    /// backend only speaks the flat, direct-memory AP protocol.
    #[error("ADIv6 access ports are not supported")]
    Unsupported,

    /// An emulated-AP register offset did not match any of the translated
    /// registers (CSW/TAR/CFG/BASE/IDR/BDn/DRW).
    #[error("register offset {0:#x} is not a recognized AP register")]
    InvalidRegister(u32),

    /// `n` exceeds the configured AP count, or is not in the emulated list
    /// when an emulated access was requested.
    #[error("AP index {0} is out of range")]
    InvalidApIndex(u8),

    /// Any other error from a framework collaborator.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
