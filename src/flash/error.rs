//! Error taxonomy for [`super::FlashCore`].

use crate::framework::BusAccessError;
use std::time::Duration;

/// Decoded `STATCMD` failure bits for a command that completed with
/// `CMDPASS` clear.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatCmdFailure {
    /// `CMDINPROGRESS` (bit 2) was still set when we gave up.
    pub in_progress: bool,
    /// `FAILWEPROT` (bit 4): the target sector was write-protected.
    pub we_prot: bool,
    /// `FAILVERIFY` (bit 5): post-program verification failed.
    pub verify: bool,
    /// `FAILILLADDR` (bit 6): the command addressed an illegal location.
    pub ill_addr: bool,
    /// `FAILMODE` (bit 7): the command was not legal in the current mode.
    pub mode: bool,
    /// `FAILMISC` (bit 12): miscellaneous/unclassified failure.
    pub misc: bool,
}

impl std::fmt::Display for StatCmdFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut reasons = Vec::new();
        if self.in_progress {
            reasons.push("in-progress");
        }
        if self.we_prot {
            reasons.push("write-protected");
        }
        if self.verify {
            reasons.push("verify-failed");
        }
        if self.ill_addr {
            reasons.push("illegal-address");
        }
        if self.mode {
            reasons.push("illegal-mode");
        }
        if self.misc {
            reasons.push("miscellaneous");
        }
        if reasons.is_empty() {
            write!(f, "unspecified failure")
        } else {
            write!(f, "{}", reasons.join(", "))
        }
    }
}

/// Errors produced by [`super::FlashCore`] operations.
#[derive(Debug, thiserror::Error)]
pub enum FlashError {
    /// The bank was used before a successful [`super::FlashCore::probe`].
    #[error("flash bank has not been probed yet")]
    NotProbed,

    /// The target must be halted to erase or program flash.
    #[error("target must be halted for this operation")]
    NotHalted,

    /// The bank's base address is not one of the three recognized
    /// sentinels (MAIN, NONMAIN, DATA).
    #[error("{0:#010x} is not a recognized flash bank base address")]
    InvalidBankBase(u32),

    /// The DID identity register was malformed, or named an unrecognized
    /// silicon family.
    #[error("failed to identify the connected device")]
    ProbeFailed,

    /// A sector index could not be mapped to a valid protection bit.
    #[error("sector {sector} does not map to a valid protection bit")]
    MappingOutOfRange {
        /// The offending sector index.
        sector: u32,
    },

    /// The protection-bit mapping produced a `(register, bit)` pair outside
    /// the bank's protection register set: a driver bug, not a hardware
    /// condition.
    #[error("computed protection bit (register {reg}, bit {bit}) is out of range")]
    DriverBug {
        /// Computed register index.
        reg: usize,
        /// Computed bit index.
        bit: u32,
    },

    /// An attempt was made to protect or check protection on the DATA bank,
    /// which has no protection scheme.
    #[error("the DATA bank has no write-protection scheme")]
    ProtectionUnavailable,

    /// An erase or program touched a sector that is currently protected.
    #[error("sector {sector} is write-protected")]
    SectorProtected {
        /// The protected sector index.
        sector: u32,
    },

    /// A program offset was not a multiple of the flash word size.
    #[error("offset {offset:#x} is not aligned to the flash word size ({word_size} bytes)")]
    Misaligned {
        /// The misaligned offset.
        offset: u32,
        /// The required alignment, in bytes.
        word_size: u32,
    },

    /// The flash controller completed the command with `CMDPASS` clear.
    #[error("flash command failed: {0}")]
    CommandFailed(StatCmdFailure),

    /// The flash controller did not assert `CMDDONE` within the timeout.
    #[error("flash command timed out after {0:?}")]
    Timeout(Duration),

    /// A target-bus transaction failed.
    #[error(transparent)]
    Bus(#[from] BusAccessError),

    /// Any other error from a framework collaborator.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
