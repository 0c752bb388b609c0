//! Sector-index to protection-bit mapping.
//!
//! This is the subtle part of the driver: the number of sectors covered by
//! a single protection bit changes partway through the MAIN bank's sector
//! range, and the boundary depends on the bank's own size and the number of
//! main-flash banks on the part.

use crate::flash::error::FlashError;

/// Which of the three recognized banks a [`super::FlashCore`] drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankKind {
    /// The main code-execution flash bank, base address `0x0`.
    Main,
    /// The NONMAIN configuration bank, base address `0x41C0_0000`.
    NonMain,
    /// The DATA (EEPROM-emulation) bank, base address `0x41D0_0000`. Has no
    /// protection scheme.
    Data,
}

impl BankKind {
    /// The number of write-protection registers this bank kind has.
    pub fn protect_reg_count(self) -> usize {
        match self {
            BankKind::Main => 3,
            BankKind::NonMain => 1,
            BankKind::Data => 0,
        }
    }

    /// The byte offset of this bank's protection register block, relative
    /// to the flash-controller base.
    pub fn protect_reg_base_offset(self) -> Option<u32> {
        match self {
            BankKind::Main => Some(crate::flash::regs::CMDWEPROTA_OFFSET),
            BankKind::NonMain => Some(crate::flash::regs::CMDWEPROTNM_OFFSET),
            BankKind::Data => None,
        }
    }
}

/// Maps a sector index within a bank to the `(register, bit)` pair that
/// protects it.
///
/// `main_bank_count` and `sectors_per_bank` only matter for `BankKind::Main`
/// (the NONMAIN bank is always a single, one-sector bank and DATA has no
/// mapping at all).
pub fn protect_reg_map(
    kind: BankKind,
    main_bank_count: u32,
    sectors_per_bank: u32,
    sector: u32,
) -> Result<(usize, u32), FlashError> {
    let (reg, bit) = match kind {
        BankKind::Data => return Err(FlashError::ProtectionUnavailable),
        BankKind::NonMain => ((sector / 32) as usize, sector % 32),
        BankKind::Main => {
            if sector < 32 {
                (0usize, sector)
            } else {
                // `sectors_per_bank` is a sector count, assumed to be a
                // power of two on all parts observed so far. Modulo is used
                // instead of a bitwise mask so the mapping stays correct
                // even if that assumption is ever violated.
                debug_assert!(
                    sectors_per_bank.is_power_of_two(),
                    "sectors_per_bank {sectors_per_bank} is not a power of two; \
                     verify against the reference hardware"
                );
                let s_in_bank = sector % sectors_per_bank;
                if s_in_bank < 256 {
                    let bit = if main_bank_count == 1 {
                        (s_in_bank - 32) / 8
                    } else {
                        s_in_bank / 8
                    };
                    (1usize, bit)
                } else if s_in_bank < 512 {
                    (2usize, (s_in_bank - 256) / 8)
                } else {
                    return Err(FlashError::MappingOutOfRange { sector });
                }
            }
        }
    };

    if reg >= kind.protect_reg_count() || bit >= 32 {
        return Err(FlashError::DriverBug { reg, bit });
    }

    Ok((reg, bit))
}
