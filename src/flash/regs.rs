//! Flash-controller and identity-register memory map.
//!
//! Offsets are inputs from the Arm debug architecture / TI register map, not
//! designed here.

use bitfield::bitfield;

/// Base address of the identity-register block.
pub const IDENTITY_BASE: u32 = 0x41C4_0000;
/// Offset of `TRACEID` within the identity block.
pub const TRACEID_OFFSET: u32 = 0x00;
/// Offset of `DID` within the identity block.
pub const DID_OFFSET: u32 = 0x04;
/// Offset of `USERID` within the identity block.
pub const USERID_OFFSET: u32 = 0x08;
/// Offset of `SRAMFLASH` within the identity block.
pub const SRAMFLASH_OFFSET: u32 = 0x18;

/// Base address of the flash-controller MMIO block.
pub const FLASH_CTRL_BASE: u32 = 0x400C_D000;
/// Offset of `CMDEXEC`.
pub const CMDEXEC_OFFSET: u32 = 0x1100;
/// Offset of `CMDTYPE`.
pub const CMDTYPE_OFFSET: u32 = 0x1104;
/// Offset of `CMDADDR`.
pub const CMDADDR_OFFSET: u32 = 0x1120;
/// Offset of `CMDBYTEN`.
pub const CMDBYTEN_OFFSET: u32 = 0x1124;
/// Offset of `CMDDATA0`, the first of the data streaming registers.
pub const CMDDATA0_OFFSET: u32 = 0x1130;
/// Offset of `CMDWEPROTA` (MAIN bank protection registers; 3 of them).
pub const CMDWEPROTA_OFFSET: u32 = 0x11D0;
/// Offset of `CMDWEPROTNM` (NONMAIN bank protection register; 1 of them).
pub const CMDWEPROTNM_OFFSET: u32 = 0x1210;
/// Offset of `STATCMD`.
pub const STATCMD_OFFSET: u32 = 0x13D0;

/// `CMDEXEC` value that starts the currently staged command.
pub const CMDEXEC_EXECUTE: u32 = 1;

/// `CMDTYPE` component: program a single flash word.
pub const CMDTYPE_PROGRAM: u32 = 0x01;
/// `CMDTYPE` component: erase.
pub const CMDTYPE_ERASE: u32 = 0x02;
/// `CMDTYPE` modifier: operate on a single addressed unit (one sector for
/// erase, one flash word for program).
pub const CMDTYPE_ONE_UNIT: u32 = 0x40;

/// The command type written to erase a single sector.
pub const CMDTYPE_ERASE_SECTOR: u32 = CMDTYPE_ERASE | CMDTYPE_ONE_UNIT;
/// The command type written to program a single flash word.
pub const CMDTYPE_PROGRAM_ONEWORD: u32 = CMDTYPE_PROGRAM | CMDTYPE_ONE_UNIT;

bitfield! {
    /// `STATCMD` — flash command status.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct StatCmd(u32);
    impl Debug;
    /// `CMDDONE`: the staged command has completed (pass or fail).
    pub done, _: 0;
    /// `CMDPASS`: the command completed successfully.
    pub pass, _: 1;
    /// `CMDINPROGRESS`: the command is still executing.
    pub in_progress, _: 2;
    /// `FAILWEPROT`: the command touched a write-protected sector.
    pub fail_we_prot, _: 4;
    /// `FAILVERIFY`: post-write verification failed.
    pub fail_verify, _: 5;
    /// `FAILILLADDR`: the command addressed an illegal location.
    pub fail_ill_addr, _: 6;
    /// `FAILMODE`: the command was illegal in the controller's current mode.
    pub fail_mode, _: 7;
    /// `FAILMISC`: unclassified failure.
    pub fail_misc, _: 12;
}

impl From<u32> for StatCmd {
    fn from(value: u32) -> Self {
        StatCmd(value)
    }
}

bitfield! {
    /// `DID` — device identification register.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Did(u32);
    impl Debug;
    /// `ALWAYS_1`: sanity bit, always set on a valid part.
    pub always_1, _: 0;
    /// Silicon version.
    pub version, _: 31, 28;
    /// Family identifier (`0xBB82` for MSPM0L, `0xBB88` for MSPM0G).
    pub part_num, _: 27, 12;
}

bitfield! {
    /// `USERID` — part/variant identification register.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct UserId(u32);
    impl Debug;
    /// Variant (package/speed grade) identifier.
    pub variant, _: 23, 16;
    /// Part identifier within the family.
    pub part, _: 15, 0;
}

bitfield! {
    /// `SRAMFLASH` — memory geometry register.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct SramFlash(u32);
    impl Debug;
    /// Data-flash size in KiB.
    pub data_flash_kib, _: 31, 26;
    /// SRAM size in KiB.
    pub sram_kib, _: 25, 16;
    /// Number of main-flash banks, minus one.
    pub main_banks_minus_one, _: 13, 12;
    /// Main-flash size in KiB.
    pub main_flash_kib, _: 11, 0;
}
