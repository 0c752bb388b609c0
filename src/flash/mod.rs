//! The MSPM0 flash controller driver.
//!
//! Identifies the connected chip from its identity registers, computes its
//! memory geometry, and drives the memory-mapped flash-control engine to
//! erase, program, and write-protect sectors.

pub mod chip;
pub mod error;
pub mod protect;
pub mod regs;

use crate::framework::{Clock, HaltStateQuery, KeepAlive, SystemClock, TargetBus};
use error::{FlashError, StatCmdFailure};
use protect::BankKind;
use regs::*;
use std::time::Duration;

/// A sector's erased/protected state is not simply known or unknown: it is
/// either confirmed, confirmed absent, or simply not yet read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriState {
    /// Confirmed true.
    Yes,
    /// Confirmed false.
    No,
    /// Not yet determined.
    #[default]
    Unknown,
}

/// Per-sector state tracked by a bank.
#[derive(Debug, Clone, Copy)]
pub struct Sector {
    /// Byte offset of the sector within the bank.
    pub offset: u32,
    /// Size of the sector in bytes (always [`SECTOR_SIZE`]).
    pub size: u32,
    /// Whether the sector is known to be erased.
    pub is_erased: TriState,
    /// Whether the sector is known to be write-protected.
    pub is_protected: TriState,
}

/// Fixed sector size on all known MSPM0 parts.
pub const SECTOR_SIZE: u32 = 1024;

/// Fixed flash word size on all known MSPM0 parts.
///
/// The design reserves room for a 16 byte flash word (parts with a wider
/// ECC framing), but no shipping part currently reports one; see
/// [`FlashCore::flash_word_size_bytes`].
pub const FLASH_WORD_SIZE_8: u32 = 8;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(8);
const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(500);

/// The MSPM0 flash controller driver for a single bank.
///
/// Created at bank declaration (by [`FlashCore::new`], which validates the
/// base address); hydrated on first [`FlashCore::probe`].
#[derive(Debug)]
pub struct FlashCore {
    base_address: u32,
    kind: BankKind,

    device_id: u32,
    trace_id: u32,
    version: u32,
    chip_name: String,

    main_flash_kib: u32,
    data_flash_kib: u32,
    main_flash_bank_count: u32,
    sram_kib: u32,

    flash_word_size_bytes: u32,

    sectors: Vec<Sector>,
}

impl FlashCore {
    /// Base address sentinel for the MAIN (code) bank.
    pub const MAIN: u32 = 0x0000_0000;
    /// Base address sentinel for the NONMAIN (configuration) bank.
    pub const NONMAIN: u32 = 0x41C0_0000;
    /// Base address sentinel for the DATA bank.
    pub const DATA: u32 = 0x41D0_0000;

    /// Declares a new flash bank at `base_address`.
    ///
    /// Corresponds to the framework's `flash_bank_command` hook: only the
    /// base address is validated here. The bank is unusable (all queries
    /// fail `NotProbed`) until [`Self::probe`] succeeds.
    pub fn new(base_address: u32) -> Result<Self, FlashError> {
        let kind = match base_address {
            Self::MAIN => BankKind::Main,
            Self::NONMAIN => BankKind::NonMain,
            Self::DATA => BankKind::Data,
            other => return Err(FlashError::InvalidBankBase(other)),
        };

        Ok(Self {
            base_address,
            kind,
            device_id: 0,
            trace_id: 0,
            version: 0,
            chip_name: String::new(),
            main_flash_kib: 0,
            data_flash_kib: 0,
            main_flash_bank_count: 1,
            sram_kib: 0,
            flash_word_size_bytes: FLASH_WORD_SIZE_8,
            sectors: Vec::new(),
        })
    }

    /// The bank's base address.
    pub fn base_address(&self) -> u32 {
        self.base_address
    }

    /// Which of the three recognized banks this is.
    pub fn kind(&self) -> BankKind {
        self.kind
    }

    /// `true` once [`Self::probe`] has succeeded.
    pub fn is_probed(&self) -> bool {
        self.device_id != 0
    }

    /// The bank's total size in bytes.
    pub fn size(&self) -> u32 {
        self.sectors.iter().map(|s| s.size).sum()
    }

    /// The bank's sectors.
    pub fn sectors(&self) -> &[Sector] {
        &self.sectors
    }

    /// The flash word size: the smallest programmable unit, including its
    /// ECC chunk. Always 8 on current parts.
    pub fn flash_word_size_bytes(&self) -> u32 {
        self.flash_word_size_bytes
    }

    fn require_probed(&self) -> Result<(), FlashError> {
        if self.is_probed() {
            Ok(())
        } else {
            Err(FlashError::NotProbed)
        }
    }

    fn require_halted(&self, halt: &mut impl HaltStateQuery) -> Result<(), FlashError> {
        if halt.is_halted() {
            Ok(())
        } else {
            Err(FlashError::NotHalted)
        }
    }

    // ---------------------------------------------------------------
    // Probe
    // ---------------------------------------------------------------

    /// Identifies the connected chip and computes this bank's geometry.
    ///
    /// Idempotent: once `device_id` is non-zero, subsequent calls return
    /// immediately. Reads four identity registers and decodes the device's
    /// family, part, and memory sizes.
    #[tracing::instrument(skip(self, bus))]
    pub fn probe(&mut self, bus: &mut impl TargetBus) -> Result<(), FlashError> {
        if self.is_probed() {
            return Ok(());
        }

        let did = Did::from(bus.read_u32(IDENTITY_BASE + DID_OFFSET)?);
        if !did.always_1() {
            tracing::error!("DID.ALWAYS_1 clear; malformed identity register");
            return Err(FlashError::ProbeFailed);
        }

        let trace_id = bus.read_u32(IDENTITY_BASE + TRACEID_OFFSET)?;
        let user_id = UserId::from(bus.read_u32(IDENTITY_BASE + USERID_OFFSET)?);
        let sram_flash = SramFlash::from(bus.read_u32(IDENTITY_BASE + SRAMFLASH_OFFSET)?);

        let family_id = did.part_num();
        let part_id = user_id.part();
        let variant_id = user_id.variant();

        let identified = chip::identify(family_id, part_id, variant_id).ok_or_else(|| {
            tracing::error!(family_id, "unrecognized silicon family");
            FlashError::ProbeFailed
        })?;
        if !identified.exact_match {
            tracing::warn!(
                family_id,
                part_id,
                variant_id,
                "unrecognized part in known family {}; proceeding under generic name",
                identified.name
            );
        }

        let main_flash_kib = sram_flash.main_flash_kib();
        let data_flash_kib = sram_flash.data_flash_kib();
        let main_flash_bank_count = sram_flash.main_banks_minus_one() + 1;
        let sram_kib = sram_flash.sram_kib();

        let sectors = self.compute_sectors(main_flash_kib, data_flash_kib, main_flash_bank_count)?;

        self.device_id = u32::from(did);
        self.trace_id = trace_id;
        self.version = did.version();
        self.chip_name = identified.name.to_string();
        self.main_flash_kib = main_flash_kib;
        self.data_flash_kib = data_flash_kib;
        self.main_flash_bank_count = main_flash_bank_count;
        self.sram_kib = sram_kib;
        self.sectors = sectors;

        Ok(())
    }

    fn compute_sectors(
        &self,
        main_flash_kib: u32,
        data_flash_kib: u32,
        main_flash_bank_count: u32,
    ) -> Result<Vec<Sector>, FlashError> {
        // NONMAIN is a single, fixed-size 512 byte sector: it is smaller
        // than the normal 1024 byte sector size, so it is not derived from
        // `SECTOR_SIZE` like the other two bank kinds.
        if self.kind == BankKind::NonMain {
            return Ok(vec![Sector {
                offset: 0,
                size: 512,
                is_erased: TriState::Unknown,
                is_protected: TriState::Unknown,
            }]);
        }

        let total_size = match self.kind {
            BankKind::NonMain => unreachable!(),
            BankKind::Main => main_flash_kib * 1024,
            BankKind::Data => {
                if data_flash_kib == 0 {
                    0
                } else {
                    data_flash_kib * 1024
                }
            }
        };

        let num_sectors = total_size / SECTOR_SIZE;

        if self.kind == BankKind::Main && main_flash_bank_count > 0 {
            let per_bank = num_sectors / main_flash_bank_count;
            if per_bank > 512 {
                return Err(FlashError::MappingOutOfRange {
                    sector: per_bank.saturating_sub(1),
                });
            }
        }

        Ok((0..num_sectors)
            .map(|i| Sector {
                offset: i * SECTOR_SIZE,
                size: SECTOR_SIZE,
                is_erased: TriState::Unknown,
                is_protected: TriState::Unknown,
            })
            .collect())
    }

    fn sectors_per_bank(&self) -> u32 {
        let total = self.sectors.len() as u32;
        if self.main_flash_bank_count == 0 {
            total
        } else {
            total / self.main_flash_bank_count
        }
    }

    // ---------------------------------------------------------------
    // Protection
    // ---------------------------------------------------------------

    fn protect_reg_window(&self) -> (u32, usize) {
        let base = self.kind.protect_reg_base_offset().unwrap_or(0);
        (FLASH_CTRL_BASE + base, self.kind.protect_reg_count())
    }

    fn read_protect_regs(&self, bus: &mut impl TargetBus) -> Result<Vec<u32>, FlashError> {
        let (base, count) = self.protect_reg_window();
        (0..count)
            .map(|i| Ok(bus.read_u32(base + (i as u32) * 4)?))
            .collect()
    }

    fn write_protect_regs(&self, bus: &mut impl TargetBus, values: &[u32]) -> Result<(), FlashError> {
        let (base, _) = self.protect_reg_window();
        for (i, value) in values.iter().enumerate() {
            bus.write_u32(base + (i as u32) * 4, *value)?;
        }
        Ok(())
    }

    /// Reads every protection register once and updates each sector's
    /// `is_protected` tri-state from the snapshot.
    #[tracing::instrument(skip(self, bus))]
    pub fn protect_check(&mut self, bus: &mut impl TargetBus) -> Result<(), FlashError> {
        self.require_probed()?;

        if self.kind == BankKind::Data {
            for sector in &mut self.sectors {
                sector.is_protected = TriState::No;
            }
            return Ok(());
        }

        let regs = self.read_protect_regs(bus)?;
        let sectors_per_bank = self.sectors_per_bank();
        let bank_count = self.main_flash_bank_count;
        let kind = self.kind;

        for (index, sector) in self.sectors.iter_mut().enumerate() {
            let (reg, bit) = protect::protect_reg_map(kind, bank_count, sectors_per_bank, index as u32)?;
            sector.is_protected = if (regs[reg] >> bit) & 1 != 0 {
                TriState::Yes
            } else {
                TriState::No
            };
        }

        Ok(())
    }

    /// Default `erase_check`: the hardware gives no erased-state readback,
    /// so every sector's `is_erased` tri-state is reported `Unknown`. This
    /// matches the framework's generic fallback for drivers with nothing
    /// better to report.
    pub fn erase_check(&mut self) -> Result<(), FlashError> {
        self.require_probed()?;
        for sector in &mut self.sectors {
            sector.is_erased = TriState::Unknown;
        }
        Ok(())
    }

    /// Sets or clears write-protection on sectors `[first, last)`.
    ///
    /// Always re-reads the protection registers before modifying them: the
    /// driver cannot trust cached sector state.
    #[tracing::instrument(skip(self, bus))]
    pub fn protect(
        &mut self,
        bus: &mut impl TargetBus,
        first: u32,
        last: u32,
        set: bool,
    ) -> Result<(), FlashError> {
        self.require_probed()?;

        if self.kind == BankKind::Data {
            return Err(FlashError::ProtectionUnavailable);
        }

        let mut regs = self.read_protect_regs(bus)?;
        let sectors_per_bank = self.sectors_per_bank();
        let bank_count = self.main_flash_bank_count;
        let kind = self.kind;

        for sector in first..last {
            let (reg, bit) = protect::protect_reg_map(kind, bank_count, sectors_per_bank, sector)?;
            if set {
                regs[reg] |= 1 << bit;
            } else {
                regs[reg] &= !(1 << bit);
            }
        }

        self.write_protect_regs(bus, &regs)?;
        self.protect_check(bus)
    }

    fn sector_is_protected(&self, sector: u32) -> bool {
        self.sectors
            .get(sector as usize)
            .map(|s| s.is_protected == TriState::Yes)
            .unwrap_or(false)
    }

    fn check_range_unprotected(&self, first: u32, last: u32) -> Result<(), FlashError> {
        for sector in first..last {
            if self.sector_is_protected(sector) {
                return Err(FlashError::SectorProtected { sector });
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Command execution
    // ---------------------------------------------------------------

    /// Waits for `STATCMD.CMDDONE`, servicing `keepalive` every 500 ms, and
    /// returns the final status or a timeout after 8 seconds of wall-clock
    /// time.
    fn wait_for_command(
        &self,
        bus: &mut impl TargetBus,
        clock: &mut impl Clock,
        keepalive: &mut impl KeepAlive,
    ) -> Result<StatCmd, FlashError> {
        let start = clock.now();
        let mut last_keepalive_elapsed = Duration::ZERO;

        loop {
            let status = StatCmd::from(bus.read_u32(FLASH_CTRL_BASE + STATCMD_OFFSET)?);
            if status.done() {
                return Ok(status);
            }

            let elapsed = clock.now() - start;
            if elapsed >= COMMAND_TIMEOUT {
                return Err(FlashError::Timeout(elapsed));
            }

            if elapsed - last_keepalive_elapsed >= KEEPALIVE_INTERVAL {
                keepalive.poll();
                last_keepalive_elapsed = elapsed;
            }
        }
    }

    fn decode_failure(status: StatCmd) -> StatCmdFailure {
        StatCmdFailure {
            in_progress: status.in_progress(),
            we_prot: status.fail_we_prot(),
            verify: status.fail_verify(),
            ill_addr: status.fail_ill_addr(),
            mode: status.fail_mode(),
            misc: status.fail_misc(),
        }
    }

    fn run_command(
        &self,
        bus: &mut impl TargetBus,
        clock: &mut impl Clock,
        keepalive: &mut impl KeepAlive,
    ) -> Result<(), FlashError> {
        bus.write_u32(FLASH_CTRL_BASE + CMDEXEC_OFFSET, CMDEXEC_EXECUTE)?;
        let status = self.wait_for_command(bus, clock, keepalive)?;
        if !status.pass() {
            return Err(FlashError::CommandFailed(Self::decode_failure(status)));
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Erase
    // ---------------------------------------------------------------

    /// Erases sectors `[first, last)`.
    ///
    /// Requires the target to be halted and the bank probed; refuses if any
    /// targeted sector is protected. Restores the pre-operation protection
    /// registers after every sector, since the hardware clears them on
    /// completion.
    pub fn erase(
        &mut self,
        bus: &mut impl TargetBus,
        halt: &mut impl HaltStateQuery,
        keepalive: &mut impl KeepAlive,
        first: u32,
        last: u32,
    ) -> Result<(), FlashError> {
        self.erase_with_clock(bus, halt, keepalive, &mut SystemClock::new(), first, last)
    }

    /// As [`Self::erase`], but with an injectable [`Clock`] for deterministic
    /// timeout testing.
    #[tracing::instrument(skip(self, bus, halt, keepalive, clock))]
    pub fn erase_with_clock(
        &mut self,
        bus: &mut impl TargetBus,
        halt: &mut impl HaltStateQuery,
        keepalive: &mut impl KeepAlive,
        clock: &mut impl Clock,
        first: u32,
        last: u32,
    ) -> Result<(), FlashError> {
        self.require_probed()?;
        self.require_halted(halt)?;
        self.check_range_unprotected(first, last)?;

        let saved_protect_regs = self.read_protect_regs(bus)?;

        for sector in first..last {
            bus.write_u32(FLASH_CTRL_BASE + CMDTYPE_OFFSET, CMDTYPE_ERASE_SECTOR)?;
            bus.write_u32(
                FLASH_CTRL_BASE + CMDADDR_OFFSET,
                sector * SECTOR_SIZE,
            )?;
            self.run_command(bus, clock, keepalive)?;
        }

        self.write_protect_regs(bus, &saved_protect_regs)?;
        self.protect_check(bus)
    }

    // ---------------------------------------------------------------
    // Program
    // ---------------------------------------------------------------

    /// Programs `data` starting at byte `offset` within the bank.
    ///
    /// `offset` must be a multiple of [`Self::flash_word_size_bytes`]. An
    /// empty `data` is a no-op regardless of alignment. Requires the
    /// target halted and no overlapping sector protected.
    /// Restores protection registers after every command cycle. Spec
    /// §4.1.5.
    pub fn program(
        &mut self,
        bus: &mut impl TargetBus,
        halt: &mut impl HaltStateQuery,
        keepalive: &mut impl KeepAlive,
        offset: u32,
        data: &[u8],
    ) -> Result<(), FlashError> {
        self.program_with_clock(bus, halt, keepalive, &mut SystemClock::new(), offset, data)
    }

    /// As [`Self::program`], but with an injectable [`Clock`].
    #[tracing::instrument(skip(self, bus, halt, keepalive, clock, data), fields(len = data.len()))]
    pub fn program_with_clock(
        &mut self,
        bus: &mut impl TargetBus,
        halt: &mut impl HaltStateQuery,
        keepalive: &mut impl KeepAlive,
        clock: &mut impl Clock,
        offset: u32,
        data: &[u8],
    ) -> Result<(), FlashError> {
        if data.is_empty() {
            return Ok(());
        }

        self.require_probed()?;

        let word_size = self.flash_word_size_bytes;
        if offset % word_size != 0 {
            return Err(FlashError::Misaligned { offset, word_size });
        }

        self.require_halted(halt)?;

        let first_sector = offset / SECTOR_SIZE;
        let last_sector = (offset + data.len() as u32).div_ceil(SECTOR_SIZE);
        self.check_range_unprotected(first_sector, last_sector)?;

        let saved_protect_regs = self.read_protect_regs(bus)?;

        let mut offset = offset;
        let mut remaining = data;

        while !remaining.is_empty() {
            let n = remaining.len().min(word_size as usize) as u32;
            let byte_enable = Self::byte_enable(word_size, n);

            bus.write_u32(FLASH_CTRL_BASE + CMDTYPE_OFFSET, CMDTYPE_PROGRAM_ONEWORD)?;
            bus.write_u32(FLASH_CTRL_BASE + CMDBYTEN_OFFSET, byte_enable)?;
            bus.write_u32(FLASH_CTRL_BASE + CMDADDR_OFFSET, offset)?;

            let (chunk, rest) = remaining.split_at(n as usize);
            for (i, word) in chunk.chunks(4).enumerate() {
                let mut bytes = [0u8; 4];
                bytes[..word.len()].copy_from_slice(word);
                bus.write_u32(
                    FLASH_CTRL_BASE + CMDDATA0_OFFSET + (i as u32) * 4,
                    u32::from_le_bytes(bytes),
                )?;
            }

            self.run_command(bus, clock, keepalive)?;
            self.write_protect_regs(bus, &saved_protect_regs)?;

            offset += n;
            remaining = rest;
        }

        self.protect_check(bus)
    }

    /// Builds the `CMDBYTEN` value for an `n`-byte write of an 8 or 16 byte
    /// flash word.
    fn byte_enable(word_size: u32, n: u32) -> u32 {
        let data_bits = if n >= 32 { u32::MAX } else { (1u32 << n) - 1 };
        match word_size {
            8 => data_bits | (1 << 8),
            16 => {
                let mut ecc = 1 << 16;
                if n > 8 {
                    ecc |= 1 << 17;
                }
                data_bits | ecc
            }
            other => {
                tracing::error!(word_size = other, "unsupported flash word size");
                data_bits
            }
        }
    }

    // ---------------------------------------------------------------
    // Info
    // ---------------------------------------------------------------

    /// A human-readable summary of the identified chip. Requires the bank
    /// to have been probed.
    pub fn info(&self) -> Result<String, FlashError> {
        self.require_probed()?;
        Ok(format!(
            "{chip} (silicon version {version}, trace ID {trace:#010x}): \
             {main_kib} KiB main flash in {banks} bank(s), {data_kib} KiB data flash, {sram_kib} KiB SRAM",
            chip = self.chip_name,
            version = self.version,
            trace = self.trace_id,
            main_kib = self.main_flash_kib,
            banks = self.main_flash_bank_count,
            data_kib = self.data_flash_kib,
            sram_kib = self.sram_kib,
        ))
    }

    /// The identified chip's human-readable name.
    pub fn chip_name(&self) -> &str {
        &self.chip_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::BusAccessError;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeBus {
        regs: HashMap<u32, u32>,
        writes: Vec<(u32, u32)>,
    }

    impl FakeBus {
        fn with(pairs: impl IntoIterator<Item = (u32, u32)>) -> Self {
            Self {
                regs: pairs.into_iter().collect(),
                writes: Vec::new(),
            }
        }
    }

    impl TargetBus for FakeBus {
        fn read_u32(&mut self, address: u32) -> Result<u32, BusAccessError> {
            Ok(*self.regs.get(&address).unwrap_or(&0))
        }

        fn write_u32(&mut self, address: u32, value: u32) -> Result<(), BusAccessError> {
            self.regs.insert(address, value);
            self.writes.push((address, value));
            Ok(())
        }
    }

    struct AlwaysHalted;
    impl HaltStateQuery for AlwaysHalted {
        fn is_halted(&mut self) -> bool {
            true
        }
    }

    struct NeverHalted;
    impl HaltStateQuery for NeverHalted {
        fn is_halted(&mut self) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct CountingKeepAlive(usize);
    impl KeepAlive for CountingKeepAlive {
        fn poll(&mut self) {
            self.0 += 1;
        }
    }

    /// A clock that advances by a fixed step every time it is read, so
    /// command-completion timeouts are exercised deterministically.
    struct SteppedClock {
        elapsed: Duration,
        step: Duration,
    }

    impl SteppedClock {
        fn new(step: Duration) -> Self {
            Self {
                elapsed: Duration::ZERO,
                step,
            }
        }
    }

    impl Clock for SteppedClock {
        fn now(&mut self) -> Duration {
            let value = self.elapsed;
            self.elapsed += self.step;
            value
        }
    }

    fn did(version: u32, family_id: u32) -> u32 {
        (version << 28) | (family_id << 12) | 1
    }

    fn user_id(part: u32, variant: u32) -> u32 {
        (variant << 16) | part
    }

    fn sram_flash(data_kib: u32, sram_kib: u32, banks_minus_one: u32, main_kib: u32) -> u32 {
        (data_kib << 26) | (sram_kib << 16) | (banks_minus_one << 12) | main_kib
    }

    fn g3507_bus() -> FakeBus {
        FakeBus::with([
            (IDENTITY_BASE + DID_OFFSET, did(0x1, chip::MSPM0G_FAMILY_ID)),
            (IDENTITY_BASE + TRACEID_OFFSET, 0xCAFE_0001),
            (IDENTITY_BASE + USERID_OFFSET, user_id(0xAE2D, 0xF7)),
            (
                IDENTITY_BASE + SRAMFLASH_OFFSET,
                sram_flash(0, 32, 0, 128),
            ),
        ])
    }

    #[test]
    fn identifies_mspm0g3507() {
        let mut bus = g3507_bus();
        let mut bank = FlashCore::new(FlashCore::MAIN).unwrap();
        bank.probe(&mut bus).unwrap();
        assert_eq!(bank.chip_name(), "MSPM0G3507SRGZR");
        assert_eq!(bank.size(), 128 * 1024);
    }

    #[test_log::test]
    fn unknown_part_known_family_warns_and_proceeds() {
        let mut bus = FakeBus::with([
            (IDENTITY_BASE + DID_OFFSET, did(0x2, chip::MSPM0L_FAMILY_ID)),
            (IDENTITY_BASE + TRACEID_OFFSET, 0),
            (IDENTITY_BASE + USERID_OFFSET, user_id(0x0000, 0x00)),
            (IDENTITY_BASE + SRAMFLASH_OFFSET, sram_flash(0, 8, 0, 32)),
        ]);
        let mut bank = FlashCore::new(FlashCore::MAIN).unwrap();
        bank.probe(&mut bus).unwrap();
        assert_eq!(bank.chip_name(), "MSPM0L");
    }

    #[test_log::test]
    fn probe_fails_on_malformed_did() {
        let mut bus = FakeBus::with([(IDENTITY_BASE + DID_OFFSET, 0)]);
        let mut bank = FlashCore::new(FlashCore::MAIN).unwrap();
        assert!(matches!(bank.probe(&mut bus), Err(FlashError::ProbeFailed)));
    }

    #[test]
    fn probe_is_idempotent() {
        let mut bus = g3507_bus();
        let mut bank = FlashCore::new(FlashCore::MAIN).unwrap();
        bank.probe(&mut bus).unwrap();
        bus.regs.insert(IDENTITY_BASE + DID_OFFSET, 0); // would now fail if re-read
        assert!(bank.probe(&mut bus).is_ok());
    }

    #[test]
    fn invalid_bank_base_rejected() {
        assert!(matches!(
            FlashCore::new(0x1234),
            Err(FlashError::InvalidBankBase(0x1234))
        ));
    }

    #[test]
    fn nonmain_bank_is_one_sector() {
        let mut bus = g3507_bus();
        let mut bank = FlashCore::new(FlashCore::NONMAIN).unwrap();
        bank.probe(&mut bus).unwrap();
        assert_eq!(bank.sectors().len(), 1);
        assert_eq!(bank.sectors()[0].size, 512);
    }

    #[test]
    fn data_bank_is_empty_when_device_reports_none() {
        let mut bus = g3507_bus();
        let mut bank = FlashCore::new(FlashCore::DATA).unwrap();
        bank.probe(&mut bus).unwrap();
        assert_eq!(bank.size(), 0);
    }

    fn probed_main_bank() -> (FlashCore, FakeBus) {
        let mut bus = g3507_bus();
        let mut bank = FlashCore::new(FlashCore::MAIN).unwrap();
        bank.probe(&mut bus).unwrap();
        (bank, bus)
    }

    #[test]
    fn erase_sector_zero_of_main() {
        let (mut bank, mut bus) = probed_main_bank();
        let protect_base = FLASH_CTRL_BASE + CMDWEPROTA_OFFSET;
        bus.regs.insert(protect_base, 0xDEAD_BEEF);
        bus.regs.insert(protect_base + 4, 0x1234_5678);
        bus.regs.insert(protect_base + 8, 0x9ABC_DEF0);
        bus.regs.insert(FLASH_CTRL_BASE + STATCMD_OFFSET, 0x3);

        let mut halt = AlwaysHalted;
        let mut keepalive = CountingKeepAlive::default();

        bank.erase(&mut bus, &mut halt, &mut keepalive, 0, 1).unwrap();

        assert_eq!(
            bus.regs[&(FLASH_CTRL_BASE + CMDTYPE_OFFSET)],
            CMDTYPE_ERASE_SECTOR
        );
        assert_eq!(bus.regs[&(FLASH_CTRL_BASE + CMDADDR_OFFSET)], 0);
        assert_eq!(bus.regs[&(FLASH_CTRL_BASE + CMDEXEC_OFFSET)], CMDEXEC_EXECUTE);
        assert_eq!(bus.regs[&protect_base], 0xDEAD_BEEF);
        assert_eq!(bus.regs[&(protect_base + 4)], 0x1234_5678);
        assert_eq!(bus.regs[&(protect_base + 8)], 0x9ABC_DEF0);
    }

    #[test]
    fn erase_requires_halted_target() {
        let (mut bank, mut bus) = probed_main_bank();
        bus.regs.insert(FLASH_CTRL_BASE + STATCMD_OFFSET, 0x3);
        let mut halt = NeverHalted;
        let mut keepalive = CountingKeepAlive::default();
        assert!(matches!(
            bank.erase(&mut bus, &mut halt, &mut keepalive, 0, 1),
            Err(FlashError::NotHalted)
        ));
    }

    #[test]
    fn protected_sector_erase_refused() {
        let (mut bank, mut bus) = probed_main_bank();
        bus.regs
            .insert(FLASH_CTRL_BASE + CMDWEPROTA_OFFSET, 1 << 3);

        let mut halt = AlwaysHalted;
        let mut keepalive = CountingKeepAlive::default();
        bank.protect_check(&mut bus).unwrap();

        let result = bank.erase(&mut bus, &mut halt, &mut keepalive, 0, 4);
        assert!(matches!(result, Err(FlashError::SectorProtected { sector: 3 })));
        assert!(!bus.writes.iter().any(|(addr, _)| *addr == FLASH_CTRL_BASE + CMDEXEC_OFFSET));
    }

    #[test]
    fn program_five_bytes_at_offset_zero() {
        let (mut bank, mut bus) = probed_main_bank();
        bus.regs.insert(FLASH_CTRL_BASE + STATCMD_OFFSET, 0x3);

        let mut halt = AlwaysHalted;
        let mut keepalive = CountingKeepAlive::default();
        let data = [0x11u8, 0x22, 0x33, 0x44, 0x55];

        bank.program(&mut bus, &mut halt, &mut keepalive, 0, &data)
            .unwrap();

        assert_eq!(bus.regs[&(FLASH_CTRL_BASE + CMDBYTEN_OFFSET)], 0x11F);
        assert_eq!(
            bus.regs[&(FLASH_CTRL_BASE + CMDDATA0_OFFSET)],
            u32::from_le_bytes([0x11, 0x22, 0x33, 0x44])
        );
        assert_eq!(
            bus.regs[&(FLASH_CTRL_BASE + CMDDATA0_OFFSET + 4)],
            u32::from_le_bytes([0x55, 0, 0, 0])
        );

        let result = bank.program(&mut bus, &mut halt, &mut keepalive, 5, &data);
        assert!(matches!(result, Err(FlashError::Misaligned { offset: 5, .. })));
    }

    /// Program idempotence on zero length (property 4).
    #[test]
    fn program_empty_is_noop_regardless_of_alignment() {
        let (mut bank, mut bus) = probed_main_bank();
        let mut halt = NeverHalted; // would fail NotHalted if this were not a no-op
        let mut keepalive = CountingKeepAlive::default();
        assert!(bank
            .program(&mut bus, &mut halt, &mut keepalive, 3, &[])
            .is_ok());
    }

    #[test]
    fn byte_enable_construction() {
        for n in 1u32..=8 {
            assert_eq!(FlashCore::byte_enable(8, n), (1u32 << n) - 1 | (1 << 8));
        }
    }

    #[test]
    fn command_failure_decodes_bits() {
        let (mut bank, mut bus) = probed_main_bank();
        bus.regs.insert(
            FLASH_CTRL_BASE + STATCMD_OFFSET,
            0x1 | (1 << 4), // done, not pass, FAILWEPROT
        );
        let mut halt = AlwaysHalted;
        let mut keepalive = CountingKeepAlive::default();
        let err = bank.erase(&mut bus, &mut halt, &mut keepalive, 0, 1).unwrap_err();
        match err {
            FlashError::CommandFailed(bits) => assert!(bits.we_prot),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn timeout_fires_at_exactly_8000ms() {
        let (mut bank, mut bus) = probed_main_bank();
        // STATCMD never reports done.
        bus.regs.insert(FLASH_CTRL_BASE + STATCMD_OFFSET, 0x0);

        let mut halt = AlwaysHalted;
        let mut keepalive = CountingKeepAlive::default();
        let mut clock = SteppedClock::new(Duration::from_millis(100));

        let err = bank
            .erase_with_clock(&mut bus, &mut halt, &mut keepalive, &mut clock, 0, 1)
            .unwrap_err();

        match err {
            FlashError::Timeout(elapsed) => assert_eq!(elapsed, Duration::from_millis(8000)),
            other => panic!("unexpected error: {other:?}"),
        }
        // One keepalive poll every 500ms over 8000ms of polling.
        assert!(keepalive.0 >= 14 && keepalive.0 <= 16);
    }

    #[test]
    fn protection_restore_invariant() {
        let (mut bank, mut bus) = probed_main_bank();
        let protect_base = FLASH_CTRL_BASE + CMDWEPROTA_OFFSET;
        let before = [0x1111_1111, 0x2222_2222, 0x3333_3333];
        for (i, v) in before.iter().enumerate() {
            bus.regs.insert(protect_base + (i as u32) * 4, *v);
        }
        bus.regs.insert(FLASH_CTRL_BASE + STATCMD_OFFSET, 0x3);

        let mut halt = AlwaysHalted;
        let mut keepalive = CountingKeepAlive::default();
        bank.erase(&mut bus, &mut halt, &mut keepalive, 0, 1).unwrap();

        for (i, v) in before.iter().enumerate() {
            assert_eq!(bus.regs[&(protect_base + (i as u32) * 4)], *v);
        }
    }
}
