//! A debug-port backend that talks directly to memory-mapped Access Ports,
//! with a compatibility mode that emulates an AP's register semantics
//! against a separate memory window.
//!
//! Unlike a JTAG/SWD transport, there is no packet exchange here: every AP
//! register access is a single volatile 32-bit load or store into a window
//! mapped once at `init` time.

pub mod config;
pub mod error;

pub use config::DmemConfig;
pub use error::DapError;

use crate::framework::{align_down, align_up, HostMmioMapper, LinuxMmioMapper, MappedWindow};
use std::collections::HashMap;

/// The transport name this backend registers under.
pub const TRANSPORT_NAME: &str = "dapdirect_swd";

/// `CTRL/STAT.CDBGPWRUPACK`.
const CDBGPWRUPACK: u32 = 1 << 29;
/// `CTRL/STAT.CSYSPWRUPACK`.
const CSYSPWRUPACK: u32 = 1 << 31;
/// The only DP register this backend answers meaningfully.
const DP_CTRL_STAT: u32 = 0x4;

/// A fixed nominal clock speed reported to callers that query it; direct
/// memory access has no SWD/JTAG clock to tune.
const NOMINAL_SPEED_KHZ: u32 = 0;

const CSW_OFFSET: u32 = 0x00;
const TAR_OFFSET: u32 = 0x04;
const DRW_OFFSET: u32 = 0x0C;
const BD0_OFFSET: u32 = 0x10;
const BD1_OFFSET: u32 = 0x14;
const BD2_OFFSET: u32 = 0x18;
const BD3_OFFSET: u32 = 0x1C;
const CFG_OFFSET: u32 = 0xF4;
const BASE_OFFSET: u32 = 0xF8;
const IDR_OFFSET: u32 = 0xFC;

/// `CSW.ADDRINC`, bits 5:4.
const ADDRINC_MASK: u32 = 0x30;
/// `CSW.SIZE`, bits 1:0.
const SIZE_MASK: u32 = 0x3;

/// Which debug-architecture revision addresses an Access Port.
///
/// Only [`DapVersion::V5`] is implemented; a [`DapVersion::V6`] access
/// always fails with [`DapError::Unsupported`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DapVersion {
    /// The flat, index/stride addressed AP scheme this backend implements.
    V5,
    /// The wider ADIv6 addressing scheme, not supported.
    V6,
}

/// Identifies one Access Port register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApAddress {
    /// AP index within the configured window (or the emulated list).
    pub index: u8,
    /// The addressing scheme the caller is using.
    pub version: DapVersion,
}

/// Software-held register state for one emulated Access Port.
#[derive(Debug, Clone, Copy, Default)]
struct EmulatedApState {
    csw: u32,
    tar: u32,
    tar_increment: u32,
    cfg: u32,
    base: u32,
    idr: u32,
}

/// The direct-memory DAP backend.
///
/// Generic over the [`HostMmioMapper`] so tests can inject an in-memory fake
/// instead of mapping real physical memory.
pub struct DmemDap<M: HostMmioMapper = LinuxMmioMapper> {
    config: DmemConfig,
    mapper: M,
    direct_window: Option<Box<dyn MappedWindow>>,
    direct_window_pad: u64,
    emu_window: Option<Box<dyn MappedWindow>>,
    emu_states: HashMap<u8, EmulatedApState>,
    last_error: Option<DapError>,
    adiv6_warned: bool,
}

impl<M: HostMmioMapper + Default> DmemDap<M> {
    /// Creates a backend with the given configuration and a default-constructed
    /// mapper.
    pub fn new(config: DmemConfig) -> Self {
        Self::with_mapper(config, M::default())
    }
}

impl<M: HostMmioMapper> DmemDap<M> {
    /// Creates a backend with the given configuration and mapper.
    pub fn with_mapper(config: DmemConfig, mapper: M) -> Self {
        Self {
            config,
            mapper,
            direct_window: None,
            direct_window_pad: 0,
            emu_window: None,
            emu_states: HashMap::new(),
            last_error: None,
            adiv6_warned: false,
        }
    }

    /// The current configuration.
    pub fn config(&self) -> &DmemConfig {
        &self.config
    }

    /// A mutable handle to the configuration; callers must re-`init` for
    /// changes to take effect.
    pub fn config_mut(&mut self) -> &mut DmemConfig {
        &mut self.config
    }

    /// Whether the direct AP window is currently mapped.
    pub fn is_initialized(&self) -> bool {
        self.direct_window.is_some()
    }

    /// The `dmem info` output: current configuration plus live state.
    pub fn info(&self) -> String {
        format!(
            "{} initialized={} emulated_aps={:?}",
            self.config.describe(),
            self.is_initialized(),
            self.emu_states.keys().collect::<Vec<_>>(),
        )
    }

    /// Maps the direct AP window (and, if configured, the emulated window).
    #[tracing::instrument(skip(self))]
    pub fn init(&mut self) -> Result<(), DapError> {
        let base = self.config.base_address.ok_or(DapError::NotConfigured)?;
        let page_size = self.mapper.page_size() as u64;
        let span = (self.config.max_aps as u64 + 1) * self.config.ap_address_offset as u64;
        let map_base = align_down(base, page_size);
        let map_end = align_up(base + span, page_size);

        let direct_window = self
            .mapper
            .map(&self.config.device_path, map_base, (map_end - map_base) as usize)?;
        self.direct_window_pad = base - map_base;
        self.direct_window = Some(direct_window);
        tracing::debug!(base = base, pad = self.direct_window_pad, "direct AP window mapped");

        if let Some((emu_base, emu_size)) = self.config.emu_base_address {
            if emu_base % page_size != 0 {
                return Err(DapError::AlignmentError(emu_base));
            }
            if emu_size % page_size != 0 {
                return Err(DapError::AlignmentError(emu_size));
            }
            let emu_window = self
                .mapper
                .map(&self.config.device_path, emu_base, emu_size as usize)?;
            self.emu_window = Some(emu_window);
            tracing::debug!(base = emu_base, size = emu_size, "emulated AP window mapped");
        }

        Ok(())
    }

    /// Unmaps both windows. Unmap failures are logged, not propagated: a
    /// failed unmap at teardown time cannot be usefully retried.
    pub fn quit(&mut self) {
        if let Some(window) = self.direct_window.take() {
            if let Err(e) = window.unmap() {
                tracing::warn!(error = %e, "failed to unmap direct AP window");
            }
        }
        if let Some(window) = self.emu_window.take() {
            if let Err(e) = window.unmap() {
                tracing::warn!(error = %e, "failed to unmap emulated AP window");
            }
        }
        self.emu_states.clear();
    }

    /// No-op; a direct-memory backend has no link to establish.
    pub fn connect(&mut self) -> Result<(), DapError> {
        Ok(())
    }

    /// No-op; there is no physical reset line to drive.
    pub fn reset(&mut self) -> Result<(), DapError> {
        Ok(())
    }

    /// Reports (but does not apply) a requested SWD/JTAG clock speed; direct
    /// memory access has no clock to tune.
    pub fn speed(&mut self, _khz: u32) -> Result<u32, DapError> {
        Ok(NOMINAL_SPEED_KHZ)
    }

    /// The nominal clock speed this backend reports.
    pub fn khz(&self) -> u32 {
        NOMINAL_SPEED_KHZ
    }

    /// The nominal speed divider this backend reports.
    pub fn speed_div(&self, _khz: u32) -> u32 {
        1
    }

    /// Reads a DP register. Only `CTRL/STAT` is meaningful; every other
    /// register reads as 0 (the link is always reported "powered up").
    pub fn queue_dp_read(&mut self, register: u32) -> u32 {
        if register == DP_CTRL_STAT {
            CDBGPWRUPACK | CSYSPWRUPACK
        } else {
            0
        }
    }

    /// Writes a DP register. Always discarded, always reported successful.
    pub fn queue_dp_write(&mut self, _register: u32, _value: u32) {}

    /// Reads an AP register, routing to direct or emulated access by index.
    /// Returns `None` and latches the error on failure.
    pub fn queue_ap_read(&mut self, ap: ApAddress, register: u32) -> Option<u32> {
        match self.ap_access(ap, register, None) {
            Ok(value) => Some(value),
            Err(e) => {
                self.latch(e);
                None
            }
        }
    }

    /// Writes an AP register, routing to direct or emulated access by index.
    /// Latches the error on failure.
    pub fn queue_ap_write(&mut self, ap: ApAddress, register: u32, value: u32) {
        if let Err(e) = self.ap_access(ap, register, Some(value)) {
            self.latch(e);
        }
    }

    /// No-op; AP abort always succeeds on this backend.
    pub fn queue_ap_abort(&mut self) {}

    /// Returns the latched error from the current queued transaction, if
    /// any, and clears it.
    pub fn run(&mut self) -> Result<(), DapError> {
        match self.last_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn latch(&mut self, error: DapError) {
        if self.last_error.is_none() {
            self.last_error = Some(error);
        }
    }

    fn ap_access(&mut self, ap: ApAddress, register: u32, write: Option<u32>) -> Result<u32, DapError> {
        if ap.version == DapVersion::V6 {
            if !self.adiv6_warned {
                tracing::error!(ap = ap.index, "ADIv6 access ports are not supported");
                self.adiv6_warned = true;
            }
            return Err(DapError::Unsupported);
        }

        if self.config.emu_ap_list.contains(&(ap.index as u64)) {
            let window = self
                .emu_window
                .as_deref()
                .ok_or(DapError::NotInitialized)?;
            let state = self.emu_states.entry(ap.index).or_default();
            emulated_access(window, state, register, write)
        } else {
            if ap.index >= self.config.max_aps {
                return Err(DapError::InvalidApIndex(ap.index));
            }
            let window = self
                .direct_window
                .as_deref()
                .ok_or(DapError::NotInitialized)?;
            direct_access(
                window,
                self.direct_window_pad,
                ap.index,
                self.config.ap_address_offset,
                register,
                write,
            )
        }
    }
}

/// A direct AP register access: physical offset `ap * stride + register`
/// within the mapped window.
fn direct_access(
    window: &dyn MappedWindow,
    window_pad: u64,
    ap: u8,
    ap_stride: u32,
    register: u32,
    write: Option<u32>,
) -> Result<u32, DapError> {
    let offset = window_pad + (ap as u64) * (ap_stride as u64) + register as u64;
    access_window(window, offset, write)
}

/// Translates an emulated MEM-AP register access into a flat memory access.
fn emulated_access(
    window: &dyn MappedWindow,
    state: &mut EmulatedApState,
    register: u32,
    write: Option<u32>,
) -> Result<u32, DapError> {
    match register {
        CSW_OFFSET => {
            if let Some(value) = write {
                state.csw = value;
            }
            Ok(state.csw)
        }
        TAR_OFFSET => {
            if let Some(value) = write {
                state.tar = value;
                state.tar_increment = 0;
            }
            Ok(state.tar)
        }
        CFG_OFFSET => {
            if let Some(value) = write {
                state.cfg = value;
            }
            Ok(0)
        }
        BASE_OFFSET => {
            if let Some(value) = write {
                state.base = value;
            }
            Ok(0)
        }
        IDR_OFFSET => {
            if let Some(value) = write {
                state.idr = value;
            }
            Ok(0)
        }
        BD0_OFFSET | BD1_OFFSET | BD2_OFFSET | BD3_OFFSET => {
            let target = mask_protocol_bit((state.tar & !0xF) | (register & 0x0C));
            access_window(window, target as u64, write)
        }
        DRW_OFFSET => {
            let target = mask_protocol_bit((state.tar & !0x3).wrapping_add(state.tar_increment));
            let result = access_window(window, target as u64, write)?;
            if state.csw & ADDRINC_MASK != 0 {
                state.tar_increment = state.tar_increment.wrapping_add((state.csw & SIZE_MASK) * 2);
            }
            Ok(result)
        }
        other => Err(DapError::InvalidRegister(other)),
    }
}

/// Bit 31 of a target address is a protocol marker, not part of the
/// physical address; always masked off before indexing a window.
fn mask_protocol_bit(address: u32) -> u32 {
    address & !(1 << 31)
}

fn access_window(window: &dyn MappedWindow, offset: u64, write: Option<u32>) -> Result<u32, DapError> {
    let offset = offset as usize;
    let in_bounds = matches!(offset.checked_add(4), Some(end) if end <= window.len());
    if !in_bounds {
        return Err(DapError::Other(anyhow::anyhow!(
            "access at offset {offset:#x} is outside the mapped window ({} bytes)",
            window.len()
        )));
    }
    Ok(match write {
        Some(value) => {
            window.write_u32(offset, value);
            value
        }
        None => window.read_u32(offset),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::MapError;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug)]
    struct FakeWindow {
        bytes: Rc<RefCell<Vec<u8>>>,
    }

    impl MappedWindow for FakeWindow {
        fn read_u32(&self, offset: usize) -> u32 {
            let bytes = self.bytes.borrow();
            u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
        }

        fn write_u32(&self, offset: usize, value: u32) {
            let mut bytes = self.bytes.borrow_mut();
            bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }

        fn len(&self) -> usize {
            self.bytes.borrow().len()
        }

        fn unmap(self: Box<Self>) -> Result<(), MapError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeMapper {
        page_size: usize,
    }

    impl HostMmioMapper for FakeMapper {
        fn map(
            &mut self,
            _device_path: &str,
            _phys_base: u64,
            len: usize,
        ) -> Result<Box<dyn MappedWindow>, MapError> {
            Ok(Box::new(FakeWindow {
                bytes: Rc::new(RefCell::new(vec![0u8; len])),
            }))
        }

        fn page_size(&self) -> usize {
            if self.page_size == 0 {
                4096
            } else {
                self.page_size
            }
        }
    }

    fn configured_dap() -> DmemDap<FakeMapper> {
        let mut config = DmemConfig::default();
        config.base_address = Some(0x5000_0000);
        config.max_aps = 1;
        DmemDap::with_mapper(config, FakeMapper::default())
    }

    #[test]
    fn init_fails_without_base_address() {
        let mut dap = DmemDap::with_mapper(DmemConfig::default(), FakeMapper::default());
        assert!(matches!(dap.init(), Err(DapError::NotConfigured)));
    }

    #[test]
    fn init_then_quit_round_trips() {
        let mut dap = configured_dap();
        dap.init().unwrap();
        assert!(dap.is_initialized());
        dap.quit();
        assert!(!dap.is_initialized());
    }

    #[test]
    fn lifecycle_no_ops_succeed() {
        let mut dap = configured_dap();
        dap.init().unwrap();
        assert!(dap.connect().is_ok());
        assert!(dap.reset().is_ok());
        assert_eq!(dap.speed(4000).unwrap(), NOMINAL_SPEED_KHZ);
        dap.queue_ap_abort();
    }

    #[test]
    fn dp_ctrl_stat_reports_powered_up() {
        let mut dap = configured_dap();
        dap.init().unwrap();
        let value = dap.queue_dp_read(DP_CTRL_STAT);
        assert_eq!(value, CDBGPWRUPACK | CSYSPWRUPACK);
        assert_eq!(dap.queue_dp_read(0x0), 0);
        dap.queue_dp_write(0x0, 0xFFFF_FFFF);
        assert!(dap.run().is_ok());
    }

    #[test]
    fn direct_ap_write_then_read_round_trips() {
        let mut dap = configured_dap();
        dap.init().unwrap();
        let ap = ApAddress { index: 0, version: DapVersion::V5 };
        dap.queue_ap_write(ap, 0x04, 0xCAFE_BABE);
        let value = dap.queue_ap_read(ap, 0x04);
        assert_eq!(value, Some(0xCAFE_BABE));
        assert!(dap.run().is_ok());
    }

    #[test_log::test]
    fn adiv6_access_is_rejected_every_time() {
        let mut dap = configured_dap();
        dap.init().unwrap();
        let ap = ApAddress { index: 0, version: DapVersion::V6 };
        assert_eq!(dap.queue_ap_read(ap, 0x0), None);
        assert!(matches!(dap.run(), Err(DapError::Unsupported)));
        assert_eq!(dap.queue_ap_read(ap, 0x0), None);
        assert!(matches!(dap.run(), Err(DapError::Unsupported)));
    }

    #[test]
    fn direct_access_beyond_max_aps_is_rejected() {
        let mut dap = configured_dap();
        dap.init().unwrap();
        let ap = ApAddress { index: 1, version: DapVersion::V5 };
        assert_eq!(dap.queue_ap_read(ap, CSW_OFFSET), None);
        assert!(matches!(dap.run(), Err(DapError::InvalidApIndex(1))));
    }

    #[test]
    fn unknown_emulated_register_latches_and_is_cleared_by_run() {
        let mut config = DmemConfig::default();
        config.base_address = Some(0x5000_0000);
        config.emu_ap_list = vec![0];
        config.emu_base_address = Some((0x6000_0000, 0x1000));
        let mut dap = DmemDap::with_mapper(config, FakeMapper::default());
        dap.init().unwrap();
        let ap = ApAddress { index: 0, version: DapVersion::V5 };
        assert_eq!(dap.queue_ap_read(ap, 0x20), None);
        assert!(matches!(dap.run(), Err(DapError::InvalidRegister(0x20))));
        assert!(dap.run().is_ok());
    }

    #[test]
    fn emulated_drw_auto_increment_sequence() {
        let mut config = DmemConfig::default();
        config.base_address = Some(0x5000_0000);
        config.emu_ap_list = vec![0];
        config.emu_base_address = Some((0x6000_0000, 0x4000));
        let mut dap = DmemDap::with_mapper(config, FakeMapper::default());
        dap.init().unwrap();

        let ap = ApAddress { index: 0, version: DapVersion::V5 };
        dap.queue_ap_write(ap, CSW_OFFSET, 0x22); // word size, auto-increment on
        dap.queue_ap_write(ap, TAR_OFFSET, 0x1000);

        dap.queue_ap_write(ap, DRW_OFFSET, 0x1111_1111);
        dap.queue_ap_write(ap, DRW_OFFSET, 0x2222_2222);
        dap.queue_ap_write(ap, DRW_OFFSET, 0x3333_3333);
        assert!(dap.run().is_ok());

        let window = dap.emu_window.as_deref().unwrap();
        assert_eq!(window.read_u32(0x1000), 0x1111_1111);
        assert_eq!(window.read_u32(0x1004), 0x2222_2222);
        assert_eq!(window.read_u32(0x1008), 0x3333_3333);
    }

    #[test]
    fn emulated_bd_registers_ignore_low_nibble_of_tar() {
        let mut config = DmemConfig::default();
        config.base_address = Some(0x5000_0000);
        config.emu_ap_list = vec![0];
        config.emu_base_address = Some((0x6000_0000, 0x4000));
        let mut dap = DmemDap::with_mapper(config, FakeMapper::default());
        dap.init().unwrap();

        let ap = ApAddress { index: 0, version: DapVersion::V5 };
        dap.queue_ap_write(ap, TAR_OFFSET, 0x2003);
        dap.queue_ap_write(ap, BD0_OFFSET, 0xAAAA_AAAA);
        dap.queue_ap_write(ap, BD2_OFFSET, 0xBBBB_BBBB);
        assert!(dap.run().is_ok());

        let window = dap.emu_window.as_deref().unwrap();
        assert_eq!(window.read_u32(0x2000), 0xAAAA_AAAA);
        assert_eq!(window.read_u32(0x2008), 0xBBBB_BBBB);
    }
}
