//! The `dmem` command subtree: runtime configuration for [`super::DmemDap`].

/// Maximum number of AP indices that can be emulated at once.
pub const MAX_EMULATED_APS: usize = 5;

/// Default backing device for direct physical-memory access.
pub const DEFAULT_DEVICE_PATH: &str = "/dev/mem";

/// Default per-AP register stride.
pub const DEFAULT_AP_STRIDE: u32 = 0x100;

/// Default number of APs the direct window is sized to cover.
pub const DEFAULT_MAX_APS: u8 = 1;

/// Configuration for a [`super::DmemDap`] instance, populated by the `dmem`
/// command subtree before `init` is called.
#[derive(Debug, Clone)]
pub struct DmemConfig {
    /// Backing device path, e.g. `/dev/mem`.
    pub device_path: String,
    /// Physical base address of the direct AP window.
    pub base_address: Option<u64>,
    /// Byte stride between consecutive AP register blocks.
    pub ap_address_offset: u32,
    /// Number of APs the direct window is sized to cover.
    pub max_aps: u8,
    /// AP indices routed through emulation instead of direct access.
    pub emu_ap_list: Vec<u64>,
    /// Emulated memory window: `(base, size)`, if configured.
    pub emu_base_address: Option<(u64, u64)>,
}

impl Default for DmemConfig {
    fn default() -> Self {
        Self {
            device_path: DEFAULT_DEVICE_PATH.to_string(),
            base_address: None,
            ap_address_offset: DEFAULT_AP_STRIDE,
            max_aps: DEFAULT_MAX_APS,
            emu_ap_list: Vec::new(),
            emu_base_address: None,
        }
    }
}

impl DmemConfig {
    /// A one-line human summary, the content of the `dmem info` command.
    pub fn describe(&self) -> String {
        format!(
            "device={} base_address={} ap_address_offset={:#x} max_aps={} emu_ap_list={:?} emu_base_address={}",
            self.device_path,
            self.base_address
                .map(|b| format!("{b:#x}"))
                .unwrap_or_else(|| "unset".to_string()),
            self.ap_address_offset,
            self.max_aps,
            self.emu_ap_list,
            self.emu_base_address
                .map(|(b, s)| format!("{b:#x}+{s:#x}"))
                .unwrap_or_else(|| "unset".to_string()),
        )
    }
}

#[cfg(feature = "cli")]
mod cli {
    use super::DmemConfig;
    use clap::{Parser, Subcommand};

    /// A single `dmem` command-subtree invocation.
    #[derive(Debug, Parser)]
    #[command(name = "dmem", about = "Configure the direct-memory DAP backend")]
    pub struct DmemConfigArgs {
        /// The `dmem` subcommand to run.
        #[command(subcommand)]
        pub command: DmemCommand,
    }

    /// One `dmem` subcommand.
    #[derive(Debug, Subcommand)]
    pub enum DmemCommand {
        /// Print the current configuration.
        Info,
        /// Override the backing device path.
        Device {
            /// New device path.
            path: String,
        },
        /// Set the DAP window's physical base address.
        BaseAddress {
            /// Base address, accepted as hex (`0x...`) or decimal.
            #[arg(value_parser = parse_hex_or_dec)]
            address: u64,
        },
        /// Set the per-AP register stride.
        ApAddressOffset {
            /// Stride in bytes, accepted as hex or decimal.
            #[arg(value_parser = parse_hex_or_dec_u32)]
            offset: u32,
        },
        /// Set the number of APs the direct window covers.
        MaxAps {
            /// AP count.
            count: u8,
        },
        /// Set the list of AP indices to emulate.
        EmuApList {
            /// Up to 5 AP indices, each hex or decimal.
            #[arg(value_parser = parse_hex_or_dec, num_args = 0..=5)]
            indices: Vec<u64>,
        },
        /// Set the emulated memory window's base address and size.
        EmuBaseAddress {
            /// Base address, hex or decimal.
            #[arg(value_parser = parse_hex_or_dec)]
            base: u64,
            /// Size in bytes, hex or decimal.
            #[arg(value_parser = parse_hex_or_dec)]
            size: u64,
        },
    }

    fn parse_hex_or_dec(s: &str) -> Result<u64, String> {
        parse_int::parse(s).map_err(|e| e.to_string())
    }

    fn parse_hex_or_dec_u32(s: &str) -> Result<u32, String> {
        parse_int::parse(s).map_err(|e| e.to_string())
    }

    /// Applies one parsed `dmem` subcommand to `config`, returning the
    /// `dmem info` output when the command was `Info`.
    pub fn apply(config: &mut DmemConfig, command: DmemCommand) -> Option<String> {
        match command {
            DmemCommand::Info => Some(config.describe()),
            DmemCommand::Device { path } => {
                config.device_path = path;
                None
            }
            DmemCommand::BaseAddress { address } => {
                config.base_address = Some(address);
                None
            }
            DmemCommand::ApAddressOffset { offset } => {
                config.ap_address_offset = offset;
                None
            }
            DmemCommand::MaxAps { count } => {
                config.max_aps = count;
                None
            }
            DmemCommand::EmuApList { indices } => {
                config.emu_ap_list = indices;
                None
            }
            DmemCommand::EmuBaseAddress { base, size } => {
                config.emu_base_address = Some((base, size));
                None
            }
        }
    }
}

#[cfg(feature = "cli")]
pub use cli::{apply, DmemCommand, DmemConfigArgs};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = DmemConfig::default();
        assert_eq!(config.device_path, "/dev/mem");
        assert_eq!(config.ap_address_offset, 0x100);
        assert_eq!(config.max_aps, 1);
        assert!(config.emu_ap_list.is_empty());
        assert!(config.emu_base_address.is_none());
    }

    #[test]
    fn describe_reports_unset_fields() {
        let config = DmemConfig::default();
        let summary = config.describe();
        assert!(summary.contains("base_address=unset"));
        assert!(summary.contains("emu_base_address=unset"));
    }
}
