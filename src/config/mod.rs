//! Typed per-driver configuration.
//!
//! This module owns the shape of the options every driver recognizes and
//! the XDG config-file *discovery* algorithm ([`discover::discover_path`]).
//! It does not parse a config-file grammar: building a [`Config`] from a
//! file on disk is left to whatever format a caller's configuration layer
//! uses upstream.

pub mod discover;

pub use discover::discover_path;

/// One PDU or PMLib network endpoint (`device` section entries).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
    /// Raw RC4 key material as configured: either ≤16 ASCII bytes or 32 hex
    /// digits. Parsed into 16 raw bytes by the PDU driver at `init`.
    pub rc4key: String,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RaplConfig {
    pub disabled: bool,
    pub sampling_interval_nanos: u64,
}

impl Default for RaplConfig {
    fn default() -> Self {
        RaplConfig { disabled: false, sampling_interval_nanos: 1_000_000_000 }
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NvmlConfig {
    pub disabled: bool,
    pub sampling_interval_nanos: u64,
}

impl Default for NvmlConfig {
    fn default() -> Self {
        NvmlConfig { disabled: false, sampling_interval_nanos: 16_000_000 }
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MicConfig {
    pub disabled: bool,
    pub sampling_interval_nanos: u64,
}

impl Default for MicConfig {
    fn default() -> Self {
        MicConfig { disabled: false, sampling_interval_nanos: 16_000_000 }
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OdroidConfig {
    pub disabled: bool,
    pub sampling_interval_nanos: u64,
}

impl Default for OdroidConfig {
    fn default() -> Self {
        // MSR_PKG_ENERGY_STATUS-equivalent: the INA231 sensor itself
        // updates roughly every 263808us.
        OdroidConfig { disabled: false, sampling_interval_nanos: 263_808_000 }
    }
}

#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SbPduConfig {
    pub disabled: bool,
    pub sampling_interval_nanos: Option<u64>,
    pub devices: Vec<EndpointConfig>,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LabeeConfig {
    pub disabled: bool,
    pub sampling_interval_nanos: u64,
    pub api_url: String,
    pub user: String,
    pub password: String,
    pub hostname: String,
    pub nodelist_file: String,
    pub power_attribute: String,
}

impl Default for LabeeConfig {
    fn default() -> Self {
        LabeeConfig {
            disabled: true,
            sampling_interval_nanos: 150_000_000,
            api_url: "http://10.11.12.242/REST/node".to_string(),
            user: String::new(),
            password: String::new(),
            hostname: String::new(),
            nodelist_file: "./nodelist".to_string(),
            power_attribute: "actualPowerUsage".to_string(),
        }
    }
}

/// One `pmlib` server connection and the outlets to read from it.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PmlibDeviceConfig {
    pub host: String,
    pub port: u16,
    pub device_name: String,
    pub n_outlets: usize,
    /// Outlet indices (0-based) to expose as measurement devices.
    pub target_outlets: Vec<usize>,
}

impl Default for PmlibDeviceConfig {
    fn default() -> Self {
        PmlibDeviceConfig {
            host: "localhost".to_string(),
            port: 6526,
            device_name: "DummyDevice".to_string(),
            n_outlets: 2,
            target_outlets: vec![1, 2],
        }
    }
}

#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PmlibConfig {
    pub disabled: bool,
    pub sampling_interval_nanos: Option<u64>,
    pub devices: Vec<PmlibDeviceConfig>,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DummyConfig {
    pub disabled: bool,
    pub sampling_interval_nanos: u64,
}

impl Default for DummyConfig {
    fn default() -> Self {
        // Enabled by default, unlike the others: it needs no hardware and
        // is the reference driver for this crate's own test suite.
        DummyConfig { disabled: false, sampling_interval_nanos: 100_000_000 }
    }
}

/// Top-level configuration tree: one section per driver.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    pub rapl: RaplConfig,
    pub nvml: NvmlConfig,
    pub mic: MicConfig,
    pub odroid: OdroidConfig,
    pub sbpdu: SbPduConfig,
    pub labee: LabeeConfig,
    pub pmlib: PmlibConfig,
    pub dummy: DummyConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_expected_sampling_intervals() {
        assert_eq!(RaplConfig::default().sampling_interval_nanos, 1_000_000_000);
        assert_eq!(DummyConfig::default().sampling_interval_nanos, 100_000_000);
        assert!(!DummyConfig::default().disabled);
        assert!(LabeeConfig::default().disabled);
    }
}
