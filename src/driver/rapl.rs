//! CPU package energy via Intel RAPL MSRs.
//!
//! Reads `MSR_PKG_ENERGY_STATUS` on one representative core per physical
//! package through `/dev/cpu/<n>/msr`, converting the wrapping 32-bit
//! cumulative counter into per-sample energy deltas.

use std::fs::File;
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::clock::now_ns;
use crate::config::RaplConfig;
use crate::data::DataProperties;
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::si::SiFactor;

const MSR_RAPL_POWER_UNIT: u64 = 0x606;
const MSR_PKG_ENERGY_STATUS: u64 = 0x611;

/// Value no real 32-bit counter can produce; marks "never sampled".
const WRAP_VALUE: u64 = 1u64 << 32;

/// Intel family-6 models from Sandybridge through Kabylake that expose
/// package RAPL counters in the documented layout.
const SUPPORTED_MODELS: &[u8] = &[
    0x2A, 0x2D, // Sandybridge, Sandybridge-EP
    0x3A, 0x3E, // Ivybridge, Ivybridge-EP
    0x3C, 0x3F, 0x45, 0x46, // Haswell
    0x3D, 0x47, 0x4F, 0x56, // Broadwell
    0x4E, 0x5E, // Skylake
    0x8E, 0x9E, // Kabylake
];

struct Package {
    #[allow(dead_code)]
    representative_core: u32,
    msr: File,
    energy_divisor: u64,
    /// `WRAP_VALUE` sentinel means "never sampled". `measure` takes `&self`
    /// (the `Driver` trait's signature), so this one piece of per-package
    /// mutable state lives behind an atomic rather than a `&mut self`.
    prev_energy: AtomicU64,
}

pub struct RaplDriver {
    config: RaplConfig,
    packages: Vec<Package>,
    failed_reason: Option<String>,
}

impl RaplDriver {
    pub fn new(config: RaplConfig) -> Self {
        RaplDriver { config, packages: Vec::new(), failed_reason: None }
    }

    fn check_supported_cpu() -> Result<()> {
        let cpuinfo = std::fs::read_to_string("/proc/cpuinfo").map_err(Error::Io)?;
        let mut family = None;
        let mut model = None;
        for line in cpuinfo.lines() {
            if let Some(v) = line.strip_prefix("cpu family") {
                family = v.rsplit(':').next().and_then(|s| s.trim().parse::<u32>().ok());
            } else if let Some(v) = line.strip_prefix("model") {
                if !line.starts_with("model name") {
                    model = v.rsplit(':').next().and_then(|s| s.trim().parse::<u32>().ok());
                }
            }
            if family.is_some() && model.is_some() {
                break;
            }
        }
        match (family, model) {
            (Some(6), Some(m)) if SUPPORTED_MODELS.contains(&(m as u8)) => Ok(()),
            (family, model) => Err(Error::UnsupportedHardware(format!(
                "CPU family {family:?} model {model:?} is not a supported RAPL part"
            ))),
        }
    }

    fn present_cores() -> Result<Vec<u32>> {
        let text = std::fs::read_to_string("/sys/devices/system/cpu/present").map_err(Error::Io)?;
        parse_cpu_range(text.trim())
    }

    fn package_of(core: u32) -> Result<u32> {
        let path = format!("/sys/devices/system/cpu/cpu{core}/topology/physical_package_id");
        let text = std::fs::read_to_string(path).map_err(Error::Io)?;
        text.trim().parse::<u32>().map_err(|e| Error::ParseError(e.to_string()))
    }

    fn open_msr(core: u32) -> Result<File> {
        let path = format!("/dev/cpu/{core}/msr");
        File::open(path).map_err(|e| {
            if e.kind() == ErrorKind::PermissionDenied {
                Error::NoPermission
            } else {
                Error::Io(e)
            }
        })
    }

    fn read_msr(msr: &File, offset: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        msr.read_exact_at(&mut buf, offset).map_err(Error::Io)?;
        Ok(u64::from_le_bytes(buf))
    }
}

/// Parses a Linux cpulist range string (e.g. `"0-7"` or `"0-3,8-11"`).
fn parse_cpu_range(text: &str) -> Result<Vec<u32>> {
    let mut cores = Vec::new();
    for part in text.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: u32 = lo.parse().map_err(|_| Error::ParseError(text.to_string()))?;
                let hi: u32 = hi.parse().map_err(|_| Error::ParseError(text.to_string()))?;
                cores.extend(lo..=hi);
            }
            None => cores.push(part.parse().map_err(|_| Error::ParseError(text.to_string()))?),
        }
    }
    Ok(cores)
}

impl Driver for RaplDriver {
    fn name(&self) -> &'static str {
        "rapl"
    }

    fn init(&mut self) -> Result<()> {
        if let Err(e) = Self::check_supported_cpu() {
            self.failed_reason = Some(e.to_string());
            return Err(e);
        }

        let cores = match Self::present_cores() {
            Ok(c) => c,
            Err(e) => {
                self.failed_reason = Some(e.to_string());
                return Err(e);
            }
        };

        let mut representative_core_by_package = std::collections::BTreeMap::new();
        for core in cores {
            let package = Self::package_of(core)?;
            representative_core_by_package.entry(package).or_insert(core);
        }

        let mut packages = Vec::new();
        for (_, core) in representative_core_by_package {
            let msr = match Self::open_msr(core) {
                Ok(f) => f,
                Err(e) => {
                    self.failed_reason = Some(e.to_string());
                    return Err(e);
                }
            };
            let unit = Self::read_msr(&msr, MSR_RAPL_POWER_UNIT)?;
            let energy_units_bits = (unit >> 8) & 0x1F;
            let energy_divisor = 1u64 << energy_units_bits;
            packages.push(Package {
                representative_core: core,
                msr,
                energy_divisor,
                prev_energy: AtomicU64::new(WRAP_VALUE),
            });
        }

        self.packages = packages;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.packages.clear();
        Ok(())
    }

    fn device_count(&self) -> usize {
        self.packages.len()
    }

    fn measure(&self, device_index: usize, out: &mut [u64]) -> Result<()> {
        let package = &self.packages[device_index];
        out[0] = now_ns() / 1_000_000;

        let raw = Self::read_msr(&package.msr, MSR_PKG_ENERGY_STATUS)? & 0xFFFF_FFFF;
        let prev = package.prev_energy.swap(raw, Ordering::Relaxed);
        out[1] = wraparound_delta(raw, prev);
        Ok(())
    }

    fn default_props(&self) -> DataProperties {
        // The energy factor is derived from the MSR's own unit register
        // rather than a fixed constant: `-energy_divisor`, since the raw
        // delta is stored in units of `1/energy_divisor` joules. All
        // packages on a given host report the same divisor in practice; if
        // no package initialized successfully, fall back to the divisor
        // found on essentially every RAPL-capable part (2^-16, i.e. 65536).
        let divisor = self.packages.first().map(|p| p.energy_divisor).unwrap_or(65_536);
        DataProperties {
            time_factor: SiFactor::MILLI,
            energy_factor: SiFactor(-(divisor as i64)),
            power_factor: SiFactor::NONE,
            inst_energy_field: 1,
            inst_power_field: 0,
            sampling_nanos: self.config.sampling_interval_nanos,
        }
    }

    fn failed_reason(&self) -> Option<&str> {
        self.failed_reason.as_deref()
    }
}

/// Sentinel emits 0; a decreasing raw value wrapped around once; otherwise
/// plain subtraction.
fn wraparound_delta(raw: u64, prev: u64) -> u64 {
    if prev == WRAP_VALUE {
        0
    } else if raw < prev {
        raw + (WRAP_VALUE - prev)
    } else {
        raw - prev
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_wraparound_yields_expected_deltas() {
        let mut prev = WRAP_VALUE;
        let mut deltas = Vec::new();
        for raw in [0xFFFF_FFFEu64, 0x0000_0001, 0x0000_0003] {
            deltas.push(wraparound_delta(raw, prev));
            prev = raw;
        }
        assert_eq!(deltas, vec![0, 3, 2]);
    }

    #[test]
    fn parses_simple_and_ranged_cpu_lists() {
        assert_eq!(parse_cpu_range("0-3").unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(parse_cpu_range("0-1,4-5").unwrap(), vec![0, 1, 4, 5]);
        assert_eq!(parse_cpu_range("7").unwrap(), vec![7]);
    }
}
