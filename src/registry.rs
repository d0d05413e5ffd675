//! Driver and device enumeration, and process-wide library lifecycle.
//!
//! [`Library::init`] is the single entry point a host program calls before
//! touching any device; [`Library`] owns every driver, device, and monitor
//! for as long as the host keeps it alive.

use std::sync::Arc;

use crate::config::Config;
use crate::data::Dataset;
use crate::driver::{Device, Driver, SupportStatus};
use crate::error::{Error, Result};
use crate::monitor::Monitor;

/// One driver family's slot in the registry. `driver` is `None` when the
/// family was disabled in configuration or its `init` failed; it's present
/// only once compiled in (gated by the matching Cargo feature).
struct DriverSlot {
    name: &'static str,
    driver: Option<Arc<dyn Driver>>,
}

/// One enumerated device plus the bookkeeping the registry needs to route
/// `begin`/`end` to it.
struct DeviceEntry {
    device: Device,
    monitor: Monitor,
}

/// Owns every compiled-in driver, every device they enumerated, and every
/// device's monitor. Constructed once by [`Library::init`] and torn down by
/// [`Library::shutdown`].
pub struct Library {
    drivers: Vec<DriverSlot>,
    devices: Vec<DeviceEntry>,
}

impl Library {
    /// Brings up every compiled-in driver family, in declaration order. A
    /// disabled family, or one whose `init` fails, is recorded with no
    /// devices and the registry keeps starting the rest; only the two
    /// outcomes visible through [`support_status`](Library::support_status)
    /// change. Families left out entirely by Cargo features never get a
    /// slot, which is what makes `NotCompiled` distinguishable from
    /// `NotRuntime`.
    pub fn init(config: &Config) -> Result<Library> {
        let mut drivers = Vec::new();
        let mut devices = Vec::new();

        macro_rules! bring_up {
            ($name:literal, $disabled:expr, $ctor:expr) => {{
                let driver = if $disabled {
                    log::info!("driver '{}' disabled from configuration", $name);
                    None
                } else {
                    let mut driver: Box<dyn Driver> = Box::new($ctor);
                    match driver.init() {
                        Ok(()) => {
                            let n = driver.device_count();
                            let driver: Arc<dyn Driver> = Arc::from(driver);
                            for i in 0..n {
                                let name = device_name($name, &driver.device_label(i));
                                devices.push(DeviceEntry {
                                    device: Device { name: name.clone(), driver_index: drivers.len(), index_in_driver: i },
                                    monitor: Monitor::new(name),
                                });
                            }
                            Some(driver)
                        }
                        Err(e) => {
                            log::warn!("driver '{}' init failed: {e}", $name);
                            None
                        }
                    }
                };
                drivers.push(DriverSlot { name: $name, driver });
            }};
        }

        #[cfg(feature = "rapl")]
        bring_up!("rapl", config.rapl.disabled, crate::driver::rapl::RaplDriver::new(config.rapl.clone()));
        #[cfg(feature = "nvml")]
        bring_up!("nvml", config.nvml.disabled, crate::driver::nvml::NvmlDriver::new(config.nvml.clone()));
        #[cfg(feature = "mic")]
        bring_up!("mic", config.mic.disabled, crate::driver::mic::MicDriver::new(config.mic.clone()));
        #[cfg(feature = "odroid")]
        bring_up!("odroid", config.odroid.disabled, crate::driver::odroid::OdroidDriver::new(config.odroid.clone()));
        #[cfg(feature = "sbpdu")]
        bring_up!("sb_pdu", config.sbpdu.disabled, crate::driver::sbpdu::SbPduDriver::new(config.sbpdu.clone()));
        #[cfg(feature = "labee")]
        bring_up!("labee", config.labee.disabled, crate::driver::labee::LabeeDriver::new(config.labee.clone()));
        #[cfg(feature = "pmlib")]
        bring_up!("pmlib", config.pmlib.disabled, crate::driver::pmlib::PmlibDriver::new(config.pmlib.clone()));
        #[cfg(feature = "dummy")]
        bring_up!("dummy", config.dummy.disabled, crate::driver::dummy::DummyDriver::new(config.dummy.clone()));

        Ok(Library { drivers, devices })
    }

    /// Tears every driver down in reverse bring-up order, forcing any
    /// outstanding interval closed first so every sampler thread is joined
    /// before its driver is shut down.
    pub fn shutdown(self) -> Result<()> {
        for entry in &self.devices {
            while entry.monitor.level() > 0 {
                let _ = entry.monitor.stop();
            }
        }

        let mut last_err = None;
        for mut slot in self.drivers.into_iter().rev() {
            let Some(mut driver) = slot.driver.take() else { continue };
            match Arc::get_mut(&mut driver) {
                Some(driver) => {
                    if let Err(e) = driver.shutdown() {
                        log::warn!("driver '{}' shutdown failed: {e}", slot.name);
                        last_err = Some(e);
                    }
                }
                None => {
                    // Every interval was force-closed above, so no sampler
                    // thread should still hold a clone; seeing one here
                    // means a dataset from this driver's devices outlived
                    // the library, which is a caller bug.
                    log::error!("driver '{}' has outstanding references at shutdown, skipping its shutdown()", slot.name);
                }
            }
        }

        last_err.map_or(Ok(()), Err)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn device_by_index(&self, index: usize) -> Result<&Device> {
        self.devices.get(index).map(|e| &e.device).ok_or(Error::InvalidParameter(format!("device index {index}")))
    }

    pub fn device_by_name(&self, name: &str) -> Result<&Device> {
        self.devices
            .iter()
            .map(|e| &e.device)
            .find(|d| d.name == name)
            .ok_or_else(|| Error::InvalidParameter(format!("no such device '{name}'")))
    }

    /// Compile/runtime support status for one driver family, looked up by
    /// its short name (`"rapl"`, `"nvml"`, `"mic"`, `"odroid"`, `"sb_pdu"`,
    /// `"labee"`, `"pmlib"`, `"dummy"`).
    pub fn support_status(&self, driver_name: &str) -> SupportStatus {
        match self.drivers.iter().find(|s| s.name == driver_name) {
            None => SupportStatus::NotCompiled,
            Some(slot) if slot.driver.is_none() => SupportStatus::NotRuntime,
            Some(_) => SupportStatus::Available,
        }
    }

    fn entry(&self, index: usize) -> Result<&DeviceEntry> {
        self.devices.get(index).ok_or(Error::InvalidParameter(format!("device index {index}")))
    }

    /// Begins a measurement interval on one device.
    pub fn begin(&self, device_index: usize) -> Result<()> {
        let entry = self.entry(device_index)?;
        let slot = &self.drivers[entry.device.driver_index];
        let driver = slot.driver.as_ref().ok_or(Error::NotInitialized)?;
        let props = driver.default_props();
        entry.monitor.start(Arc::clone(driver), entry.device.index_in_driver, props)
    }

    /// Ends the innermost open interval on one device.
    pub fn end(&self, device_index: usize) -> Result<Dataset> {
        self.entry(device_index)?.monitor.stop()
    }

    /// Begins an interval on every enumerated device. If any device fails
    /// to start (most likely `stack-full`), every device already started in
    /// this call is stopped and released before returning the error, so a
    /// failed `begin_all` leaves no device mid-interval.
    pub fn begin_all(&self) -> Result<()> {
        for i in 0..self.devices.len() {
            if let Err(e) = self.begin(i) {
                for j in 0..i {
                    let _ = self.end(j);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Ends the innermost interval on every device. Per-device failures are
    /// logged and skipped rather than aborting the sweep, so callers still
    /// get datasets back for every device that succeeded; the last error
    /// seen, if any, is returned.
    pub fn end_all(&self) -> (Vec<Option<Dataset>>, Result<()>) {
        let mut results = Vec::with_capacity(self.devices.len());
        let mut last_err = None;
        for i in 0..self.devices.len() {
            match self.end(i) {
                Ok(dataset) => results.push(Some(dataset)),
                Err(e) => {
                    log::error!("end_all: device {i}: {e}");
                    last_err = Some(e);
                    results.push(None);
                }
            }
        }
        (results, last_err.map_or(Ok(()), Err))
    }
}

/// `"<driver>-<index>"` for single-device drivers; `"<driver><pdu>_outlet<k>"`
/// for the two multi-outlet network drivers, where `label` (built by
/// [`Driver::device_label`]) already encodes the per-endpoint PDU/server
/// index and the outlet ordinal within it (e.g. `"0_outlet0"`).
fn device_name(driver_name: &'static str, label: &str) -> String {
    match driver_name {
        "sb_pdu" | "pmlib" => format!("{driver_name}{label}"),
        _ => format!("{driver_name}-{label}"),
    }
}

#[cfg(test)]
#[cfg(feature = "dummy")]
mod tests {
    use super::*;

    fn dummy_only_config() -> Config {
        let mut config = Config::default();
        config.rapl.disabled = true;
        config.nvml.disabled = true;
        config.mic.disabled = true;
        config.odroid.disabled = true;
        config.sbpdu.disabled = true;
        config.labee.disabled = true;
        config.pmlib.disabled = true;
        config.dummy.disabled = false;
        config
    }

    #[test]
    fn init_enumerates_the_dummy_device() {
        let lib = Library::init(&dummy_only_config()).unwrap();
        assert_eq!(lib.device_count(), 1);
        assert_eq!(lib.device_by_index(0).unwrap().name, "dummy-0");
        assert_eq!(lib.support_status("dummy"), SupportStatus::Available);
        assert_eq!(lib.support_status("rapl"), SupportStatus::NotRuntime);
    }

    #[test]
    fn begin_end_round_trip_on_dummy() {
        let lib = Library::init(&dummy_only_config()).unwrap();
        lib.begin(0).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(150));
        let dataset = lib.end(0).unwrap();
        assert!(dataset.count() > 0);
        lib.shutdown().unwrap();
    }

    #[test]
    fn begin_all_unwinds_on_stack_full() {
        let lib = Library::init(&dummy_only_config()).unwrap();
        // Exhaust the one dummy device's stack directly, then begin_all
        // over the whole registry must fail and unwind cleanly.
        for _ in 0..crate::monitor::STACK_MAX {
            lib.begin(0).unwrap();
        }
        assert!(lib.begin_all().is_err());
        for _ in 0..crate::monitor::STACK_MAX {
            lib.end(0).unwrap();
        }
    }
}
