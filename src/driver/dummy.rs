//! Dummy driver: returns its own timestamp as a power reading.
//! Exists for testing and for calibrating the sampler thread without any
//! hardware dependency.

use crate::clock::now_ns;
use crate::config::DummyConfig;
use crate::data::DataProperties;
use crate::driver::Driver;
use crate::error::Result;
use crate::si::SiFactor;

pub struct DummyDriver {
    config: DummyConfig,
    initialized: bool,
}

impl DummyDriver {
    pub fn new(config: DummyConfig) -> Self {
        DummyDriver { config, initialized: false }
    }

    pub fn sampling_interval_nanos(&self) -> u64 {
        self.config.sampling_interval_nanos
    }
}

impl Driver for DummyDriver {
    fn name(&self) -> &'static str {
        "dummy"
    }

    fn init(&mut self) -> Result<()> {
        self.initialized = true;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.initialized = false;
        Ok(())
    }

    fn device_count(&self) -> usize {
        if self.initialized { 1 } else { 0 }
    }

    fn measure(&self, device_index: usize, out: &mut [u64]) -> Result<()> {
        debug_assert_eq!(device_index, 0);
        let ts = now_ns() / 1_000_000;
        out[0] = ts;
        out[1] = ts;
        Ok(())
    }

    fn default_props(&self) -> DataProperties {
        DataProperties {
            time_factor: SiFactor::MILLI,
            energy_factor: SiFactor::MILLI,
            power_factor: SiFactor::NONE,
            inst_energy_field: 0,
            inst_power_field: 1,
            sampling_nanos: self.config.sampling_interval_nanos,
        }
    }

    fn failed_reason(&self) -> Option<&str> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_enumerates_one_device() {
        let mut driver = DummyDriver::new(DummyConfig::default());
        assert_eq!(driver.device_count(), 0);
        driver.init().unwrap();
        assert_eq!(driver.device_count(), 1);
    }

    #[test]
    fn measure_mirrors_timestamp_as_power() {
        let mut driver = DummyDriver::new(DummyConfig::default());
        driver.init().unwrap();
        let mut out = [0u64; 2];
        driver.measure(0, &mut out).unwrap();
        assert_eq!(out[0], out[1]);
    }
}
