//! The driver abstraction and its eight implementations.

#[cfg(feature = "dummy")]
pub mod dummy;
#[cfg(feature = "labee")]
pub mod labee;
#[cfg(feature = "mic")]
pub mod mic;
#[cfg(feature = "nvml")]
pub mod nvml;
#[cfg(feature = "odroid")]
pub mod odroid;
#[cfg(feature = "pmlib")]
pub mod pmlib;
#[cfg(feature = "rapl")]
pub mod rapl;
#[cfg(feature = "sbpdu")]
pub mod sbpdu;

use crate::data::DataProperties;
use crate::error::Result;

/// Runtime/compile-time support status for one driver family, exposed
/// through the registry's device enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SupportStatus {
    /// The driver's Cargo feature was not compiled in.
    NotCompiled,
    /// The feature is present but `init` found no usable hardware.
    NotRuntime,
    /// At least one device is available.
    Available,
}

/// The polymorphic measurement capability every device family implements.
/// Per-implementation state (sockets, file descriptors, loaded vendor
/// libraries) is owned by the concrete type; the registry holds driver
/// instances as `Box<dyn Driver>`.
pub trait Driver: Send + Sync {
    /// Stable short name used to build device names (`"<name>-<index>"`).
    fn name(&self) -> &'static str;

    /// Opens resources and enumerates devices. Must be idempotent-safe to
    /// call at most once per instance; a second call is a programming
    /// error the registry never makes.
    fn init(&mut self) -> Result<()>;

    /// Idempotent tear-down; reverse of `init`.
    fn shutdown(&mut self) -> Result<()>;

    /// Number of devices this driver enumerated at `init`.
    fn device_count(&self) -> usize;

    /// `measure(device_index, out)`: writes exactly the fields declared by
    /// [`default_props`](Driver::default_props) into `out`. Field 0 is
    /// always a fresh timestamp.
    fn measure(&self, device_index: usize, out: &mut [u64]) -> Result<()>;

    /// The properties every device of this driver shares.
    fn default_props(&self) -> DataProperties;

    /// The reason the driver is unavailable, if `init` failed or found no
    /// hardware. `None` once at least one device is available.
    fn failed_reason(&self) -> Option<&str>;

    /// The device-name suffix appended after this driver's short name (and,
    /// for single-device drivers, the preceding `-`). Defaults to the plain
    /// index; the multi-outlet network drivers (`sb_pdu`, `pmlib`) override
    /// this to encode their per-endpoint outlet structure instead.
    fn device_label(&self, index_in_driver: usize) -> String {
        index_in_driver.to_string()
    }
}

/// One enumerated measurement endpoint.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Device {
    pub name: String,
    pub driver_index: usize,
    pub index_in_driver: usize,
}
