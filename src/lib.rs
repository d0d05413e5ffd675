//! Energy and power measurement across heterogeneous hardware and network
//! sources.
//!
//! A [`Library`](registry::Library) enumerates whichever of the eight
//! device families (CPU package energy via RAPL, GPU and accelerator power
//! via vendor libraries, on-board current sensors, network PDUs, and a
//! REST-backed cluster power API) are compiled in and available at
//! runtime, then lets a caller bracket arbitrary code with `begin`/`end`
//! pairs per device to collect a [`Dataset`](data::Dataset) of timestamped
//! energy and power samples.
//!
//! ## Example
//!
//! ```no_run
//! use eml::config::Config;
//! use eml::registry::Library;
//!
//! let config = Config::default();
//! let library = Library::init(&config).unwrap();
//!
//! library.begin(0).unwrap();
//! std::thread::sleep(std::time::Duration::from_secs(1));
//! let dataset = library.end(0).unwrap();
//!
//! println!("{:.3} J over {:.3} s", dataset.get_consumed(), dataset.get_elapsed());
//! library.shutdown().unwrap();
//! ```
//!
//! ## Driver availability
//!
//! Each device family is gated behind its own Cargo feature
//! (`rapl`, `nvml`, `mic`, `odroid`, `sbpdu`, `labee`, `pmlib`, `dummy`),
//! all enabled by default. A family absent from the build reports
//! [`SupportStatus::NotCompiled`](driver::SupportStatus::NotCompiled)
//! through [`Library::support_status`](registry::Library::support_status);
//! one present but unable to find live hardware at `init` reports
//! [`SupportStatus::NotRuntime`](driver::SupportStatus::NotRuntime).

pub mod clock;
pub mod config;
pub mod data;
pub mod driver;
pub mod error;
pub mod monitor;
pub mod registry;
pub mod si;

pub use data::Dataset;
pub use error::{Error, Result};
pub use registry::Library;
