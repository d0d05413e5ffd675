//! Block-chained time-series storage and dataset views.

pub mod block;
mod dataset;
mod run;

pub use block::{Block, BLOCK_SIZE};
pub use dataset::Dataset;
pub use run::{DataProperties, Run, RunHandle};
