use std::sync::{Arc, Mutex};

use crate::data::block::{Block, TIMESTAMP_FIELD};
use crate::si::SiFactor;

/// Immutable per-driver measurement properties.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataProperties {
    pub time_factor: SiFactor,
    pub energy_factor: SiFactor,
    pub power_factor: SiFactor,
    /// Field index carrying cumulative-energy-delta readings, or 0 if this
    /// driver never writes an energy field.
    pub inst_energy_field: usize,
    /// Field index carrying instantaneous-power readings, or 0 if this
    /// driver never writes a power field.
    pub inst_power_field: usize,
    /// Target sampler period.
    pub sampling_nanos: u64,
}

impl DataProperties {
    pub fn has_energy(&self) -> bool {
        self.inst_energy_field != 0
    }

    pub fn has_power(&self) -> bool {
        self.inst_power_field != 0
    }

    /// Number of columns a block for this driver needs: the timestamp
    /// column plus whichever of the energy/power columns are declared.
    pub fn nfields(&self) -> usize {
        1 + self.inst_energy_field.max(self.inst_power_field)
    }
}

struct RunInner {
    blocks: Vec<Block>,
    total_points: usize,
}

/// The block-chained time-series shared by a device's monitor and every
/// dataset taken from it.
///
/// Reference counting is `Arc`'s own strong count: every nested `begin`
/// clones the handle onto the interval stack, every `end` hands that clone
/// to the returned [`Dataset`](crate::data::Dataset), and the run's storage
/// is freed the instant the last clone drops. No manual refcount field is
/// needed.
pub struct Run {
    device_name: String,
    props: DataProperties,
    inner: Mutex<RunInner>,
}

pub type RunHandle = Arc<Run>;

impl Run {
    /// A fresh run with one empty block already allocated.
    pub fn new(device_name: String, props: DataProperties) -> RunHandle {
        let first = Block::new(props.nfields());
        Arc::new(Run {
            device_name,
            props,
            inner: Mutex::new(RunInner { blocks: vec![first], total_points: 0 }),
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn props(&self) -> DataProperties {
        self.props
    }

    /// Writes one sample into the tail block, allocating a fresh block
    /// first if the current tail is full.
    ///
    /// Returns the (block index, point index within block) the sample was
    /// stored at, and the run's new total point count, under one lock
    /// acquisition — this is the pair the sampler publishes under its
    /// tail-block mutex.
    pub fn append(&self, sample: &[u64]) -> (usize, usize, usize) {
        let mut inner = self.inner.lock().unwrap();
        if inner.blocks.last().unwrap().is_full() {
            let nfields = self.props.nfields();
            inner.blocks.push(Block::new(nfields));
        }
        let block_idx = inner.blocks.len() - 1;
        let point_idx = inner.blocks[block_idx].len();
        inner.blocks[block_idx].push(sample);
        inner.total_points += 1;
        (block_idx, point_idx, inner.total_points)
    }

    /// Current `(tail_block_index, total_points)`, matching what a fresh
    /// nested `begin` or an outermost `stop` observes under the lock.
    pub fn snapshot(&self) -> (usize, usize) {
        let inner = self.inner.lock().unwrap();
        (inner.blocks.len() - 1, inner.total_points)
    }

    pub fn total_points(&self) -> usize {
        self.inner.lock().unwrap().total_points
    }

    /// Reads field `field` of the `index`-th point overall (not within a
    /// single block); used by the integrator.
    pub fn point_field(&self, field: usize, index: usize) -> u64 {
        let inner = self.inner.lock().unwrap();
        let (block_idx, offset) = locate(&inner.blocks, index);
        inner.blocks[block_idx].field(field, offset)
    }

    pub fn timestamp(&self, index: usize) -> u64 {
        self.point_field(TIMESTAMP_FIELD, index)
    }
}

/// Translates a global point index into `(block index, offset within
/// block)`, given that every block but the last is exactly `BLOCK_SIZE`
/// long.
fn locate(blocks: &[Block], index: usize) -> (usize, usize) {
    let mut remaining = index;
    for (i, block) in blocks.iter().enumerate() {
        if remaining < block.len() {
            return (i, remaining);
        }
        remaining -= block.len();
    }
    panic!("point index {index} out of range");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_props() -> DataProperties {
        DataProperties {
            time_factor: SiFactor::MILLI,
            energy_factor: SiFactor::MILLI,
            power_factor: SiFactor::NONE,
            inst_energy_field: 0,
            inst_power_field: 1,
            sampling_nanos: 100_000_000,
        }
    }

    #[test]
    fn new_run_has_one_empty_block() {
        let run = Run::new("dummy-0".into(), dummy_props());
        assert_eq!(run.total_points(), 0);
    }

    #[test]
    fn append_rotates_blocks_when_full() {
        let run = Run::new("dummy-0".into(), dummy_props());
        for i in 0..crate::data::block::BLOCK_SIZE + 5 {
            run.append(&[i as u64, i as u64]);
        }
        assert_eq!(run.total_points(), crate::data::block::BLOCK_SIZE + 5);
        assert_eq!(run.timestamp(0), 0);
        assert_eq!(run.timestamp(crate::data::block::BLOCK_SIZE), crate::data::block::BLOCK_SIZE as u64);
    }

    #[test]
    fn drops_storage_when_last_handle_drops() {
        let run = Run::new("dummy-0".into(), dummy_props());
        let weak = Arc::downgrade(&run);
        drop(run);
        assert!(weak.upgrade().is_none());
    }
}
