use crate::data::block::TIMESTAMP_FIELD;
use crate::data::run::{DataProperties, RunHandle};

/// A sub-range view over a shared [`Run`](super::Run), as returned by
/// `end`.
///
/// Holds one `Arc` clone of the run — dropping (or explicitly
/// [`release`](Dataset::release)ing) a `Dataset` releases that clone.
pub struct Dataset {
    run: RunHandle,
    start_index: usize,
    count: usize,
    elapsed: u64,
    consumed: u64,
}

impl Dataset {
    /// Builds a dataset over `[start_index, start_index + count)` of
    /// `run`, computing its totals immediately.
    pub(crate) fn new(run: RunHandle, start_index: usize, count: usize) -> Dataset {
        let (elapsed, consumed) = integrate(&run, start_index, count);
        Dataset { run, start_index, count, elapsed, consumed }
    }

    pub fn device_name(&self) -> &str {
        self.run.device_name()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// The run's unit factors and field layout, for a sink that wants to
    /// emit a header describing how to interpret [`dump_records`](Self::dump_records)'s
    /// raw integer tuples.
    pub fn properties(&self) -> DataProperties {
        self.run.props()
    }

    /// Elapsed time in seconds.
    pub fn get_elapsed(&self) -> f64 {
        self.run.props().time_factor.scale(self.elapsed)
    }

    /// Energy consumed in joules.
    pub fn get_consumed(&self) -> f64 {
        self.run.props().energy_factor.scale(self.consumed)
    }

    /// Yields the time-series as `(timestamp, energy, power)` tuples in
    /// insertion order, each component `None` if the driver doesn't expose
    /// that field. The dataset does no text formatting; `sink` is handed
    /// one tuple at a time in order.
    pub fn dump_records<F: FnMut(u64, Option<u64>, Option<u64>)>(&self, mut sink: F) {
        let props = self.run.props();
        for i in self.start_index..self.start_index + self.count {
            let ts = self.run.point_field(TIMESTAMP_FIELD, i);
            let energy = props.has_energy().then(|| self.run.point_field(props.inst_energy_field, i));
            let power = props.has_power().then(|| self.run.point_field(props.inst_power_field, i));
            sink(ts, energy, power);
        }
    }

    /// Explicit early release. Equivalent to dropping the dataset; provided
    /// for callers that want the release to be visible at the call site
    /// rather than implicit at scope exit.
    pub fn release(self) {
        drop(self)
    }
}

/// Computes `(elapsed, consumed)` over `[start_index, start_index + count)`
/// of `run`.
fn integrate(run: &RunHandle, start_index: usize, count: usize) -> (u64, u64) {
    if count == 0 {
        return (0, 0);
    }
    let last_index = start_index + count - 1;
    let elapsed = run.timestamp(last_index) - run.timestamp(start_index);

    let props = run.props();
    let consumed = if props.has_energy() {
        // The first sample's delta spans time before this interval began;
        // only [start+1, end) is attributable to it.
        (start_index + 1..=last_index)
            .map(|i| run.point_field(props.inst_energy_field, i))
            .sum()
    } else if props.has_power() {
        let mut total: u64 = 0;
        for i in start_index + 1..=last_index {
            let dt = run.timestamp(i) - run.timestamp(i - 1);
            let power = run.point_field(props.inst_power_field, i - 1);
            let scaled = if props.time_factor.0 >= 0 {
                power * dt * props.time_factor.0 as u64
            } else {
                power * dt / (-props.time_factor.0) as u64
            };
            total += scaled;
        }
        total
    } else {
        0
    };

    (elapsed, consumed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::run::{DataProperties, Run};
    use crate::si::SiFactor;

    #[test]
    fn power_only_riemann_sum_recovers_constant_power() {
        let props = DataProperties {
            time_factor: SiFactor::MILLI,
            energy_factor: SiFactor::NONE,
            power_factor: SiFactor::NONE,
            inst_energy_field: 0,
            inst_power_field: 1,
            sampling_nanos: 1_000_000,
        };
        let run = Run::new("dummy-0".into(), props);
        // Timestamps are 1000ms (1s) apart, constant power P=10.
        for i in 0..11u64 {
            run.append(&[i * 1000, 10]);
        }
        let dataset = Dataset::new(run, 0, 11);
        assert_eq!(dataset.get_elapsed(), 10.0);
        assert_eq!(dataset.get_consumed(), 100.0);
        assert_eq!(dataset.get_consumed() / dataset.get_elapsed(), 10.0);
    }

    #[test]
    fn energy_counter_skips_first_sample_delta() {
        let props = DataProperties {
            time_factor: SiFactor::MILLI,
            energy_factor: SiFactor::NONE,
            power_factor: SiFactor::NONE,
            inst_energy_field: 1,
            inst_power_field: 0,
            sampling_nanos: 1_000_000,
        };
        let run = Run::new("rapl-0".into(), props);
        // Counter deltas: [0, 3, 2] — the first sample has no predecessor.
        run.append(&[0, 0]);
        run.append(&[1, 3]);
        run.append(&[2, 2]);
        let dataset = Dataset::new(run, 0, 3);
        assert_eq!(dataset.get_consumed(), 5.0);
    }
}
