//! Per-device background sampler thread and nested-interval bookkeeping.
//!
//! One [`Monitor`] exists per enumerated [`Device`](crate::driver::Device).
//! `start`/`stop` let `begin`/`end` pairs nest arbitrarily on top of a
//! single sampler thread and a single shared [`Run`]; only the outermost
//! `start` spawns the thread and only the outermost `stop` joins it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use arrayvec::ArrayVec;

use crate::clock::now_ns;
use crate::data::{DataProperties, Dataset, Run, RunHandle};
use crate::driver::Driver;
use crate::error::{Error, Result};

/// Maximum nesting depth of `begin`/`end` pairs on one device.
pub const STACK_MAX: usize = 10;

struct MonitorState {
    level: usize,
    run: Option<RunHandle>,
    /// Global point index the run was at when each currently-open level
    /// began; `stack[level - 1]` is the innermost entry.
    stack: ArrayVec<usize, STACK_MAX>,
}

/// Sampling and interval-nesting state for one device.
pub struct Monitor {
    device_name: String,
    state: Mutex<MonitorState>,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Monitor {
    pub fn new(device_name: String) -> Monitor {
        Monitor {
            device_name,
            state: Mutex::new(MonitorState { level: 0, run: None, stack: ArrayVec::new() }),
            running: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Current nesting depth; `0` means idle.
    pub fn level(&self) -> usize {
        self.state.lock().unwrap().level
    }

    /// Begins (or nests into) a measurement interval.
    ///
    /// `driver` and `device_index` identify the measurement primitive the
    /// sampler thread calls on each tick; `props` is the driver's
    /// [`DataProperties`] for the run, fixed at the outermost `start`.
    pub fn start(&self, driver: Arc<dyn Driver>, device_index: usize, props: DataProperties) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.level == STACK_MAX {
            return Err(Error::StackFull);
        }

        if state.level == 0 {
            let run = Run::new(self.device_name.clone(), props);
            state.run = Some(run.clone());
            state.stack.push(0);
            state.level = 1;

            self.running.store(true, Ordering::SeqCst);
            let running = Arc::clone(&self.running);
            let sampling_nanos = props.sampling_nanos;
            let name = self.device_name.clone();
            let handle = std::thread::Builder::new()
                .name(format!("eml-sampler-{name}"))
                .spawn(move || sampler_loop(&*driver, device_index, &run, &running, sampling_nanos, &name))
                .map_err(Error::Io)?;
            *self.thread.lock().unwrap() = Some(handle);
        } else {
            let start_index = state.run.as_ref().unwrap().total_points();
            state.stack.push(start_index);
            state.level += 1;
        }

        Ok(())
    }

    /// Ends the innermost open interval, returning its dataset view.
    pub fn stop(&self) -> Result<Dataset> {
        let (run, start_index, end_index, just_emptied) = {
            let mut state = self.state.lock().unwrap();
            if state.level == 0 {
                return Err(Error::NotStarted);
            }
            let run = state.run.clone().unwrap();
            let end_index = run.total_points();
            state.level -= 1;
            let start_index = state.stack.pop().unwrap();
            let just_emptied = state.level == 0;
            if just_emptied {
                state.run = None;
            }
            (run, start_index, end_index, just_emptied)
        };

        if just_emptied {
            self.running.store(false, Ordering::SeqCst);
            let handle = self.thread.lock().unwrap().take();
            if let Some(handle) = handle {
                // Panics inside the sampler only happen on a logic bug;
                // propagating one as a library error here would not be
                // actionable for the caller, so it's logged and swallowed.
                if handle.join().is_err() {
                    log::error!("sampler thread for '{}' panicked", self.device_name);
                }
            }
        }

        Ok(Dataset::new(run, start_index, end_index - start_index))
    }
}

/// Runs until `running` is cleared by the outermost `stop`. Appends one
/// sample per tick, sleeping to an absolute deadline on `CLOCK_MONOTONIC`
/// so sampling period doesn't drift with driver I/O latency.
fn sampler_loop(
    driver: &dyn Driver,
    device_index: usize,
    run: &Run,
    running: &AtomicBool,
    sampling_nanos: u64,
    device_name: &str,
) {
    let nfields = run.props().nfields();
    let mut sample = vec![0u64; nfields];
    let mut deadline = monotonic_now_ns();

    while running.load(Ordering::SeqCst) {
        match driver.measure(device_index, &mut sample) {
            Ok(()) => {
                run.append(&sample);
            }
            Err(e) => {
                log::warn!("{device_name}: measure failed, dropping this sample: {e}");
            }
        }

        deadline += sampling_nanos;
        sleep_until(deadline);
    }
}

#[cfg(target_os = "linux")]
fn monotonic_now_ns() -> u64 {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

#[cfg(not(target_os = "linux"))]
fn monotonic_now_ns() -> u64 {
    now_ns()
}

/// Sleeps until `deadline_ns` on `CLOCK_MONOTONIC` using `TIMER_ABSTIME`,
/// which doesn't accumulate drift across iterations the way repeatedly
/// computing a relative duration and calling a relative sleep would.
#[cfg(target_os = "linux")]
fn sleep_until(deadline_ns: u64) {
    let ts = libc::timespec {
        tv_sec: (deadline_ns / 1_000_000_000) as libc::time_t,
        tv_nsec: (deadline_ns % 1_000_000_000) as i64,
    };
    unsafe {
        libc::clock_nanosleep(libc::CLOCK_MONOTONIC, libc::TIMER_ABSTIME, &ts, std::ptr::null_mut());
    }
}

#[cfg(not(target_os = "linux"))]
fn sleep_until(deadline_ns: u64) {
    let now = now_ns();
    if deadline_ns > now {
        std::thread::sleep(std::time::Duration::from_nanos(deadline_ns - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::dummy::DummyDriver;
    use crate::driver::Driver;
    use crate::si::SiFactor;
    use std::time::Duration;

    fn dummy_arc(sampling_nanos: u64) -> (Arc<dyn Driver>, DataProperties) {
        let mut driver = DummyDriver::new(crate::config::DummyConfig {
            disabled: false,
            sampling_interval_nanos: sampling_nanos,
        });
        driver.init().unwrap();
        let props = driver.default_props();
        (Arc::new(driver), props)
    }

    #[test]
    fn single_interval_collects_roughly_the_configured_samples() {
        let monitor = Monitor::new("dummy-0".into());
        let (driver, props) = dummy_arc(20_000_000);
        monitor.start(driver, 0, props).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        let dataset = monitor.stop().unwrap();
        assert!(dataset.count() >= 5, "expected several samples, got {}", dataset.count());
    }

    #[test]
    fn nested_intervals_share_one_run_and_sum_counts() {
        let monitor = Monitor::new("dummy-0".into());
        let (driver, props) = dummy_arc(10_000_000);
        monitor.start(Arc::clone(&driver), 0, props).unwrap();

        let mut inner_total = 0;
        for _ in 0..3 {
            monitor.start(Arc::clone(&driver), 0, props).unwrap();
            std::thread::sleep(Duration::from_millis(50));
            let inner = monitor.stop().unwrap();
            inner_total += inner.count();
        }

        let outer = monitor.stop().unwrap();
        assert_eq!(outer.count(), inner_total);
    }

    #[test]
    fn stack_overflow_then_drain_recovers() {
        let monitor = Monitor::new("dummy-0".into());
        let (driver, props) = dummy_arc(50_000_000);
        for _ in 0..STACK_MAX {
            monitor.start(Arc::clone(&driver), 0, props).unwrap();
        }
        assert!(matches!(monitor.start(driver, 0, props), Err(Error::StackFull)));
        for _ in 0..STACK_MAX {
            monitor.stop().unwrap();
        }
        assert_eq!(monitor.level(), 0);
    }

    #[test]
    fn stop_without_start_is_not_started() {
        let monitor = Monitor::new("dummy-0".into());
        assert!(matches!(monitor.stop(), Err(Error::NotStarted)));
    }
}
