//! Per-thread monitor state (§3, §4.5) and the fixed-capacity table of them
//! (§4.6). A `Monitor` owns exactly one `PerfSource` and one signal-control
//! relationship with an observed thread; the epoch loop drives both through
//! this crate rather than touching `libc::kill` or a perf fd directly.

use std::time::Duration;

use cxlmem_model::{CBoSample, CounterSample, PebsSample, Region};
use cxlmem_perf::PerfSource;

/// §8's squabble bound: accumulated `squabble_delay` must never reach this.
pub const SQUABBLE_LIMIT: Duration = Duration::from_millis(40);

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("monitor table is full (capacity exhausted)")]
    CapacityExhausted,

    #[error("thread {tid} has already exited")]
    ThreadAlreadyExited { tid: i32 },

    #[error("failed to signal tid {tid} with {signal}")]
    Signal {
        tid: i32,
        signal: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Perf(#[from] cxlmem_perf::PerfError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStatus {
    Disabled,
    On,
    Off,
    Terminated,
}

/// One epoch's counter snapshot for one monitor: the per-core sample, the
/// per-CBo samples, and (once PEBS is armed) the PEBS sample.
#[derive(Debug, Clone, Default)]
pub struct EpochSnapshot {
    pub cpus: CounterSample,
    pub cbos: Vec<CBoSample>,
    pub pebs: Option<PebsSample>,
}

/// A monitored thread (or, for `is_process`, the process's main thread)
/// together with its suspend/resume debt accounting.
pub struct Monitor {
    pub tgid: i32,
    pub tid: i32,
    pub cpu_core: i32,
    pub is_process: bool,
    pub status: MonitorStatus,
    pub before: EpochSnapshot,
    pub after: EpochSnapshot,
    pub injected_delay: Duration,
    pub wasted_delay: Duration,
    pub squabble_delay: Duration,
    pub total_delay_secs: f64,
    pub num_of_region: usize,
    pub regions: Vec<Region>,
    perf: Box<dyn PerfSource>,
}

impl Monitor {
    pub fn new(tgid: i32, tid: i32, cpu_core: i32, is_process: bool, perf: Box<dyn PerfSource>) -> Self {
        Self {
            tgid,
            tid,
            cpu_core,
            is_process,
            status: MonitorStatus::Off,
            before: EpochSnapshot::default(),
            after: EpochSnapshot::default(),
            injected_delay: Duration::ZERO,
            wasted_delay: Duration::ZERO,
            squabble_delay: Duration::ZERO,
            total_delay_secs: 0.0,
            num_of_region: 0,
            regions: Vec::new(),
            perf,
        }
    }

    /// Starts the underlying `PerfSource`; called once, right after
    /// construction, before the first epoch's baseline read.
    pub fn start_perf(&mut self) -> Result<(), MonitorError> {
        self.perf.start()?;
        Ok(())
    }

    pub fn read_perf(&mut self) -> Result<(CounterSample, Vec<CBoSample>), MonitorError> {
        Ok(self.perf.read()?)
    }

    /// §4.5's `set_region_info`: arms the PEBS path from here on.
    pub fn set_region_info(&mut self, regions: Vec<Region>) {
        self.num_of_region = regions.len();
        self.regions = regions;
    }

    /// Swaps `before`/`after` buffers by ownership exchange — §9 notes the
    /// source did this via raw pointer swap; here it's just `mem::swap`.
    pub fn swap_snapshots(&mut self) {
        std::mem::swap(&mut self.before, &mut self.after);
    }

    pub fn stop(&mut self) -> Result<(), MonitorError> {
        signal(self.tid, libc::SIGSTOP, "SIGSTOP")?;
        self.status = MonitorStatus::Off;
        Ok(())
    }

    pub fn run(&mut self) -> Result<(), MonitorError> {
        signal(self.tid, libc::SIGCONT, "SIGCONT")?;
        self.status = MonitorStatus::On;
        Ok(())
    }

    /// Always reaches `Terminated`, even when tearing down the perf fds
    /// fails — the thread is gone (or was never signallable) either way,
    /// and a stuck non-`Terminated` slot would block `check_all_terminated`
    /// forever over what's ultimately just a resource-cleanup error.
    pub fn terminate(&mut self) -> Result<(), MonitorError> {
        let result = self.perf.stop();
        self.status = MonitorStatus::Terminated;
        result.map_err(MonitorError::from)
    }

    /// `kill(tid, 0)` — the standard liveness probe: no signal delivered,
    /// only existence/permission checked.
    pub fn is_alive(&self) -> bool {
        unsafe { libc::kill(self.tid, 0) == 0 }
    }

    pub fn clear_delay_accumulators(&mut self) {
        self.injected_delay = Duration::ZERO;
        self.wasted_delay = Duration::ZERO;
    }
}

fn signal(tid: i32, sig: i32, name: &'static str) -> Result<(), MonitorError> {
    let rc = unsafe { libc::kill(tid, sig) };
    if rc == 0 {
        Ok(())
    } else {
        Err(MonitorError::Signal {
            tid,
            signal: name,
            source: std::io::Error::last_os_error(),
        })
    }
}

/// Fixed-capacity table of monitors (§3's `MonitorSet`). Slots are dense:
/// `Disabled`-equivalent slots are simply absent (`None`), so `enable`
/// reuses the first `None` it finds rather than scanning a status field.
pub struct MonitorSet {
    slots: Vec<Option<Monitor>>,
}

impl MonitorSet {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Finds a free slot for `(tgid, tid)` and installs `monitor`. Returns
    /// the slot index, or `CapacityExhausted` if every slot is occupied, or
    /// `ThreadAlreadyExited` if the thread is no longer signallable.
    pub fn enable(&mut self, monitor: Monitor) -> Result<usize, MonitorError> {
        if !monitor.is_alive() {
            return Err(MonitorError::ThreadAlreadyExited { tid: monitor.tid });
        }
        let slot = self.slots.iter().position(|s| s.is_none()).ok_or(MonitorError::CapacityExhausted)?;
        self.slots[slot] = Some(monitor);
        Ok(slot)
    }

    pub fn get(&self, slot: usize) -> Option<&Monitor> {
        self.slots.get(slot).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Monitor> {
        self.slots.get_mut(slot).and_then(|s| s.as_mut())
    }

    /// Finds the slot bound to `(tgid, tid)`, if any — used to dispatch a
    /// `THREAD_EXIT` control message to the right monitor.
    pub fn find(&self, tgid: i32, tid: i32) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| matches!(s, Some(m) if m.tgid == tgid && m.tid == tid))
    }

    pub fn active_slots(&self, k: usize) -> impl Iterator<Item = usize> + '_ {
        (0..k.min(self.slots.len())).filter(move |&i| self.slots[i].is_some())
    }

    pub fn stop_all(&mut self, k: usize) -> Result<(), MonitorError> {
        for i in self.active_slots(k).collect::<Vec<_>>() {
            if let Some(m) = self.slots[i].as_mut() {
                if m.status != MonitorStatus::Terminated {
                    m.stop()?;
                }
            }
        }
        Ok(())
    }

    pub fn run_all(&mut self, k: usize) -> Result<(), MonitorError> {
        for i in self.active_slots(k).collect::<Vec<_>>() {
            if let Some(m) = self.slots[i].as_mut() {
                if m.status != MonitorStatus::Terminated {
                    m.run()?;
                }
            }
        }
        Ok(())
    }

    /// §4.6's paid-down-delay predicate: has the thread slept (this epoch's
    /// `slept` plus everything already `wasted`) at least as long as its
    /// outstanding `injected_delay` debt?
    pub fn check_continue(&self, slot: usize, slept: Duration) -> bool {
        match self.get(slot) {
            Some(m) => m.wasted_delay + slept >= m.injected_delay,
            None => false,
        }
    }

    pub fn check_all_terminated(&self, k: usize) -> bool {
        self.active_slots(k).all(|i| self.slots[i].as_ref().unwrap().status == MonitorStatus::Terminated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cxlmem_perf::PerfError;

    struct StubPerf {
        started: bool,
        stopped: bool,
    }

    impl PerfSource for StubPerf {
        fn start(&mut self) -> Result<(), PerfError> {
            self.started = true;
            Ok(())
        }
        fn read(&mut self) -> Result<(CounterSample, Vec<CBoSample>), PerfError> {
            Ok((CounterSample::default(), vec![]))
        }
        fn stop(&mut self) -> Result<(), PerfError> {
            self.stopped = true;
            Ok(())
        }
    }

    fn stub() -> Box<dyn PerfSource> {
        Box::new(StubPerf {
            started: false,
            stopped: false,
        })
    }

    struct FailingStopPerf;
    impl PerfSource for FailingStopPerf {
        fn start(&mut self) -> Result<(), PerfError> {
            Ok(())
        }
        fn read(&mut self) -> Result<(CounterSample, Vec<CBoSample>), PerfError> {
            Ok((CounterSample::default(), vec![]))
        }
        fn stop(&mut self) -> Result<(), PerfError> {
            Err(PerfError::Read {
                slot: "test",
                source: std::io::Error::other("boom"),
            })
        }
    }

    #[test]
    fn terminate_reaches_terminated_even_when_perf_teardown_fails() {
        let mut monitor = Monitor::new(1, 1, 0, true, Box::new(FailingStopPerf));
        assert!(monitor.terminate().is_err());
        assert_eq!(monitor.status, MonitorStatus::Terminated);
    }

    #[test]
    fn enable_rejects_a_dead_pid() {
        let mut set = MonitorSet::with_capacity(2);
        // pid 999999 is exceedingly unlikely to exist in any test sandbox.
        let monitor = Monitor::new(999999, 999999, 0, true, stub());
        assert!(matches!(
            set.enable(monitor),
            Err(MonitorError::ThreadAlreadyExited { tid: 999999 })
        ));
    }

    #[test]
    fn enable_fills_slots_then_reports_capacity_exhausted() {
        let mut set = MonitorSet::with_capacity(1);
        let self_pid = std::process::id() as i32;
        let m1 = Monitor::new(self_pid, self_pid, 0, true, stub());
        assert_eq!(set.enable(m1).unwrap(), 0);

        let m2 = Monitor::new(self_pid, self_pid, 0, true, stub());
        assert!(matches!(set.enable(m2), Err(MonitorError::CapacityExhausted)));
    }

    #[test]
    fn check_continue_holds_once_wasted_plus_slept_covers_injected() {
        let mut set = MonitorSet::with_capacity(1);
        let self_pid = std::process::id() as i32;
        let monitor = Monitor::new(self_pid, self_pid, 0, true, stub());
        let slot = set.enable(monitor).unwrap();
        set.get_mut(slot).unwrap().injected_delay = Duration::from_millis(30);
        set.get_mut(slot).unwrap().wasted_delay = Duration::from_millis(25);

        assert!(!set.check_continue(slot, Duration::from_millis(4)));
        assert!(set.check_continue(slot, Duration::from_millis(5)));
    }

    #[test]
    fn check_all_terminated_is_false_until_every_active_slot_is() {
        let mut set = MonitorSet::with_capacity(2);
        let self_pid = std::process::id() as i32;
        let slot = set.enable(Monitor::new(self_pid, self_pid, 0, true, stub())).unwrap();
        assert!(!set.check_all_terminated(2));
        set.get_mut(slot).unwrap().terminate().unwrap();
        assert!(set.check_all_terminated(2));
    }

    #[test]
    fn set_region_info_arms_region_layout() {
        let mut monitor = Monitor::new(1, 1, 0, true, stub());
        assert_eq!(monitor.num_of_region, 0);
        monitor.set_region_info(vec![Region::new(0, 300.0, 400.0, 0.0, 0.0, 0), Region::new(1, 600.0, 800.0, 0.0, 0.0, 0)]);
        assert_eq!(monitor.num_of_region, 2);
    }

    #[test]
    fn swap_snapshots_exchanges_before_and_after() {
        let mut monitor = Monitor::new(1, 1, 0, true, stub());
        monitor.after.cpus.cpu_llcl_miss = 42;
        monitor.swap_snapshots();
        assert_eq!(monitor.before.cpus.cpu_llcl_miss, 42);
        assert_eq!(monitor.after.cpus.cpu_llcl_miss, 0);
    }
}
