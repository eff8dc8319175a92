//! [`SimulationContext`]: the explicit, passed-by-reference replacement for
//! the source's global `CXLController`/`emul_nvm_lats[]` singletons (§9
//! design note). Owns the `MonitorSet`, the parsed `Topology`, the chosen
//! `Policy`, and the tunables every epoch's attribution call needs; knows
//! how to turn a decoded control message into a `MonitorSet` mutation.

use std::time::Duration;

use cxlmem_attribution::AttributionParams;
use cxlmem_config::SimConfig;
use cxlmem_model::Region;
use cxlmem_monitor::{Monitor, MonitorError, MonitorSet};
use cxlmem_perf::PerfSource;
use cxlmem_policy::{InterleavePolicy, Policy};
use cxlmem_protocol::{ControlMessage, OpCode};
use cxlmem_topology::Topology;

use crate::EngineError;

/// Upper bound on simultaneously-observed threads (§3's "fixed upper
/// bound"). Sized generously since the cost of an unused slot is a few
/// words, not a file descriptor — perf fds are only opened once a slot is
/// actually bound to a thread.
pub const DEFAULT_CAPACITY: usize = 256;

/// Builds a `Box<dyn PerfSource>` for a newly-announced thread. Kept as an
/// injected factory (rather than `SimulationContext` constructing
/// `LinuxPerfSource` directly) so tests can substitute a stub without
/// opening real perf fds — the same seam `cxlmem-monitor`'s own tests use.
pub type PerfSourceFactory = Box<dyn Fn(i32, i32, Vec<i32>) -> Box<dyn PerfSource>>;

pub struct SimulationContext {
    pub monitors: MonitorSet,
    pub topology: Topology,
    pub policy: Box<dyn Policy>,
    pub params: AttributionParams,
    pub interval: Duration,
    cpuset: Vec<i32>,
    next_cpu: usize,
    perf_factory: PerfSourceFactory,
}

impl SimulationContext {
    pub fn new(cfg: &SimConfig, perf_factory: PerfSourceFactory) -> Result<Self, EngineError> {
        let mut topology = Topology::new();
        for (i, rate) in cfg.rates.iter().enumerate() {
            topology.insert_end_point(Region::new(
                (i + 1) as u32,
                rate.read_latency_ns,
                rate.write_latency_ns,
                rate.read_bw_mbps,
                rate.write_bw_mbps,
                0,
            ));
        }
        topology.construct_topo(&cfg.topology)?;

        Ok(Self {
            monitors: MonitorSet::with_capacity(DEFAULT_CAPACITY),
            topology,
            policy: Box::new(InterleavePolicy),
            params: AttributionParams {
                weight: cfg.weight,
                frequency_mhz: cfg.frequency_mhz,
                dram_latency_ns: cfg.dram_latency_ns,
            },
            interval: Duration::from_millis(cfg.interval_ms),
            cpuset: cfg.cpuset.clone(),
            next_cpu: 0,
            perf_factory,
        })
    }

    /// Assigns the next monitor's core from `--cpuset`, round-robin;
    /// `-1` ("any cpu") when no cpuset was configured.
    fn pick_cpu(&mut self) -> i32 {
        if self.cpuset.is_empty() {
            return -1;
        }
        let cpu = self.cpuset[self.next_cpu % self.cpuset.len()];
        self.next_cpu += 1;
        cpu
    }

    /// Enables the monitor for the initially-launched target, bypassing the
    /// control socket (§3: "invoked either at startup for the initial
    /// target or in response to a THREAD_CREATE/PROCESS_CREATE"). Its
    /// region layout stays empty — attribution falls back to the uniform,
    /// CLI-configured topology until/unless the workload later announces
    /// its own regions over the socket.
    pub fn spawn_initial_monitor(&mut self, tgid: i32, tid: i32) -> Result<usize, EngineError> {
        let cpu = self.pick_cpu();
        let perf = (self.perf_factory)(tid, cpu, self.cpuset.clone());
        bind_affinity(tid, cpu);
        let mut monitor = Monitor::new(tgid, tid, cpu, true, perf);
        monitor.start_perf()?;
        Ok(self.monitors.enable(monitor)?)
    }

    /// Applies one decoded control datagram (§4.7 step 1) to the monitor
    /// table. `ProcessCreate`/`ThreadCreate` enable a new monitor
    /// (optionally arming its PEBS path); `ThreadExit` terminates the
    /// matching one if present. A thread that's already gone by the time
    /// its create message arrives, or that announces its own exit twice, is
    /// logged and skipped rather than treated as fatal — only
    /// `MonitorCapacityExhausted` propagates as an error (§7).
    pub fn dispatch(&mut self, msg: ControlMessage) -> Result<(), EngineError> {
        match msg.header.opcode {
            OpCode::ProcessCreate | OpCode::ThreadCreate => {
                let tgid = msg.header.tgid as i32;
                let tid = msg.header.tid as i32;
                let cpu = self.pick_cpu();
                let perf = (self.perf_factory)(tid, cpu, self.cpuset.clone());
                bind_affinity(tid, cpu);
                let is_process = matches!(msg.header.opcode, OpCode::ProcessCreate);
                let mut monitor = Monitor::new(tgid, tid, cpu, is_process, perf);
                if let Err(e) = monitor.start_perf() {
                    tracing::warn!(tgid, tid, error = %e, "failed to start perf counters, dropping announcement");
                    return Ok(());
                }
                if msg.arms_pebs() {
                    monitor.set_region_info(msg.regions.clone());
                }
                match self.monitors.enable(monitor) {
                    Ok(_) => Ok(()),
                    Err(MonitorError::ThreadAlreadyExited { tid }) => {
                        tracing::warn!(tid, "control message announced an already-exited thread");
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            OpCode::ThreadExit => {
                let tgid = msg.header.tgid as i32;
                let tid = msg.header.tid as i32;
                if let Some(slot) = self.monitors.find(tgid, tid) {
                    // A failure tearing down perf fds here is not the fatal
                    // "ChildExited" kind (§7) — the thread is gone either way.
                    if let Err(e) = self.monitors.get_mut(slot).unwrap().terminate() {
                        tracing::warn!(tgid, tid, error = %e, "error tearing down monitor on THREAD_EXIT");
                    }
                } else {
                    tracing::warn!(tgid, tid, "THREAD_EXIT for an unknown monitor");
                }
                Ok(())
            }
        }
    }

    /// Non-blocking `waitpid(-1, WNOHANG)` reap, once per epoch (§10.6):
    /// a thread can exit without ever sending `THREAD_EXIT`, and an
    /// unreaped child accumulates as a zombie. Any reaped pid that matches
    /// a still-active monitor is transitioned to `Terminated`.
    pub fn reap_exited_children(&mut self) {
        loop {
            let mut status: libc::c_int = 0;
            let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
            if pid <= 0 {
                return;
            }
            for slot in self.monitors.active_slots(self.monitors.len()).collect::<Vec<_>>() {
                if self.monitors.get(slot).map(|m| m.tid) == Some(pid) {
                    let _ = self.monitors.get_mut(slot).unwrap().terminate();
                    break;
                }
            }
        }
    }

    pub fn check_all_terminated(&self) -> bool {
        self.monitors.check_all_terminated(self.monitors.len())
    }
}

/// Best-effort `sched_setaffinity`: the per-core delta attribution (§4.4)
/// is meaningless if the target isn't actually scheduled on the core its
/// monitor reads counters from, but a failure here (e.g. insufficient
/// privilege, or `cpu` no longer valid) shouldn't abort the run — the
/// monitor still observes *a* core, just not necessarily a pinned one.
fn bind_affinity(tid: i32, cpu: i32) {
    if cpu < 0 {
        return;
    }
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(cpu as usize, &mut set);
        let rc = libc::sched_setaffinity(tid, std::mem::size_of::<libc::cpu_set_t>(), &set);
        if rc != 0 {
            tracing::warn!(
                tid,
                cpu,
                error = %std::io::Error::last_os_error(),
                "sched_setaffinity failed, continuing unpinned"
            );
        }
    }
}
