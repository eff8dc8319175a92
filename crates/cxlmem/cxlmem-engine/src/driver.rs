//! The epoch loop (§4.7): the top-level driver tying the control socket,
//! the clock, and [`SimulationContext`]'s monitor table together. One pass
//! of [`EpochLoop::run`] is: drain the socket, sleep one interval, then walk
//! every active monitor exactly once in slot-id order (§5: "within one
//! epoch, all monitors are sampled in slot-id order; attribution is
//! independent per monitor").

use std::time::Duration;

use cxlmem_monitor::MonitorStatus;

use crate::clock;
use crate::context::SimulationContext;
use crate::epoch::{compensate, epoch_deltas, off_epoch};
use crate::socket::ControlSocket;
use crate::EngineError;

pub struct EpochLoop {
    ctx: SimulationContext,
    socket: ControlSocket,
}

impl EpochLoop {
    pub fn new(ctx: SimulationContext, socket: ControlSocket) -> Self {
        Self { ctx, socket }
    }

    /// Runs until every active monitor has reached `Terminated` (§4.7 step
    /// 5). Propagates only the fatal error kinds from §7 — a malformed
    /// control payload (size mismatch) or monitor-capacity exhaustion;
    /// everything else (a dead thread, a failed perf read) is absorbed
    /// per-monitor and logged, per the epoch-averaged design (§1, §7).
    pub fn run(&mut self) -> Result<(), EngineError> {
        loop {
            self.drain_control_socket()?;

            let slept = clock::sleep_interruptible(self.ctx.interval);

            self.ctx.reap_exited_children();
            self.step_all_monitors(slept)?;

            if self.ctx.check_all_terminated() {
                return Ok(());
            }
        }
    }

    fn drain_control_socket(&mut self) -> Result<(), EngineError> {
        let mut fatal: Option<EngineError> = None;
        self.socket.drain(|msg| {
            if fatal.is_some() {
                return;
            }
            if let Err(e) = self.ctx.dispatch(msg) {
                fatal = Some(e);
            }
        })?;
        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn step_all_monitors(&mut self, slept: Duration) -> Result<(), EngineError> {
        let slots: Vec<usize> = self.ctx.monitors.active_slots(self.ctx.monitors.len()).collect();

        for slot in slots {
            let still_alive = match self.ctx.monitors.get(slot) {
                Some(m) => m.is_alive(),
                None => continue,
            };
            if !still_alive {
                if let Err(e) = self.ctx.monitors.get_mut(slot).unwrap().terminate() {
                    tracing::warn!(slot, error = %e, "error tearing down monitor for a thread that's gone");
                }
                continue;
            }

            let status = self.ctx.monitors.get(slot).unwrap().status;
            match status {
                MonitorStatus::On => self.step_on_monitor(slot)?,
                MonitorStatus::Off => self.step_off_monitor(slot, slept),
                MonitorStatus::Disabled | MonitorStatus::Terminated => {}
            }
        }
        Ok(())
    }

    /// §4.7 step 3, `MONITOR_ON`: read this epoch's counters, attribute a
    /// delay, compensate for this very computation's overhead, then either
    /// let the thread keep running (zero compensated delay) or stop it to
    /// start paying the debt down.
    fn step_on_monitor(&mut self, slot: usize) -> Result<(), EngineError> {
        let start = clock::now();

        let (deltas, num_of_region, own_regions) = {
            let monitor = self.ctx.monitors.get_mut(slot).unwrap();
            // §7 `CounterReadFailed`: warn and keep the previous value rather
            // than aborting the epoch — a failed perf read becomes a
            // zero-delta epoch for this monitor, not a fatal error.
            match monitor.read_perf() {
                Ok((cpus, cbos)) => {
                    monitor.after.cpus = cpus;
                    monitor.after.cbos = cbos;
                }
                Err(e) => {
                    tracing::warn!(tid = monitor.tid, error = %e, "counter read failed, keeping previous snapshot");
                    monitor.after.cpus = monitor.before.cpus;
                    monitor.after.cbos = monitor.before.cbos.clone();
                }
            }
            let deltas = epoch_deltas(&monitor.before, &monitor.after);
            (deltas, monitor.num_of_region, monitor.regions.clone())
        };

        let regions = if own_regions.is_empty() {
            self.ctx.topology.regions().to_vec()
        } else {
            own_regions
        };

        if regions.is_empty() {
            // No region configured anywhere (degenerate CLI invocation):
            // nothing to attribute this epoch, but still advance the
            // snapshot pair so next epoch's delta is against this baseline.
            self.ctx.monitors.get_mut(slot).unwrap().swap_snapshots();
            return Ok(());
        }

        let raw_delay_ns = cxlmem_attribution::attribute(
            &deltas,
            &self.ctx.params,
            &regions,
            num_of_region,
            self.ctx.policy.as_ref(),
        );
        let overhead = clock::now().saturating_sub(start);
        let compensated = compensate(raw_delay_ns, overhead);

        let monitor = self.ctx.monitors.get_mut(slot).unwrap();
        monitor.injected_delay += compensated;
        if compensated.is_zero() {
            monitor.run()?;
        } else {
            monitor.stop()?;
        }
        monitor.swap_snapshots();
        Ok(())
    }

    /// §4.6/§4.7 `MONITOR_OFF`: advance the debt accounting by this epoch's
    /// sleep and resume the thread once it's paid down (or forgiven via the
    /// squabble rule, §4.7 step 4).
    fn step_off_monitor(&mut self, slot: usize, slept: Duration) {
        let monitor = self.ctx.monitors.get_mut(slot).unwrap();
        let step = off_epoch(monitor.injected_delay, monitor.wasted_delay, monitor.squabble_delay, slept);
        monitor.injected_delay = step.injected_delay;
        monitor.wasted_delay = step.wasted_delay;
        monitor.squabble_delay = step.squabble_delay;
        if step.should_resume {
            if let Err(e) = monitor.run() {
                tracing::warn!(tid = monitor.tid, error = %e, "failed to resume thread");
            }
        }
    }
}
