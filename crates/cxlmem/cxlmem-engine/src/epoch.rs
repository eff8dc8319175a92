//! Pure per-epoch arithmetic (§4.7 step 3-4): turning two snapshots into an
//! `EpochDeltas`, and the squabble bookkeeping that decides whether an
//! `Off` monitor has paid down enough debt to resume. Nothing here touches
//! a clock, a signal, or a socket — that's [`crate::driver`]'s job — so
//! these are exercised directly as unit tests against the worked scenarios
//! in the design doc.

use std::time::Duration;

use cxlmem_attribution::EpochDeltas;
use cxlmem_monitor::{EpochSnapshot, SQUABBLE_LIMIT};

/// Computes one epoch's counter deltas from the `before`/`after` snapshots
/// a `Monitor` holds. `before` is always the prior epoch's `after` — callers
/// swap the two via `Monitor::swap_snapshots` once this has run.
pub fn epoch_deltas(before: &EpochSnapshot, after: &EpochSnapshot) -> EpochDeltas {
    let cpu_delta = after.cpus.delta(&before.cpus);
    let delta_wb_total: u64 = after
        .cbos
        .iter()
        .zip(&before.cbos)
        .map(|(a, b)| a.delta(b).llc_wb)
        .sum();
    let pebs = match (&after.pebs, &before.pebs) {
        (Some(a), Some(b)) => Some(a.delta(b)),
        _ => None,
    };

    EpochDeltas {
        delta_hits: cpu_delta.cpu_llcl_hits,
        delta_miss: cpu_delta.cpu_llcl_miss,
        delta_l2stall: cpu_delta.cpu_l2stall_t,
        delta_reads_total: cpu_delta.all_dram_rds,
        delta_wb_total,
        pebs,
    }
}

/// Outcome of one `Off`-epoch's bookkeeping (§4.7 step 3 `MONITOR_OFF`
/// bullet plus step 4's squabble rule).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffStep {
    pub injected_delay: Duration,
    pub wasted_delay: Duration,
    pub squabble_delay: Duration,
    pub should_resume: bool,
}

/// Advances one `Off` monitor's debt accounting by one epoch's sleep.
///
/// `slept` is added to `wasted_delay` first; if that alone clears the debt
/// (`check_continue`, §4.6), the monitor resumes outright. Otherwise the
/// remaining sub-interval debt is folded into `squabble_delay` (§4.7 step
/// 4): a small remainder (< [`SQUABBLE_LIMIT`]) is forgiven and the thread
/// resumes anyway, rather than starving it over a residue too small to be
/// worth another full epoch of waiting; a remainder that would push
/// `squabble_delay` past the limit is instead rolled back into
/// `injected_delay` so the debt persists — that is what keeps the
/// accumulated squabble invariant (§8) from ever reaching the limit.
pub fn off_epoch(
    injected_delay: Duration,
    wasted_delay: Duration,
    squabble_delay: Duration,
    slept: Duration,
) -> OffStep {
    let wasted_delay = wasted_delay + slept;

    if wasted_delay >= injected_delay {
        return OffStep {
            injected_delay: Duration::ZERO,
            wasted_delay: Duration::ZERO,
            squabble_delay,
            should_resume: true,
        };
    }

    let remain = injected_delay - wasted_delay;
    let candidate = squabble_delay + remain;

    if candidate < SQUABBLE_LIMIT {
        OffStep {
            injected_delay: Duration::ZERO,
            wasted_delay: Duration::ZERO,
            squabble_delay: candidate,
            should_resume: true,
        }
    } else {
        OffStep {
            injected_delay: candidate,
            wasted_delay: Duration::ZERO,
            squabble_delay: Duration::ZERO,
            should_resume: false,
        }
    }
}

/// Applies §4.7 step 3's overhead compensation: the raw delay the
/// attribution engine computed, minus the wall-clock time this epoch's own
/// sampling-and-arithmetic pass took, clamped to zero so a slow epoch never
/// injects a negative delay.
pub fn compensate(raw_delay_ns: u64, overhead: Duration) -> Duration {
    let overhead_ns = overhead.as_nanos().min(raw_delay_ns as u128) as u64;
    Duration::from_nanos(raw_delay_ns - overhead_ns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cxlmem_model::{CBoSample, CounterSample};

    #[test]
    fn epoch_deltas_sums_cbo_writebacks_across_slices() {
        let before = EpochSnapshot {
            cpus: CounterSample::default(),
            cbos: vec![CBoSample { llc_wb: 10 }, CBoSample { llc_wb: 20 }],
            pebs: None,
        };
        let after = EpochSnapshot {
            cpus: CounterSample::default(),
            cbos: vec![CBoSample { llc_wb: 15 }, CBoSample { llc_wb: 35 }],
            pebs: None,
        };
        let deltas = epoch_deltas(&before, &after);
        assert_eq!(deltas.delta_wb_total, 20);
    }

    #[test]
    fn compensate_clamps_to_zero_when_overhead_exceeds_delay() {
        let d = compensate(100, Duration::from_nanos(500));
        assert_eq!(d, Duration::ZERO);
    }

    #[test]
    fn compensate_subtracts_overhead() {
        let d = compensate(1_000_000, Duration::from_nanos(100_000));
        assert_eq!(d, Duration::from_nanos(900_000));
    }

    /// Scenario 6: interval=20ms, injected=30ms, wasted=25ms → remain=5ms,
    /// below the 40ms squabble limit, so the epoch resumes with the
    /// remainder forgiven into `squabble_delay`.
    #[test]
    fn scenario_squabble_path_resumes_and_records_remainder() {
        let step = off_epoch(
            Duration::from_millis(30),
            Duration::from_millis(25),
            Duration::ZERO,
            Duration::ZERO,
        );
        assert!(step.should_resume);
        assert_eq!(step.squabble_delay, Duration::from_millis(5));
        assert_eq!(step.injected_delay, Duration::ZERO);
        assert_eq!(step.wasted_delay, Duration::ZERO);
    }

    #[test]
    fn off_epoch_resumes_once_wasted_plus_slept_covers_injected() {
        let step = off_epoch(
            Duration::from_millis(30),
            Duration::from_millis(10),
            Duration::ZERO,
            Duration::from_millis(20),
        );
        assert!(step.should_resume);
    }

    #[test]
    fn off_epoch_stays_off_and_accumulates_wasted_when_debt_remains() {
        let step = off_epoch(
            Duration::from_millis(100),
            Duration::from_millis(10),
            Duration::ZERO,
            Duration::from_millis(20),
        );
        assert!(!step.should_resume);
        assert_eq!(step.wasted_delay, Duration::from_millis(30));
    }

    #[test]
    fn squabble_bound_invariant_rolls_back_before_reaching_the_limit() {
        // Accumulated squabble sits at 38ms; a further 5ms remainder would
        // cross 40ms, so it rolls back into injected_delay instead.
        let step = off_epoch(
            Duration::from_millis(1043),
            Duration::from_millis(1000),
            Duration::from_millis(38),
            Duration::ZERO,
        );
        assert!(!step.should_resume);
        assert_eq!(step.squabble_delay, Duration::ZERO);
        assert_eq!(step.injected_delay, Duration::from_millis(43));
        assert!(step.injected_delay < SQUABBLE_LIMIT + Duration::from_millis(1000));
    }
}
