//! The attribution engine (§4.4): a pure function from one epoch's counter
//! deltas to an emulated delay in nanoseconds. Nothing in this crate reads
//! a clock, a perf fd, or a socket — every input arrives as a plain value,
//! which is what makes the worked examples in the design doc reproducible
//! as unit tests.

#![forbid(unsafe_code)]

use cxlmem_model::{PebsSample, Region};
use cxlmem_policy::Policy;

/// One epoch's raw counter deltas, already computed via
/// `CounterSample::delta`/`CBoSample::delta`/`PebsSample::delta`.
#[derive(Debug, Clone, Default)]
pub struct EpochDeltas {
    /// Δhits: LLC hits on this monitor's core.
    pub delta_hits: u64,
    /// Δmiss: LLC misses on this monitor's core (used unless the PEBS path
    /// is active).
    pub delta_miss: u64,
    /// Δl2stall: cycles stalled behind L2 on this monitor's core.
    pub delta_l2stall: u64,
    /// Δreads_total: DRAM reads summed over all physical cores + prefetcher.
    pub delta_reads_total: u64,
    /// Δwb_total: LLC writebacks summed over all CBos.
    pub delta_wb_total: u64,
    /// PEBS deltas, present only once the monitor's `num_of_region >= 2`.
    pub pebs: Option<PebsSample>,
}

/// Tunables that are constant across an entire run (§6 CLI flags).
#[derive(Debug, Clone, Copy)]
pub struct AttributionParams {
    /// Empirical constant multiplying LLC misses in the stall model.
    pub weight: f64,
    pub frequency_mhz: f64,
    /// The current platform's real DRAM latency, subtracted from each
    /// region's emulated latency to get the *additional* delay to inject.
    pub dram_latency_ns: f64,
}

impl Default for AttributionParams {
    fn default() -> Self {
        Self {
            weight: 4.1,
            frequency_mhz: 4000.0,
            dram_latency_ns: 85.0,
        }
    }
}

/// Decomposes one epoch's target LLC misses into writeback-bearing vs
/// read-only counts (§4.4 step 1). Falls back to "all writeback" whenever
/// the counters are implausible (`target_llcmiss > delta_reads_total`) or
/// `delta_reads_total` is zero, logging a warning rather than aborting the
/// epoch — the emulator is epoch-averaged and expected to absorb a single
/// noisy sample (§7, `CounterImplausible`).
fn decompose_miss(delta_wb_total: u64, target_llcmiss: u64, delta_reads_total: u64) -> (u64, u64) {
    let plausible = delta_wb_total <= delta_reads_total
        && target_llcmiss <= delta_reads_total
        && delta_reads_total > 0;

    let llcmiss_wb = if plausible {
        (delta_wb_total as f64 * (target_llcmiss as f64 / delta_reads_total as f64)).round() as u64
    } else {
        tracing::warn!(
            delta_wb_total,
            target_llcmiss,
            delta_reads_total,
            "implausible counters, treating all misses as writeback"
        );
        target_llcmiss
    };
    let llcmiss_ro = target_llcmiss.saturating_sub(llcmiss_wb);
    (llcmiss_wb, llcmiss_ro)
}

/// Runs the full attribution pipeline for one monitor's epoch and returns
/// the emulated delay in nanoseconds, clamped to be non-negative.
///
/// `regions` is the monitor's region layout: a single-element slice for the
/// uniform case (`num_of_region < 2`), or the full hybrid layout otherwise.
/// `regions[0]`'s read latency is used as the fixed baseline `L` that
/// converts stall time into a memory-access count — see DESIGN.md for why
/// a single scalar (rather than a per-region latency) is used here, which
/// resolves the open question in the design doc about a scalar/vector
/// mismatch in the source's final delay formula.
pub fn attribute(
    deltas: &EpochDeltas,
    params: &AttributionParams,
    regions: &[Region],
    num_of_region: usize,
    policy: &dyn Policy,
) -> u64 {
    assert!(!regions.is_empty(), "attribution requires at least one region");

    let target_llcmiss = if num_of_region >= 2 {
        deltas.pebs.as_ref().map(|p| p.llcmiss).unwrap_or(0)
    } else {
        deltas.delta_miss
    };

    let (llcmiss_wb, llcmiss_ro) =
        decompose_miss(deltas.delta_wb_total, target_llcmiss, deltas.delta_reads_total);
    debug_assert_eq!(llcmiss_wb + llcmiss_ro, target_llcmiss);

    let l2_stall_units = deltas.delta_l2stall as f64 / params.frequency_mhz;
    let denom = deltas.delta_hits as f64 + params.weight * target_llcmiss as f64;
    let (mastall_wb, mastall_ro) = if denom == 0.0 {
        (0.0, 0.0)
    } else {
        (
            l2_stall_units * (params.weight * llcmiss_wb as f64) / denom,
            l2_stall_units * (params.weight * llcmiss_ro as f64) / denom,
        )
    };

    let baseline_latency_ns = regions[0].read_latency_ns;
    let (ma_wb, ma_ro) = if baseline_latency_ns == 0.0 {
        (0.0, 0.0)
    } else {
        (mastall_wb / baseline_latency_ns, mastall_ro / baseline_latency_ns)
    };

    let region_delay = |r: &Region| -> f64 {
        ma_ro * (r.read_latency_ns - params.dram_latency_ns)
            + ma_wb * (r.write_latency_ns - params.dram_latency_ns)
    };

    let delay = if num_of_region < 2 {
        region_delay(&regions[0])
    } else {
        policy
            .distribute(num_of_region, deltas.pebs.as_ref())
            .iter()
            .map(|(id, w)| w * region_delay(&regions[*id as usize]))
            .sum()
    };

    delay.max(0.0).round() as u64
}
