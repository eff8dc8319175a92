//! Wire-independent data model for the CXL.mem emulator: per-epoch counter
//! snapshots and the immutable region/topology leaf descriptor.
//!
//! All counter fields are monotonically non-decreasing for the lifetime of
//! a perf fd; the value attributed to one epoch is always the *saturating*
//! difference of two consecutive snapshots (§3 of the design doc), so a
//! counter that wraps or gets reset never produces a negative delta.

#![forbid(unsafe_code)]

/// One per-epoch snapshot of a thread's core-local hardware counters.
///
/// Mirrors the seven event streams `PerfSource` configures per thread:
/// six raw PMU counters plus one BPF-pipe-derived auxiliary count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterSample {
    /// CPU-wide DRAM reads, core + prefetcher (uncore, two selector words).
    pub all_dram_rds: u64,
    /// Cycles stalled behind L2.
    pub cpu_l2stall_t: u64,
    pub cpu_llcl_hits: u64,
    pub cpu_llcl_miss: u64,
    pub cpu_bandwidth_read: u64,
    pub cpu_bandwidth_write: u64,
    /// Populated only when the BPF trace-pipe collaborator is wired in.
    pub mmap_event_count: Option<u64>,
}

impl CounterSample {
    /// Saturating per-field difference: `self - earlier`, one epoch's worth.
    ///
    /// `mmap_event_count` deltas only when both snapshots carry a value;
    /// otherwise the delta is `None` (collaborator not attached this epoch).
    pub fn delta(&self, earlier: &CounterSample) -> CounterSample {
        CounterSample {
            all_dram_rds: self.all_dram_rds.saturating_sub(earlier.all_dram_rds),
            cpu_l2stall_t: self.cpu_l2stall_t.saturating_sub(earlier.cpu_l2stall_t),
            cpu_llcl_hits: self.cpu_llcl_hits.saturating_sub(earlier.cpu_llcl_hits),
            cpu_llcl_miss: self.cpu_llcl_miss.saturating_sub(earlier.cpu_llcl_miss),
            cpu_bandwidth_read: self
                .cpu_bandwidth_read
                .saturating_sub(earlier.cpu_bandwidth_read),
            cpu_bandwidth_write: self
                .cpu_bandwidth_write
                .saturating_sub(earlier.cpu_bandwidth_write),
            mmap_event_count: match (self.mmap_event_count, earlier.mmap_event_count) {
                (Some(a), Some(b)) => Some(a.saturating_sub(b)),
                _ => None,
            },
        }
    }
}

/// One per-CBo (LLC slice) snapshot. Only `llc_wb` feeds attribution; the
/// type stays a newtype rather than a bare `u64` so call sites read as
/// "a CBo sample" rather than an anonymous count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CBoSample {
    pub llc_wb: u64,
}

impl CBoSample {
    pub fn delta(&self, earlier: &CBoSample) -> CBoSample {
        CBoSample {
            llc_wb: self.llc_wb.saturating_sub(earlier.llc_wb),
        }
    }
}

/// Per-thread PEBS result, meaningful only once `num_of_region >= 2`.
///
/// `sample[i]` counts address-tagged samples that fell in region `i`;
/// `total` is the sum of all address-tagged samples (kept separately rather
/// than derived, since the hardware count can include samples that didn't
/// resolve to any known region). `llcmiss` is the PEBS-path LLC-miss count
/// used by the attribution engine's miss decomposition (§4.4 step 1) instead
/// of the monitor's core-local counter once the PEBS path is active.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PebsSample {
    pub total: u64,
    pub llcmiss: u64,
    pub sample: Vec<u64>,
}

impl PebsSample {
    pub fn with_regions(num_of_region: usize) -> Self {
        Self {
            total: 0,
            llcmiss: 0,
            sample: vec![0; num_of_region],
        }
    }

    /// Saturating per-field difference against an earlier snapshot.
    ///
    /// Panics if the two snapshots disagree on region count — that would
    /// mean `set_region_info` ran mid-monitor, which the monitor lifecycle
    /// never allows (region layout is fixed at `enable`/`set_region_info`
    /// time and never changes while `On`/`Off`).
    pub fn delta(&self, earlier: &PebsSample) -> PebsSample {
        assert_eq!(
            self.sample.len(),
            earlier.sample.len(),
            "PEBS region count changed mid-monitor"
        );
        PebsSample {
            total: self.total.saturating_sub(earlier.total),
            llcmiss: self.llcmiss.saturating_sub(earlier.llcmiss),
            sample: self
                .sample
                .iter()
                .zip(&earlier.sample)
                .map(|(a, b)| a.saturating_sub(*b))
                .collect(),
        }
    }
}

/// An emulated memory region: immutable once constructed, as required by
/// `Topology::insert_end_point`'s append-only region vector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Region {
    pub id: u32,
    pub read_latency_ns: f64,
    pub write_latency_ns: f64,
    pub read_bw_mbps: f64,
    pub write_bw_mbps: f64,
    pub capacity_mb: u64,
}

impl Region {
    pub fn new(
        id: u32,
        read_latency_ns: f64,
        write_latency_ns: f64,
        read_bw_mbps: f64,
        write_bw_mbps: f64,
        capacity_mb: u64,
    ) -> Self {
        Self {
            id,
            read_latency_ns,
            write_latency_ns,
            read_bw_mbps,
            write_bw_mbps,
            capacity_mb,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_delta_is_saturating_on_reset() {
        let before = CounterSample {
            cpu_llcl_miss: 1000,
            ..Default::default()
        };
        let after = CounterSample {
            cpu_llcl_miss: 10, // counter reset underneath us
            ..Default::default()
        };
        assert_eq!(after.delta(&before).cpu_llcl_miss, 0);
    }

    #[test]
    fn counter_delta_is_monotone_normal_case() {
        let before = CounterSample {
            cpu_llcl_miss: 1000,
            all_dram_rds: 500,
            ..Default::default()
        };
        let after = CounterSample {
            cpu_llcl_miss: 1500,
            all_dram_rds: 700,
            ..Default::default()
        };
        let d = after.delta(&before);
        assert_eq!(d.cpu_llcl_miss, 500);
        assert_eq!(d.all_dram_rds, 200);
    }

    #[test]
    fn mmap_event_delta_none_unless_both_present() {
        let before = CounterSample::default();
        let after = CounterSample {
            mmap_event_count: Some(42),
            ..Default::default()
        };
        assert_eq!(after.delta(&before).mmap_event_count, None);

        let before2 = CounterSample {
            mmap_event_count: Some(10),
            ..Default::default()
        };
        assert_eq!(after.delta(&before2).mmap_event_count, Some(32));
    }

    #[test]
    fn pebs_delta_per_region() {
        let before = PebsSample {
            total: 10,
            llcmiss: 3,
            sample: vec![4, 6],
        };
        let after = PebsSample {
            total: 25,
            llcmiss: 9,
            sample: vec![9, 16],
        };
        let d = after.delta(&before);
        assert_eq!(d.total, 15);
        assert_eq!(d.llcmiss, 6);
        assert_eq!(d.sample, vec![5, 10]);
    }
}
