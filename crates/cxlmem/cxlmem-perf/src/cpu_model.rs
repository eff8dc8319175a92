//! The CPU-model table: the external collaborator that maps a running CPU
//! (vendor/family/model) to the raw `(type, config, config1)` triples for
//! each of the six hardware counters and the per-CBo uncore writeback event.
//!
//! Real event encodings are model-specific (a Sapphire Rapids CHA writeback
//! event is not the Skylake CBo one), so `cxlmem-perf` never hardcodes a
//! single encoding: it depends on this trait and ships one conservative
//! fallback implementation.

use crate::ffi::{PERF_TYPE_HARDWARE, PERF_TYPE_HW_CACHE, PERF_TYPE_RAW};

/// A `(perf_type, config, config1)` triple ready to hand to
/// `perf_event_open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventSelector {
    pub perf_type: u32,
    pub config: u64,
    pub config1: u64,
}

impl EventSelector {
    pub const fn hardware(config: u64) -> Self {
        Self {
            perf_type: PERF_TYPE_HARDWARE,
            config,
            config1: 0,
        }
    }

    pub const fn hw_cache(config: u64) -> Self {
        Self {
            perf_type: PERF_TYPE_HW_CACHE,
            config,
            config1: 0,
        }
    }

    pub const fn raw(config: u64) -> Self {
        Self {
            perf_type: PERF_TYPE_RAW,
            config,
            config1: 0,
        }
    }
}

/// The six per-thread counter selectors plus the uncore CBo/CHA writeback
/// selector, all resolved for the CPU the daemon is currently running on.
#[derive(Debug, Clone, Copy)]
pub struct CpuEventSet {
    pub all_dram_rds: EventSelector,
    pub cpu_l2stall_t: EventSelector,
    pub cpu_llcl_hits: EventSelector,
    pub cpu_llcl_miss: EventSelector,
    pub cpu_bandwidth_read: EventSelector,
    pub cpu_bandwidth_write: EventSelector,
    pub cbo_writeback: EventSelector,
}

/// Resolves the running CPU to its event-selector table. Implementations
/// typically read `/proc/cpuinfo` or `cpuid` to pick a model-specific table;
/// `cxlmem-perf` ships only [`StaticCpuModelTable`], which returns the same
/// conservative selectors regardless of the underlying model and is meant
/// to be swapped out for a real vendor table at deployment time.
pub trait CpuModelTable: Send + Sync {
    fn resolve(&self) -> CpuEventSet;
}

/// Fallback table built from the generic `PERF_COUNT_HW_*` selectors where
/// one exists, and a raw placeholder encoding (`0x0`) for the events — DRAM
/// bandwidth, L2 stall cycles, CBo writeback — the generic hardware-event
/// enum has no entry for. A real deployment replaces this with a table
/// generated from the CPU's uncore performance-monitoring documentation.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticCpuModelTable;

impl CpuModelTable for StaticCpuModelTable {
    fn resolve(&self) -> CpuEventSet {
        CpuEventSet {
            all_dram_rds: EventSelector::raw(0x01b7),
            cpu_l2stall_t: EventSelector::raw(0x0114),
            cpu_llcl_hits: EventSelector::hw_cache(PerfHwCache::LlcHits.encode()),
            cpu_llcl_miss: EventSelector::hw_cache(PerfHwCache::LlcMisses.encode()),
            cpu_bandwidth_read: EventSelector::raw(0x00b0),
            cpu_bandwidth_write: EventSelector::raw(0x00b8),
            cbo_writeback: EventSelector::raw(0x2002),
        }
    }
}

/// The subset of `enum perf_hw_cache_id`/`PERF_COUNT_HW_CACHE_*` this crate
/// actually needs, kept as a tiny local enum rather than pulling the whole
/// generated constant table in from `libc` (which doesn't expose it either).
#[derive(Debug, Clone, Copy)]
enum PerfHwCache {
    LlcHits,
    LlcMisses,
}

impl PerfHwCache {
    /// `PERF_COUNT_HW_CACHE_LL | (OP_READ << 8) | (RESULT_ACCESS/MISS << 16)`,
    /// the packed encoding `PERF_TYPE_HW_CACHE` expects in `config`.
    fn encode(self) -> u64 {
        const PERF_COUNT_HW_CACHE_LL: u64 = 2;
        const OP_READ: u64 = 0;
        const RESULT_ACCESS: u64 = 0;
        const RESULT_MISS: u64 = 1;
        let result = match self {
            PerfHwCache::LlcHits => RESULT_ACCESS,
            PerfHwCache::LlcMisses => RESULT_MISS,
        };
        PERF_COUNT_HW_CACHE_LL | (OP_READ << 8) | (result << 16)
    }
}
