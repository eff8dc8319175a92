//! CLI surface (§6) and the validated [`SimConfig`] it's parsed into.
//!
//! Argument parsing itself is explicitly out of scope for the core (§1
//! lists it among the external collaborators), but a complete binary still
//! needs one — `clap`'s derive API, already a workspace dependency, covers
//! it rather than hand-rolling `std::env::args()`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("--latency must list an even number of values (read,write per region), got {0}")]
    LatencyOddLength(usize),

    #[error("--bandwidth must list an even number of values (read,write per region), got {0}")]
    BandwidthOddLength(usize),

    #[error("--latency and --bandwidth describe different region counts: {latency_regions} vs {bandwidth_regions}")]
    RegionCountMismatch {
        latency_regions: usize,
        bandwidth_regions: usize,
    },

    #[error("failed to parse '{field}' value '{value}'")]
    BadValue {
        field: &'static str,
        value: String,
        #[source]
        source: std::num::ParseFloatError,
    },
}

/// PEBS sampling granularity — page or cacheline — passed through verbatim
/// to the PEBS setup the perf boundary performs; the core itself never
/// interprets it beyond forwarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PebsMode {
    #[value(name = "p")]
    Page,
    #[value(name = "c")]
    Cacheline,
}

/// Raw CLI surface (§6). Mirrors the source's flag names with Rust
/// conventions (`--dram_latency` instead of `--dram-latency`, kept as-is
/// since `clap` would otherwise need an alias to stay drop-in compatible
/// with existing wrapper scripts).
#[derive(Debug, Parser)]
#[command(name = "cxlmemsim", about = "CXL.mem Type-3 memory expander latency/bandwidth emulator")]
pub struct Cli {
    /// Command line of the target workload to launch and observe.
    #[arg(long)]
    pub target: String,

    /// Epoch length in milliseconds.
    #[arg(long, default_value_t = 20)]
    pub interval: u64,

    /// Comma-separated list of CPU ids the target's threads may be pinned to.
    #[arg(long, value_delimiter = ',')]
    pub cpuset: Vec<i32>,

    /// Baseline local-DRAM latency in nanoseconds, subtracted from every
    /// region's latency before injection.
    #[arg(long = "dram_latency", default_value_t = 85.0)]
    pub dram_latency: f64,

    /// PEBS sampling period (every Nth event sampled).
    #[arg(long, default_value_t = 1)]
    pub pebsperiod: u64,

    /// PEBS sampling granularity.
    #[arg(long, value_enum, default_value_t = PebsMode::Page)]
    pub mode: PebsMode,

    /// Newick-style memory topology description.
    #[arg(long, default_value = "(1)")]
    pub topology: String,

    /// CPU frequency in MHz, used to convert stall cycles into seconds.
    #[arg(long, default_value_t = 4000.0)]
    pub frequency: f64,

    /// Flat `read0,write0,read1,write1,...` per-region latency list in ns.
    #[arg(long, value_delimiter = ',')]
    pub latency: Vec<f64>,

    /// Empirical constant multiplying LLC misses in the stall model.
    #[arg(long, default_value_t = 4.1)]
    pub weight: f64,

    /// Flat `read0,write0,read1,write1,...` per-region bandwidth list in MB/s.
    #[arg(long, value_delimiter = ',')]
    pub bandwidth: Vec<f64>,

    /// Overrides the default control-socket path, mainly for running more
    /// than one instance side by side in tests.
    #[arg(long)]
    pub socket_path: Option<PathBuf>,
}

/// One region's latency/bandwidth pair parsed out of `--latency`/`--bandwidth`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionRates {
    pub read_latency_ns: f64,
    pub write_latency_ns: f64,
    pub read_bw_mbps: f64,
    pub write_bw_mbps: f64,
}

/// Validated configuration handed to the engine: every CLI-level invariant
/// (even-length rate lists, matching region counts) has already been
/// checked, so downstream code can index without re-validating.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub target: String,
    pub interval_ms: u64,
    pub cpuset: Vec<i32>,
    pub dram_latency_ns: f64,
    pub pebs_period: u64,
    pub mode: PebsMode,
    pub topology: String,
    pub frequency_mhz: f64,
    pub weight: f64,
    pub rates: Vec<RegionRates>,
    pub socket_path: PathBuf,
}

impl SimConfig {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        if cli.latency.len() % 2 != 0 {
            return Err(ConfigError::LatencyOddLength(cli.latency.len()));
        }
        if cli.bandwidth.len() % 2 != 0 {
            return Err(ConfigError::BandwidthOddLength(cli.bandwidth.len()));
        }
        let latency_regions = cli.latency.len() / 2;
        let bandwidth_regions = cli.bandwidth.len() / 2;
        if !cli.bandwidth.is_empty() && !cli.latency.is_empty() && latency_regions != bandwidth_regions {
            return Err(ConfigError::RegionCountMismatch {
                latency_regions,
                bandwidth_regions,
            });
        }

        let region_count = latency_regions.max(bandwidth_regions).max(1);
        let rates = (0..region_count)
            .map(|i| RegionRates {
                read_latency_ns: cli.latency.get(2 * i).copied().unwrap_or(cli.dram_latency),
                write_latency_ns: cli.latency.get(2 * i + 1).copied().unwrap_or(cli.dram_latency),
                read_bw_mbps: cli.bandwidth.get(2 * i).copied().unwrap_or(0.0),
                write_bw_mbps: cli.bandwidth.get(2 * i + 1).copied().unwrap_or(0.0),
            })
            .collect();

        Ok(SimConfig {
            target: cli.target,
            interval_ms: cli.interval,
            cpuset: cli.cpuset,
            dram_latency_ns: cli.dram_latency,
            pebs_period: cli.pebsperiod,
            mode: cli.mode,
            topology: cli.topology,
            frequency_mhz: cli.frequency,
            weight: cli.weight,
            rates,
            socket_path: cli
                .socket_path
                .unwrap_or_else(|| PathBuf::from(cxlmem_protocol_socket_path())),
        })
    }
}

/// Kept as a free function (rather than depending on `cxlmem-protocol`
/// directly) so this crate's dependency list stays limited to CLI parsing
/// concerns; the engine crate is the one place the two constants must agree,
/// and it asserts that in its own tests.
fn cxlmem_protocol_socket_path() -> &'static str {
    "/tmp/cxl_mem_simulator.sock"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli {
            target: "echo hi".into(),
            interval: 20,
            cpuset: vec![],
            dram_latency: 85.0,
            pebsperiod: 1,
            mode: PebsMode::Page,
            topology: "(1)".into(),
            frequency: 4000.0,
            latency: vec![],
            weight: 4.1,
            bandwidth: vec![],
            socket_path: None,
        }
    }

    #[test]
    fn defaults_produce_one_uniform_region() {
        let cfg = SimConfig::from_cli(base_cli()).unwrap();
        assert_eq!(cfg.rates.len(), 1);
        assert_eq!(cfg.rates[0].read_latency_ns, 85.0);
    }

    #[test]
    fn odd_latency_length_is_rejected() {
        let mut cli = base_cli();
        cli.latency = vec![300.0, 400.0, 600.0];
        assert!(matches!(SimConfig::from_cli(cli), Err(ConfigError::LatencyOddLength(3))));
    }

    #[test]
    fn mismatched_region_counts_are_rejected() {
        let mut cli = base_cli();
        cli.latency = vec![300.0, 400.0, 600.0, 800.0];
        cli.bandwidth = vec![1000.0, 800.0];
        assert!(matches!(
            SimConfig::from_cli(cli),
            Err(ConfigError::RegionCountMismatch {
                latency_regions: 2,
                bandwidth_regions: 1
            })
        ));
    }

    #[test]
    fn two_region_latency_parses_into_two_rate_entries() {
        let mut cli = base_cli();
        cli.latency = vec![300.0, 400.0, 600.0, 800.0];
        cli.bandwidth = vec![1000.0, 800.0, 500.0, 400.0];
        let cfg = SimConfig::from_cli(cli).unwrap();
        assert_eq!(cfg.rates.len(), 2);
        assert_eq!(cfg.rates[1].read_latency_ns, 600.0);
        assert_eq!(cfg.rates[1].write_bw_mbps, 400.0);
    }

    #[test]
    fn default_socket_path_matches_the_well_known_path() {
        let cfg = SimConfig::from_cli(base_cli()).unwrap();
        assert_eq!(cfg.socket_path, PathBuf::from("/tmp/cxl_mem_simulator.sock"));
    }
}
