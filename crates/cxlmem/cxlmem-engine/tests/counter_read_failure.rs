//! Regression coverage for §7's `CounterReadFailed`: a failed perf read must
//! be absorbed (warned, previous snapshot kept) rather than aborting the
//! whole epoch loop — see `driver::step_on_monitor`.

use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;

use cxlmem_config::{PebsMode, RegionRates, SimConfig};
use cxlmem_engine::{ControlSocket, EpochLoop, SimulationContext};
use cxlmem_model::{CBoSample, CounterSample};
use cxlmem_perf::{PerfError, PerfSource};
use cxlmem_protocol::{ControlHeader, ControlMessage, OpCode};

/// Always fails `read()`; never fails `start()`/`stop()` so a monitor built
/// on it still enables and terminates cleanly.
struct AlwaysFailsRead;
impl PerfSource for AlwaysFailsRead {
    fn start(&mut self) -> Result<(), PerfError> {
        Ok(())
    }
    fn read(&mut self) -> Result<(CounterSample, Vec<CBoSample>), PerfError> {
        Err(PerfError::Read {
            slot: "all_dram_rds",
            source: std::io::Error::other("simulated perf read failure"),
        })
    }
    fn stop(&mut self) -> Result<(), PerfError> {
        Ok(())
    }
}

fn temp_socket_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("cxlmem-engine-it-{name}-{}.sock", std::process::id()))
}

fn test_config() -> SimConfig {
    SimConfig {
        target: "true".into(),
        interval_ms: 1,
        cpuset: vec![],
        dram_latency_ns: 85.0,
        pebs_period: 1,
        mode: PebsMode::Page,
        topology: "(1)".into(),
        frequency_mhz: 4000.0,
        weight: 4.1,
        rates: vec![RegionRates {
            read_latency_ns: 300.0,
            write_latency_ns: 400.0,
            read_bw_mbps: 50.0,
            write_bw_mbps: 50.0,
        }],
        socket_path: PathBuf::new(),
    }
}

/// A monitor whose every perf read fails should still let the loop run to
/// completion once it's told to exit — the read failure must not surface
/// as a fatal `EngineError` out of `EpochLoop::run`.
#[test]
fn failed_counter_read_does_not_abort_the_loop() {
    let path = temp_socket_path("counter-read-failure");
    let socket = ControlSocket::bind(&path).unwrap();
    let ctx = SimulationContext::new(
        &test_config(),
        Box::new(|_tid, _cpu, _cbos| Box::new(AlwaysFailsRead) as Box<dyn PerfSource>),
    )
    .unwrap();
    let mut epoch_loop = EpochLoop::new(ctx, socket);

    let client = UnixDatagram::unbound().unwrap();
    client.connect(&path).unwrap();
    let pid = std::process::id();

    let create = ControlMessage {
        header: ControlHeader {
            tgid: pid,
            tid: pid,
            opcode: OpCode::ProcessCreate,
            num_of_region: 0,
        },
        regions: vec![],
    };
    let exit = ControlMessage {
        header: ControlHeader {
            tgid: pid,
            tid: pid,
            opcode: OpCode::ThreadExit,
            num_of_region: 0,
        },
        regions: vec![],
    };
    client.send(&create.encode()).unwrap();
    client.send(&exit.encode()).unwrap();

    // Would return an `EngineError` on the first epoch if a counter-read
    // failure propagated fatally instead of being absorbed per §7.
    assert!(epoch_loop.run().is_ok());

    let _ = std::fs::remove_file(&path);
}
