//! The control-socket wire protocol (§6): a fixed, bit-exact encoding kept
//! entirely independent from `cxlmem-model::Region`'s in-memory layout —
//! the source used `sizeof(CXLMemExpander)` as its wire size directly, which
//! a portable rewrite cannot do, since field order/padding aren't portable
//! across compilers. Every record here has an explicit `encode`/`decode`
//! pair and a documented byte offset table.

#![forbid(unsafe_code)]

use cxlmem_model::Region;

pub const HEADER_LEN: usize = 16;
pub const REGION_LEN: usize = 48;

pub const SOCKET_PATH: &str = "/tmp/cxl_mem_simulator.sock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    ProcessCreate,
    ThreadCreate,
    ThreadExit,
}

impl OpCode {
    fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(OpCode::ProcessCreate),
            1 => Some(OpCode::ThreadCreate),
            2 => Some(OpCode::ThreadExit),
            _ => None,
        }
    }

    fn to_u32(self) -> u32 {
        match self {
            OpCode::ProcessCreate => 0,
            OpCode::ThreadCreate => 1,
            OpCode::ThreadExit => 2,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("datagram too short for header: got {got} bytes, need at least {HEADER_LEN}")]
    HeaderTooShort { got: usize },

    #[error("payload size mismatch: header declares {num_of_region} regions ({expected} bytes), got {got} bytes")]
    PayloadSizeMismatch {
        num_of_region: u32,
        expected: usize,
        got: usize,
    },

    /// Not fatal by itself — §4.7 step 1 says "unknown opcode → warn and
    /// skip" — but decode still reports it distinctly so the caller can log
    /// the raw value before discarding the datagram.
    #[error("unknown opcode {0}")]
    UnknownOpcode(u32),
}

/// The fixed 16-byte header every control datagram begins with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlHeader {
    pub tgid: u32,
    pub tid: u32,
    pub opcode: OpCode,
    pub num_of_region: u32,
}

/// A fully decoded control datagram: the header plus region descriptors,
/// present only for `ProcessCreate`/`ThreadCreate` with `num_of_region >= 2`
/// (§4.1, PEBS arming condition).
#[derive(Debug, Clone, PartialEq)]
pub struct ControlMessage {
    pub header: ControlHeader,
    pub regions: Vec<Region>,
}

impl ControlMessage {
    pub fn arms_pebs(&self) -> bool {
        matches!(self.header.opcode, OpCode::ProcessCreate | OpCode::ThreadCreate) && self.header.num_of_region >= 2
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < HEADER_LEN {
            return Err(ProtocolError::HeaderTooShort { got: buf.len() });
        }
        let tgid = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let tid = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let opcode_raw = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let num_of_region = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        let opcode = OpCode::from_u32(opcode_raw).ok_or(ProtocolError::UnknownOpcode(opcode_raw))?;

        let expected_payload = REGION_LEN * num_of_region as usize;
        let got_payload = buf.len() - HEADER_LEN;
        if expected_payload != got_payload {
            return Err(ProtocolError::PayloadSizeMismatch {
                num_of_region,
                expected: expected_payload,
                got: got_payload,
            });
        }

        let regions = buf[HEADER_LEN..]
            .chunks_exact(REGION_LEN)
            .map(decode_region)
            .collect();

        Ok(ControlMessage {
            header: ControlHeader {
                tgid,
                tid,
                opcode,
                num_of_region,
            },
            regions,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + REGION_LEN * self.regions.len());
        buf.extend_from_slice(&self.header.tgid.to_le_bytes());
        buf.extend_from_slice(&self.header.tid.to_le_bytes());
        buf.extend_from_slice(&self.header.opcode.to_u32().to_le_bytes());
        buf.extend_from_slice(&self.header.num_of_region.to_le_bytes());
        for region in &self.regions {
            buf.extend_from_slice(&encode_region(region));
        }
        buf
    }
}

/// `(id: u32, pad: u32, read_lat_ns: f64, write_lat_ns: f64, read_bw: f64,
/// write_bw: f64, capacity_mb: u64)` — 48 bytes, little-endian, the `pad`
/// word keeping every `f64` 8-byte aligned within the record.
fn encode_region(region: &Region) -> [u8; REGION_LEN] {
    let mut out = [0u8; REGION_LEN];
    out[0..4].copy_from_slice(&region.id.to_le_bytes());
    out[4..8].copy_from_slice(&0u32.to_le_bytes());
    out[8..16].copy_from_slice(&region.read_latency_ns.to_le_bytes());
    out[16..24].copy_from_slice(&region.write_latency_ns.to_le_bytes());
    out[24..32].copy_from_slice(&region.read_bw_mbps.to_le_bytes());
    out[32..40].copy_from_slice(&region.write_bw_mbps.to_le_bytes());
    out[40..48].copy_from_slice(&region.capacity_mb.to_le_bytes());
    out
}

fn decode_region(buf: &[u8]) -> Region {
    let id = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    let read_latency_ns = f64::from_le_bytes(buf[8..16].try_into().unwrap());
    let write_latency_ns = f64::from_le_bytes(buf[16..24].try_into().unwrap());
    let read_bw_mbps = f64::from_le_bytes(buf[24..32].try_into().unwrap());
    let write_bw_mbps = f64::from_le_bytes(buf[32..40].try_into().unwrap());
    let capacity_mb = u64::from_le_bytes(buf[40..48].try_into().unwrap());
    Region::new(id, read_latency_ns, write_latency_ns, read_bw_mbps, write_bw_mbps, capacity_mb)
}
