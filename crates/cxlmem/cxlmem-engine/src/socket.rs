//! The control-socket boundary (§6, §4.7 step 1): a non-blocking UNIX
//! datagram socket that the epoch loop drains to `EAGAIN` once per epoch,
//! before the sleep. Decoding is `cxlmem-protocol`'s job; this module only
//! owns the socket and the "keep reading until there's nothing left" loop.

use std::io::ErrorKind;
use std::os::unix::net::UnixDatagram;
use std::path::Path;

use cxlmem_protocol::{ControlMessage, ProtocolError};

const MAX_DATAGRAM: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("failed to bind control socket at {path}")]
    Bind {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("control socket recv failed")]
    Recv(#[source] std::io::Error),
}

/// Non-blocking control socket. Binding removes a stale socket file left
/// over from a prior crashed run — `bind` otherwise fails with `EADDRINUSE`
/// on a path that already exists, which a UNIX datagram socket's listener
/// owns exclusively in practice (§6: "no persisted state between runs").
pub struct ControlSocket {
    inner: UnixDatagram,
}

impl ControlSocket {
    pub fn bind(path: &Path) -> Result<Self, SocketError> {
        let _ = std::fs::remove_file(path);
        let inner = UnixDatagram::bind(path).map_err(|source| SocketError::Bind {
            path: path.display().to_string(),
            source,
        })?;
        inner.set_nonblocking(true).map_err(|source| SocketError::Bind {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self { inner })
    }

    /// Drains every queued datagram, calling `on_message` for each decoded
    /// one. Returns as soon as `recv` reports `WouldBlock`/`EAGAIN` (§4.7
    /// step 1: "non-blocking reads until EAGAIN"). A datagram that fails to
    /// decode with `ProtocolError::UnknownOpcode` is warned about and
    /// skipped (§4.7 step 1, §7); any other decode error — a size mismatch —
    /// is fatal and returned to the caller immediately.
    pub fn drain(&self, mut on_message: impl FnMut(ControlMessage)) -> Result<(), DrainError> {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            match self.inner.recv(&mut buf) {
                Ok(n) => match ControlMessage::decode(&buf[..n]) {
                    Ok(msg) => on_message(msg),
                    Err(ProtocolError::UnknownOpcode(op)) => {
                        tracing::warn!(opcode = op, "unknown control opcode, skipping datagram");
                    }
                    Err(e) => return Err(DrainError::Malformed(e)),
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(DrainError::Socket(SocketError::Recv(e))),
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DrainError {
    /// §7's `ControlPayloadMalformed`: fatal, explicit exit.
    #[error(transparent)]
    Malformed(#[from] ProtocolError),
    #[error(transparent)]
    Socket(#[from] SocketError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use cxlmem_protocol::{ControlHeader, OpCode};

    fn temp_socket_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("cxlmem-engine-test-{name}-{}.sock", std::process::id()))
    }

    #[test]
    fn drains_until_would_block_and_dispatches_in_order() {
        let path = temp_socket_path("drain-order");
        let server = ControlSocket::bind(&path).unwrap();
        let client = UnixDatagram::unbound().unwrap();
        client.connect(&path).unwrap();

        let msg1 = ControlMessage {
            header: ControlHeader {
                tgid: 1,
                tid: 1,
                opcode: OpCode::ProcessCreate,
                num_of_region: 0,
            },
            regions: vec![],
        };
        let msg2 = ControlMessage {
            header: ControlHeader {
                tgid: 1,
                tid: 1,
                opcode: OpCode::ThreadExit,
                num_of_region: 0,
            },
            regions: vec![],
        };
        client.send(&msg1.encode()).unwrap();
        client.send(&msg2.encode()).unwrap();

        let mut seen = vec![];
        server.drain(|m| seen.push(m.header.opcode)).unwrap();
        assert_eq!(seen, vec![OpCode::ProcessCreate, OpCode::ThreadExit]);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn malformed_payload_is_reported_as_fatal() {
        let path = temp_socket_path("malformed");
        let server = ControlSocket::bind(&path).unwrap();
        let client = UnixDatagram::unbound().unwrap();
        client.connect(&path).unwrap();

        let mut buf = vec![0u8; 16];
        buf[12..16].copy_from_slice(&2u32.to_le_bytes()); // claims 2 regions, sends none
        client.send(&buf).unwrap();

        let result = server.drain(|_| {});
        assert!(matches!(result, Err(DrainError::Malformed(_))));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn unknown_opcode_is_skipped_not_fatal() {
        let path = temp_socket_path("unknown-opcode");
        let server = ControlSocket::bind(&path).unwrap();
        let client = UnixDatagram::unbound().unwrap();
        client.connect(&path).unwrap();

        let mut buf = vec![0u8; 16];
        buf[8..12].copy_from_slice(&99u32.to_le_bytes());
        client.send(&buf).unwrap();

        let mut called = false;
        let result = server.drain(|_| called = true);
        assert!(result.is_ok());
        assert!(!called);

        let _ = std::fs::remove_file(&path);
    }
}
