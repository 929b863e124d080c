//! Turmoil transport glue.
//!
//! Runs a [`SimGateway`] behind a simulated TCP listener and drives a client
//! [`Session`] over a simulated TCP stream, so sessions can be exercised
//! under latency and partitions.

use atgw_core::Session;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::trace;
use turmoil::net::{TcpListener, TcpStream};

use crate::{recorder::Recorder, sim_gateway::SimGateway};

/// Port the simulated gateway listens on.
pub const GATEWAY_PORT: u16 = 7300;

const READ_CHUNK: usize = 4096;

/// Serve `connections` connections, one after another, with `gateway`.
///
/// Each connection runs until the client hangs up; the gateway then forgets
/// it but keeps its resumption store for the next one.
pub async fn serve_gateway(gateway: &mut SimGateway, connections: usize) -> turmoil::Result {
    let listener = TcpListener::bind(("0.0.0.0", GATEWAY_PORT)).await?;
    for _ in 0..connections {
        let (mut stream, peer) = listener.accept().await?;
        trace!(%peer, "gateway accepted connection");

        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            gateway.receive(&buf[..n])?;
            let out = gateway.take_outbound();
            if !out.is_empty() {
                stream.write_all(&out).await?;
            }
        }
        gateway.drop_connection();
    }
    Ok(())
}

/// Client-side pump between a [`Session`] and a simulated stream.
///
/// The session's handler must write into `recorder` (see
/// [`crate::RecordingHandler`]) in synchronous mode.
#[derive(Debug)]
pub struct SessionDriver {
    stream: TcpStream,
    recorder: Recorder,
}

impl SessionDriver {
    /// Connect to the gateway on `host`.
    pub async fn connect(host: &str, recorder: Recorder) -> turmoil::Result<Self> {
        let stream = TcpStream::connect((host, GATEWAY_PORT)).await?;
        Ok(Self { stream, recorder })
    }

    /// Send everything the session has written.
    pub async fn flush(&mut self) -> turmoil::Result {
        let wire = self.recorder.take_wire();
        if !wire.is_empty() {
            self.stream.write_all(&wire).await?;
        }
        Ok(())
    }

    /// Read once from the stream into `session`. Returns the byte count,
    /// 0 at end of stream.
    pub async fn read_into(&mut self, session: &mut Session) -> turmoil::Result<usize> {
        let mut buf = vec![0u8; READ_CHUNK];
        let n = self.stream.read(&mut buf).await?;
        if n > 0 {
            session.read_from(&buf[..n])?;
        }
        Ok(n)
    }
}
