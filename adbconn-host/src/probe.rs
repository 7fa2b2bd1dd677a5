//! Debugger-side probe: handshake, one monitor chunk, print the reply.
//!
//! Useful against a forwarded port, e.g. after
//! `adb forward tcp:8700 jdwp:<pid>`.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info};

use adbconn_core::packet::TypeName;
use adbconn_core::{AdbConnError, Chunk, HANDSHAKE, Packet, PacketCodec};

const PROBE_ID: u32 = 1;

/// Parse a four-character chunk type such as `HELO`.
pub fn parse_chunk_type(text: &str) -> Result<u32, String> {
    let code: [u8; 4] = text
        .as_bytes()
        .try_into()
        .map_err(|_| format!("chunk type must be 4 bytes, got {text:?}"))?;
    Ok(Chunk::fourcc(&code))
}

/// Perform the handshake and exchange one monitor chunk.
pub async fn probe(
    addr: SocketAddr,
    chunk_type: u32,
    timeout: Duration,
) -> Result<Chunk, AdbConnError> {
    let mut stream = TcpStream::connect(addr).await?;
    info!("connected to {addr}");

    stream.write_all(HANDSHAKE).await?;
    let mut echo = [0u8; HANDSHAKE.len()];
    tokio::time::timeout(timeout, stream.read_exact(&mut echo))
        .await
        .map_err(|_| AdbConnError::Other("timed out waiting for handshake".into()))??;
    if &echo != HANDSHAKE {
        return Err(AdbConnError::HandshakeMismatch);
    }
    debug!("handshake complete");

    let mut framed = Framed::new(stream, PacketCodec);
    framed
        .send(Packet::monitor_command(PROBE_ID, &Chunk::new(chunk_type, Vec::new()))?)
        .await?;

    let reply = tokio::time::timeout(timeout, framed.next())
        .await
        .map_err(|_| AdbConnError::Other("timed out waiting for reply".into()))?
        .ok_or_else(|| AdbConnError::Other("connection closed before reply".into()))??;
    if reply.id() != PROBE_ID || !reply.header().is_reply() {
        return Err(AdbConnError::Other(format!(
            "unexpected packet id {} in reply",
            reply.id()
        )));
    }
    if reply.header().error_code() != 0 {
        return Err(AdbConnError::Other(format!(
            "error reply {}",
            reply.header().error_code()
        )));
    }
    let chunk = reply
        .chunk()
        .ok_or(AdbConnError::InvalidHeader("reply carries no chunk"))?;
    info!(chunk = %TypeName(chunk.chunk_type), len = chunk.payload.len(), "reply received");
    Ok(chunk)
}
