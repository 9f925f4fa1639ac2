//! Bidirectional byte bridge shared by the WebSocket and TCP handlers.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::channel::Lifetime;

const BUFFER_SIZE: usize = 16 * 1024;

/// Which side ended the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeEnd {
    /// The origin closed its side
    Origin,
    /// The tunnel peer closed its side
    Tunnel,
    /// The exchange lifetime was cancelled
    Cancelled,
}

/// Moves bytes origin→tunnel and tunnel→origin until one direction stops.
///
/// End-of-stream on either leg, or cancellation, is a normal close. The first
/// leg to finish drops the other, and `origin` is closed on return.
pub async fn bridge<O, T>(origin: O, tunnel: T, lifetime: &Lifetime) -> io::Result<BridgeEnd>
where
    O: AsyncRead + AsyncWrite + Unpin + Send,
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (mut origin_read, mut origin_write) = tokio::io::split(origin);
    let (mut tunnel_read, mut tunnel_write) = tokio::io::split(tunnel);

    let origin_to_tunnel = copy_flushing(&mut origin_read, &mut tunnel_write);
    let tunnel_to_origin = async {
        let copied = copy_flushing(&mut tunnel_read, &mut origin_write).await?;
        // half-close so the origin sees EOF before we tear down
        let _ = origin_write.shutdown().await;
        Ok::<u64, io::Error>(copied)
    };

    let end = tokio::select! {
        res = origin_to_tunnel => {
            let bytes = res?;
            tracing::debug!(bytes_to_tunnel = bytes, "Origin closed bridge");
            BridgeEnd::Origin
        }
        res = tunnel_to_origin => {
            let bytes = res?;
            tracing::debug!(bytes_to_origin = bytes, "Tunnel peer closed bridge");
            BridgeEnd::Tunnel
        }
        _ = lifetime.cancelled() => {
            tracing::debug!("Bridge cancelled");
            BridgeEnd::Cancelled
        }
    };

    Ok(end)
}

/// Copies `reader` into `writer`, flushing after every read so each chunk is
/// delivered as its own unit.
async fn copy_flushing<R, W>(reader: &mut R, writer: &mut W) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            return Ok(total);
        }
        writer.write_all(&buffer[..n]).await?;
        writer.flush().await?;
        total += n as u64;
    }
}
