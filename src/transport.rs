//! Framed TCP transport to MDS nodes.
//!
//! Each call writes one request frame and reads one reply frame. A frame is
//! a 4-byte big-endian length followed by that many bytes of JSON. Requests
//! carry an [`RpcFrame`] envelope naming the method; replies are the bare
//! response body.
//!
//! Any I/O or decode failure marks the channel broken, and the pool drops
//! broken channels instead of reusing them.

use crate::error::{CmdError, Result};
use crate::messages::RpcMethod;
use crate::pool::Connector;
use crate::resilience::with_timeout;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

/// Largest frame either side will accept.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcFrame {
    pub method: String,
    pub body: serde_json::Value,
}

/// Read one length-prefixed frame.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;
    let length = u32::from_be_bytes(header) as usize;

    if length > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", length),
        ));
    }

    let mut data = vec![0u8; length];
    reader.read_exact(&mut data).await?;
    Ok(data)
}

/// Write one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, data: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if data.len() > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds limit", data.len()),
        ));
    }
    writer.write_all(&(data.len() as u32).to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// An open connection to one MDS node.
#[derive(Debug)]
pub struct MdsChannel {
    addr: String,
    stream: TcpStream,
    broken: bool,
}

impl MdsChannel {
    pub fn new(addr: impl Into<String>, stream: TcpStream) -> Self {
        Self {
            addr: addr.into(),
            stream,
            broken: false,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Send `request` and wait for its reply. Failures are rpc-transport
    /// errors; the reply's own status is left to the caller.
    pub async fn call<M: RpcMethod>(&mut self, request: &M) -> Result<M::Response> {
        let result = self.round_trip(request).await;
        if result.is_err() {
            self.broken = true;
        }
        result
    }

    async fn round_trip<M: RpcMethod>(&mut self, request: &M) -> Result<M::Response> {
        let frame = RpcFrame {
            method: M::NAME.to_string(),
            body: serde_json::to_value(request)?,
        };
        let bytes = serde_json::to_vec(&frame)?;

        trace!(addr = %self.addr, method = M::NAME, len = bytes.len(), "Sending frame");
        write_frame(&mut self.stream, &bytes)
            .await
            .map_err(|e| CmdError::rpc_transport(&self.addr, e))?;

        let reply = read_frame(&mut self.stream)
            .await
            .map_err(|e| CmdError::rpc_transport(&self.addr, e))?;

        serde_json::from_slice(&reply).map_err(|e| {
            CmdError::rpc_transport(&self.addr, format!("malformed {} reply: {}", M::NAME, e))
        })
    }
}

/// Dials [`MdsChannel`]s over TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Conn = MdsChannel;

    async fn connect(&self, addr: &str, timeout: Duration) -> Result<MdsChannel> {
        let stream = with_timeout(timeout, addr, TcpStream::connect(addr))
            .await?
            .map_err(|e| CmdError::rpc_transport(addr, e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| CmdError::rpc_transport(addr, e))?;
        Ok(MdsChannel::new(addr, stream))
    }

    fn is_reusable(&self, conn: &MdsChannel) -> bool {
        !conn.is_broken()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CODE_RPC;
    use crate::messages::{ListMdsRequest, ListMdsResponse};
    use crate::status::TopoStatus;
    use crate::types::MdsNode;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_frame_limit_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes());
        let err = read_frame(&mut buf.as_slice()).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_call_over_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_frame(&mut stream).await.unwrap();
            let frame: RpcFrame = serde_json::from_slice(&request).unwrap();
            assert_eq!(frame.method, "ListMds");
            let reply = ListMdsResponse {
                status: TopoStatus::Ok,
                nodes: vec![MdsNode::new(1, "127.0.0.1:6700")],
            };
            write_frame(&mut stream, &serde_json::to_vec(&reply).unwrap())
                .await
                .unwrap();
        });

        let mut channel = TcpConnector
            .connect(&addr, Duration::from_secs(1))
            .await
            .unwrap();
        let reply = channel.call(&ListMdsRequest::default()).await.unwrap();
        assert_eq!(reply.nodes.len(), 1);
        assert!(TcpConnector.is_reusable(&channel));
    }

    #[tokio::test]
    async fn test_peer_hangup_breaks_channel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let mut channel = TcpConnector
            .connect(&addr, Duration::from_secs(1))
            .await
            .unwrap();
        let err = channel.call(&ListMdsRequest::default()).await.unwrap_err();
        assert_eq!(err.code(), CODE_RPC);
        assert!(channel.is_broken());
        assert!(!TcpConnector.is_reusable(&channel));
    }
}
