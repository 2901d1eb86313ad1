// DNS message exchange with a single resolver.
//
// The resolver logic only needs "send this query to that server, give me
// the reply"; keeping it behind a trait lets tests script resolver replies.

use crate::error::{Error, Result};
use async_trait::async_trait;
use hickory_proto::op::Message;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;

/// Largest UDP reply we accept (EDNS-sized)
const MAX_UDP_REPLY: usize = 4096;

/// One query/response round trip with a resolver
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Send `request` to `server` and return the matching reply
    async fn exchange(
        &self,
        server: SocketAddr,
        request: &Message,
        timeout: Duration,
    ) -> Result<Message>;
}

/// Plain DNS over UDP
#[derive(Debug, Default, Clone, Copy)]
pub struct UdpExchange;

#[async_trait]
impl Exchange for UdpExchange {
    async fn exchange(
        &self,
        server: SocketAddr,
        request: &Message,
        timeout: Duration,
    ) -> Result<Message> {
        let local: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(server).await?;

        let bytes = request
            .to_vec()
            .map_err(|e| Error::resolution(format!("failed to encode query: {e}")))?;

        tokio::time::timeout(timeout, round_trip(&socket, &bytes, request.id()))
            .await
            .map_err(|_| Error::timeout(format!("dns exchange with {server}"), timeout))?
    }
}

async fn round_trip(socket: &UdpSocket, bytes: &[u8], id: u16) -> Result<Message> {
    socket.send(bytes).await?;
    let mut buf = vec![0u8; MAX_UDP_REPLY];
    loop {
        let n = socket.recv(&mut buf).await?;
        let reply = Message::from_vec(&buf[..n])
            .map_err(|e| Error::resolution(format!("malformed reply: {e}")))?;
        // stray datagrams from an earlier, timed-out query
        if reply.id() == id {
            return Ok(reply);
        }
    }
}
