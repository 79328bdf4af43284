use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use madns_common::Transport;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::{TcpStream, UdpSocket};

use crate::MAX_UDP_MSG_SIZE;

/// An enum that abstracts the underlying connection, used both for clients and upstream servers
pub enum Connection<U: AsyncUdpSocket> {
    Tcp(TcpStream),
    /// A socket with an explicit peer address, or a connected socket if the address is missing
    Udp((U, Option<SocketAddr>)),
}

pub trait AsyncUdpSocket {
    fn send(&self, buf: &[u8]) -> impl Future<Output = std::io::Result<usize>> + Send;
    fn send_to(
        &self,
        buf: &[u8],
        target: SocketAddr,
    ) -> impl Future<Output = std::io::Result<usize>> + Send;
    fn recv(&self, buf: &mut [u8]) -> impl Future<Output = std::io::Result<usize>> + Send;
    fn peer_addr(&self) -> anyhow::Result<SocketAddr>;
}

impl AsyncUdpSocket for UdpSocket {
    async fn send(&self, buf: &[u8]) -> std::io::Result<usize> {
        self.send(buf).await
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> std::io::Result<usize> {
        self.send_to(buf, target).await
    }

    async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.recv(buf).await
    }

    fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        self.peer_addr().context("error while getting peer's addr")
    }
}

impl AsyncUdpSocket for Arc<UdpSocket> {
    async fn send(&self, buf: &[u8]) -> std::io::Result<usize> {
        self.as_ref().send(buf).await
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> std::io::Result<usize> {
        self.as_ref().send_to(buf, target).await
    }

    async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.as_ref().recv(buf).await
    }

    fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        self.as_ref()
            .peer_addr()
            .context("error while getting peer's addr")
    }
}

impl<U: AsyncUdpSocket> Connection<U> {
    pub async fn send_encoded_packet(&mut self, src: &[u8]) -> anyhow::Result<()> {
        match self {
            Connection::Tcp(socket) => {
                let length = u16::try_from(src.len())
                    .context("TCP: DNS message doesn't fit into a length prefix")?
                    .to_be_bytes();
                socket
                    .write_all(&length)
                    .await
                    .context("TCP: error while sending packet's length")?;
                socket
                    .write_all(src)
                    .await
                    .context("TCP: error while sending a DNS packet")?;
            }
            Connection::Udp((socket, addr)) => {
                if let Some(addr) = addr {
                    socket
                        .send_to(src, *addr)
                        .await
                        .with_context(|| format!("UDP: error while sending a DNS packet to {}", addr))?;
                } else {
                    socket
                        .send(src)
                        .await
                        .context("UDP: error while sending a DNS packet")?;
                }
            }
        };

        Ok(())
    }

    /// Reads a single DNS message.
    ///
    /// Returns `None` if a TCP peer closed the connection before sending a new message.
    pub async fn read(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        let packet = match self {
            Connection::Tcp(socket) => {
                let length = match socket.read_u16().await {
                    Ok(length) => length as usize,
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
                    Err(e) => {
                        return Err(e).context("TCP: error while reading packet's length");
                    }
                };
                let mut dst = vec![0; length];
                socket
                    .read_exact(&mut dst)
                    .await
                    .context("TCP: error while reading a packet")?;
                dst
            }
            Connection::Udp((socket, _)) => {
                let mut dst = vec![0; MAX_UDP_MSG_SIZE];
                let length = socket
                    .recv(&mut dst)
                    .await
                    .context("UDP: error while reading a packet")?;
                dst.truncate(length);
                dst
            }
        };

        Ok(Some(packet))
    }

    pub fn get_peer_addr(&self) -> anyhow::Result<SocketAddr> {
        match self {
            Connection::Tcp(socket) => socket
                .peer_addr()
                .context("bug: TCP socket is not connected?"),
            Connection::Udp((socket, addr)) => addr
                .or_else(|| socket.peer_addr().ok())
                .context("bug: UDP socket is not connected and explicit addr is missing?"),
        }
    }

    pub fn transport(&self) -> Transport {
        match self {
            Connection::Tcp(_) => Transport::Tcp,
            Connection::Udp(_) => Transport::Udp,
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn tcp_messages_are_length_prefixed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let client = tokio::spawn(async move {
            let mut connection: Connection<UdpSocket> =
                Connection::Tcp(TcpStream::connect(addr).await.expect("connect"));
            connection.send_encoded_packet(b"first").await.expect("send");
            connection.send_encoded_packet(b"second").await.expect("send");
        });

        let (stream, _) = listener.accept().await.expect("accept");
        let mut connection: Connection<UdpSocket> = Connection::Tcp(stream);
        assert_eq!(connection.transport(), Transport::Tcp);

        assert_eq!(connection.read().await.expect("read"), Some(b"first".to_vec()));
        assert_eq!(connection.read().await.expect("read"), Some(b"second".to_vec()));

        client.await.expect("client task");
        assert_eq!(connection.read().await.expect("read"), None);
    }

    #[tokio::test]
    async fn udp_replies_go_to_the_explicit_peer() {
        let server = Arc::new(UdpSocket::bind("127.0.0.1:0").await.expect("bind"));
        let peer = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        let peer_addr = peer.local_addr().expect("local addr");

        let mut connection = Connection::Udp((server, Some(peer_addr)));
        assert_eq!(connection.get_peer_addr().expect("peer addr"), peer_addr);
        assert_eq!(connection.transport(), Transport::Udp);

        connection.send_encoded_packet(b"reply").await.expect("send");

        let mut buf = [0; 16];
        let len = peer.recv(&mut buf).await.expect("recv");
        assert_eq!(&buf[..len], b"reply");
    }
}
