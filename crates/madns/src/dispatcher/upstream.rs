use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::Context as _;
use hickory_proto::op::Message;
use madns_common::{Transport, DEFAULT_PORT};
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::time::timeout;

use crate::connection::Connection;
use crate::encode_message;

/// Applies to sending (including resolving and connecting) and receiving separately
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(4);
/// Attempts after the first one failed
pub const MAX_RETRIES: usize = 1;

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("failed to forward the request to {upstream} after {attempts} attempts")]
    Exhausted {
        upstream: String,
        attempts: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

/// A single request/response exchange with an upstream server
pub trait UpstreamExchange {
    fn exchange(
        &self,
        request: &Message,
        upstream: &str,
        transport: Transport,
    ) -> impl Future<Output = anyhow::Result<Message>> + Send;
}

/// Exchanges messages over a fresh UDP socket or TCP connection every time
#[derive(Debug, Clone, Copy)]
pub struct NetworkExchange {
    timeout: Duration,
}

impl NetworkExchange {
    pub fn new() -> Self {
        NetworkExchange::with_timeout(UPSTREAM_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        NetworkExchange { timeout }
    }
}

impl Default for NetworkExchange {
    fn default() -> Self {
        NetworkExchange::new()
    }
}

impl UpstreamExchange for NetworkExchange {
    async fn exchange(
        &self,
        request: &Message,
        upstream: &str,
        transport: Transport,
    ) -> anyhow::Result<Message> {
        // Resolving, connecting and sending share the send deadline
        let mut connection = timeout(self.timeout, async {
            let upstream_addr = resolve_upstream(upstream).await?;
            let mut connection = connect(upstream_addr, transport).await?;

            let query = encode_message(request, true)?;
            connection
                .send_encoded_packet(&query)
                .await
                .context("error while forwarding the request")?;

            anyhow::Ok(connection)
        })
        .await
        .context("timed out while forwarding the request")??;

        let raw_response = timeout(self.timeout, connection.read())
            .await
            .context("timed out while waiting for the response")?
            .context("error while reading the response")?
            .context("upstream closed the connection without responding")?;

        let response =
            Message::from_vec(&raw_response).context("error while decoding the response")?;
        if response.id() != request.id() {
            anyhow::bail!(
                "response id {} doesn't match the request id {}",
                response.id(),
                request.id()
            );
        }

        Ok(response)
    }
}

async fn connect(
    upstream_addr: SocketAddr,
    transport: Transport,
) -> anyhow::Result<Connection<UdpSocket>> {
    let connection = match transport {
        Transport::Tcp => Connection::Tcp(
            TcpStream::connect(upstream_addr)
                .await
                .context("TCP: error while connecting to the upstream resolver")?,
        ),
        Transport::Udp => {
            let bind_addr: SocketAddr = if upstream_addr.is_ipv4() {
                ([0, 0, 0, 0], 0).into()
            } else {
                ([0u16; 8], 0).into()
            };
            let socket = UdpSocket::bind(bind_addr)
                .await
                .context("UDP: unable to bind a socket")?;
            socket
                .connect(upstream_addr)
                .await
                .context("UDP: error while connecting to the upstream resolver")?;
            Connection::Udp((socket, None))
        }
    };

    Ok(connection)
}

/// Accepts `host:port`, or a bare IP address which implies port 53
async fn resolve_upstream(upstream: &str) -> anyhow::Result<SocketAddr> {
    if let Ok(ip) = upstream.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    lookup_host(upstream)
        .await
        .with_context(|| format!("unable to resolve the upstream address '{}'", upstream))?
        .next()
        .with_context(|| format!("no addresses found for the upstream '{}'", upstream))
}

/// Forwards `request` upstream over `transport`, retrying once on failure.
pub async fn forward<E: UpstreamExchange>(
    exchange: &E,
    request: &Message,
    upstream: &str,
    transport: Transport,
) -> Result<Message, ForwardError> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match exchange.exchange(request, upstream, transport).await {
            Ok(response) => break Ok(response),
            Err(e) if attempts <= MAX_RETRIES => {
                tracing::debug!(upstream, attempts, "retrying: {:#}", e);
            }
            Err(e) => {
                break Err(ForwardError::Exhausted {
                    upstream: upstream.to_string(),
                    attempts,
                    source: e.into(),
                })
            }
        }
    }
}
