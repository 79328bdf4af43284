use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use hickory_proto::op::{Message, MessageType};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::Instrument;

use crate::connection::AsyncUdpSocket;
use crate::dispatcher::{NetworkExchange, UpstreamExchange};
use crate::notifier::Notifier;
use crate::{Connection, Dispatcher, MAX_UDP_MSG_SIZE};

/// Idle TCP connections are closed after this long
pub const TCP_IDLE_TIMEOUT: Duration = Duration::from_secs(8);

type HandlerResult = anyhow::Result<()>;

pub struct DnsServer<E = NetworkExchange> {
    udp_socket: Arc<UdpSocket>,
    tcp_listener: TcpListener,
    dispatcher: Arc<Dispatcher<E>>,
    notifier: Arc<dyn Notifier>,
}

impl<E> DnsServer<E>
where
    E: UpstreamExchange + Send + Sync + 'static,
{
    /// Binds both listeners to `bind_addr`.
    ///
    /// With port 0 the TCP listener reuses the port picked for UDP.
    pub async fn new(
        bind_addr: SocketAddr,
        dispatcher: Arc<Dispatcher<E>>,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self> {
        let udp_socket = Arc::new(
            UdpSocket::bind(bind_addr)
                .await
                .with_context(|| format!("failed to setup the udp server on {}", bind_addr))?,
        );
        let tcp_addr = udp_socket
            .local_addr()
            .context("error while getting the UDP socket's address")?;
        let tcp_listener = TcpListener::bind(tcp_addr)
            .await
            .with_context(|| format!("failed to setup the tcp server on {}", tcp_addr))?;

        Ok(DnsServer {
            udp_socket,
            tcp_listener,
            dispatcher,
            notifier,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.tcp_listener
            .local_addr()
            .context("error while getting the listener's address")
    }

    /// Serves both transports until one of the listeners fails
    pub async fn block_until_completion(self) -> anyhow::Result<()> {
        tracing::info!(addr = ?self.local_addr().ok(), "serving DNS over tcp and udp");

        let mut listeners: JoinSet<HandlerResult> = JoinSet::new();
        listeners.spawn(
            serve_udp(
                self.udp_socket,
                self.dispatcher.clone(),
                self.notifier.clone(),
            )
            .instrument(tracing::trace_span!("udp")),
        );
        listeners.spawn(
            serve_tcp(self.tcp_listener, self.dispatcher, self.notifier)
                .instrument(tracing::trace_span!("tcp")),
        );

        while let Some(result) = listeners.join_next().await {
            result
                .context("listener task failed to execute")?
                .context("listener failed")?;
        }

        Ok(())
    }
}

async fn serve_udp<E>(
    udp_socket: Arc<UdpSocket>,
    dispatcher: Arc<Dispatcher<E>>,
    notifier: Arc<dyn Notifier>,
) -> HandlerResult
where
    E: UpstreamExchange + Send + Sync + 'static,
{
    let mut recv = vec![0; MAX_UDP_MSG_SIZE];
    let mut handlers: JoinSet<HandlerResult> = JoinSet::new();
    loop {
        tokio::select! {
            result = udp_socket.recv_from(&mut recv) => {
                let (length, from) = match result {
                    Ok(received) => received,
                    Err(e) => {
                        // e.g. ICMP port unreachable reported on the next recv
                        tracing::debug!("UDP: error while receiving a datagram: {}", e);
                        continue;
                    }
                };
                tracing::trace!(%from, "new UDP query");

                let mut connection = Connection::Udp((udp_socket.clone(), Some(from)));
                let packet = recv[..length].to_vec();
                let dispatcher = dispatcher.clone();
                let notifier = notifier.clone();
                handlers.spawn(
                    async move {
                        handle_query(&mut connection, &packet, dispatcher.as_ref(), notifier.as_ref()).await
                    }
                    .in_current_span(),
                );
            }
            Some(result) = handlers.join_next() => {
                log_handler_result(result);
            }
        }
    }
}

async fn serve_tcp<E>(
    tcp_listener: TcpListener,
    dispatcher: Arc<Dispatcher<E>>,
    notifier: Arc<dyn Notifier>,
) -> HandlerResult
where
    E: UpstreamExchange + Send + Sync + 'static,
{
    let mut handlers: JoinSet<HandlerResult> = JoinSet::new();
    loop {
        tokio::select! {
            result = tcp_listener.accept() => {
                let (stream, from) = match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::debug!("TCP: error while accepting a connection: {}", e);
                        continue;
                    }
                };
                tracing::trace!(%from, "new TCP connection");

                handlers.spawn(
                    handle_tcp_connection(stream, dispatcher.clone(), notifier.clone())
                        .in_current_span(),
                );
            }
            Some(result) = handlers.join_next() => {
                log_handler_result(result);
            }
        }
    }
}

/// Answers length-prefixed queries one after another until the client goes away
async fn handle_tcp_connection<E>(
    stream: TcpStream,
    dispatcher: Arc<Dispatcher<E>>,
    notifier: Arc<dyn Notifier>,
) -> HandlerResult
where
    E: UpstreamExchange + Send + Sync + 'static,
{
    let mut connection: Connection<UdpSocket> = Connection::Tcp(stream);
    loop {
        let packet = match timeout(TCP_IDLE_TIMEOUT, connection.read()).await {
            Ok(result) => match result? {
                Some(packet) => packet,
                None => break,
            },
            Err(_) => {
                tracing::trace!("closing an idle TCP connection");
                break;
            }
        };

        handle_query(&mut connection, &packet, dispatcher.as_ref(), notifier.as_ref()).await?;
    }

    Ok(())
}

/// Dispatches one query, writes the reply and only then queues the notifications
async fn handle_query<U, E>(
    connection: &mut Connection<U>,
    packet: &[u8],
    dispatcher: &Dispatcher<E>,
    notifier: &dyn Notifier,
) -> HandlerResult
where
    U: AsyncUdpSocket,
    E: UpstreamExchange,
{
    let request = match Message::from_vec(packet) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!("dropping a malformed DNS message: {}", e);
            return Ok(());
        }
    };
    if request.message_type() == MessageType::Response {
        tracing::debug!(id = request.id(), "dropping an inbound DNS response");
        return Ok(());
    }

    let client = connection.get_peer_addr()?;
    let outcome = dispatcher
        .handle(&request, client, connection.transport())
        .await;

    let encoded = outcome
        .reply
        .encode()
        .context("error while encoding the reply")?;
    if let Err(e) = connection.send_encoded_packet(&encoded).await {
        // Do not propagate the error, as it's per-client and thus recoverable
        tracing::error!("Error while sending a DNS response: {:#}", e)
    };

    for notification in &outcome.notifications {
        notifier.notify(notification);
    }

    Ok(())
}

fn log_handler_result(result: Result<HandlerResult, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!("error while handling a query: {:#}", e),
        Err(e) => tracing::error!("query handling task failed to execute: {}", e),
    }
}
