//! Server network layer handling TCP connections and loop coordination

use crate::config::ServerConfig;
use crate::dispatcher::{dispatch, peer_closed};
use crate::error::{Result, ServerError};
use crate::events::{EventReceiver, EventSender};
use crate::reaper::reap;
use crate::registry::{Link, SessionId, SessionRegistry};
use log::{debug, error, info, warn};
use shared::{greeting, MAX_MESSAGE_SIZE};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

/// Connections accepted but not yet admitted by the loop
const ACCEPT_BACKLOG: usize = 16;

/// How long shutdown waits for each session to flush its queue
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Messages sent from connection tasks to the server loop
#[derive(Debug)]
pub enum ServerMessage {
    Received { id: SessionId, payload: Vec<u8> },
    Closed { id: SessionId },
    Shutdown,
}

#[derive(Debug)]
struct Incoming {
    stream: TcpStream,
    addr: SocketAddr,
}

/// Cloneable quit signal for a running server
#[derive(Debug, Clone)]
pub struct ServerHandle {
    server_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ServerHandle {
    /// Asks the server loop to stop. The loop closes every session and the
    /// listening socket before `run` returns.
    pub fn shutdown(&self) {
        if self.server_tx.send(ServerMessage::Shutdown).is_err() {
            debug!("Server already stopped");
        }
    }
}

/// Main server owning the listener and every session
///
/// All session state lives here and is only touched from the loop in
/// [`Server::run`]; connection tasks talk to it through channels.
pub struct Server {
    config: ServerConfig,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    registry: SessionRegistry,
    events: EventSender,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    /// Binds the listening socket.
    ///
    /// Returns the server together with the receiving end of its game event
    /// channel.
    pub async fn bind(config: ServerConfig) -> Result<(Self, EventReceiver)> {
        let addr = config.address();
        let bind_error = |source: std::io::Error| ServerError::Bind {
            addr: addr.clone(),
            source,
        };

        let listener = TcpListener::bind(&addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        info!("Server listening on {}", local_addr);

        let (events, event_rx) = EventSender::channel();
        let (server_tx, server_rx) = mpsc::unbounded_channel();

        let server = Server {
            registry: SessionRegistry::new(config.max_sessions),
            config,
            listener: Some(listener),
            local_addr,
            events,
            server_tx,
            server_rx,
        };

        Ok((server, event_rx))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            server_tx: self.server_tx.clone(),
        }
    }

    /// Spawns task that accepts connections and queues them for admission
    fn spawn_acceptor(listener: TcpListener) -> (JoinHandle<()>, mpsc::Receiver<Incoming>) {
        let (incoming_tx, incoming_rx) = mpsc::channel(ACCEPT_BACKLOG);

        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        if incoming_tx.send(Incoming { stream, addr }).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });

        (handle, incoming_rx)
    }

    /// Registers an accepted connection and greets it
    ///
    /// Connections beyond capacity are closed straight away without a
    /// payload.
    fn admit(&mut self, incoming: Incoming) {
        let Incoming { stream, addr } = incoming;
        let server_tx = self.server_tx.clone();
        let queue = self.config.outbound_queue;
        let write_timeout = self.config.write_timeout;

        let admitted = self.registry.accept(addr, move |id| {
            spawn_connection(id, stream, server_tx, queue, write_timeout)
        });

        match admitted {
            Ok(id) => {
                if let Err(e) = self.registry.send_to(id, &greeting(id)) {
                    warn!("Failed to greet session {}: {}", id, e);
                }
            }
            Err(e) => warn!("Refused connection from {}: {}", addr, e),
        }
    }

    /// Handles messages queued since the last tick, up to
    /// `max_messages_per_tick` of them
    ///
    /// Returns false once a shutdown was requested.
    fn dispatch_pending(&mut self) -> bool {
        for _ in 0..self.config.max_messages_per_tick {
            let Ok(message) = self.server_rx.try_recv() else {
                break;
            };

            match message {
                ServerMessage::Received { id, payload } => {
                    match dispatch(&mut self.registry, &self.events, id, &payload) {
                        Ok(_) => {}
                        Err(ServerError::Decode(e)) => {
                            warn!("Dropped message from session {}: {}", id, e);
                        }
                        Err(e) => warn!("Error handling message from session {}: {}", id, e),
                    }
                }
                ServerMessage::Closed { id } => {
                    if peer_closed(&mut self.registry, id) {
                        info!("Session {} closed by peer", id);
                    }
                }
                ServerMessage::Shutdown => {
                    info!("Server shutting down");
                    return false;
                }
            }
        }

        true
    }

    /// Main server loop: accept, dispatch, reap, once per tick
    pub async fn run(mut self) -> Result<()> {
        let Some(listener) = self.listener.take() else {
            return Ok(());
        };
        let (acceptor, mut incoming_rx) = Self::spawn_acceptor(listener);

        let mut tick_interval = interval(self.config.tick);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Server started successfully");

        loop {
            tick_interval.tick().await;

            match incoming_rx.try_recv() {
                Ok(incoming) => self.admit(incoming),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    error!("Listener stopped unexpectedly");
                    break;
                }
            }

            if !self.dispatch_pending() {
                break;
            }

            reap(&mut self.registry, Instant::now(), self.config.idle_timeout);
        }

        self.close(acceptor).await;
        Ok(())
    }

    async fn close(&mut self, acceptor: JoinHandle<()>) {
        acceptor.abort();
        let _ = acceptor.await;

        for writer in self.registry.close_all() {
            let abort = writer.abort_handle();
            if timeout(SHUTDOWN_GRACE, writer).await.is_err() {
                abort.abort();
            }
        }

        info!("Server stopped");
    }
}

/// Splits `stream` into reader and writer tasks bound to session `id`
fn spawn_connection(
    id: SessionId,
    stream: TcpStream,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    queue: usize,
    write_timeout: Duration,
) -> Link {
    let (read_half, write_half) = stream.into_split();
    let (outbound_tx, outbound_rx) = mpsc::channel(queue);

    let reader = tokio::spawn(read_loop(id, read_half, server_tx));
    let writer = tokio::spawn(write_loop(id, write_half, outbound_rx, write_timeout));

    Link::with_tasks(outbound_tx, reader.abort_handle(), writer)
}

/// Forwards each read, at most [`MAX_MESSAGE_SIZE`] bytes, as one message
async fn read_loop(
    id: SessionId,
    mut reader: OwnedReadHalf,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) {
    let mut buffer = [0u8; MAX_MESSAGE_SIZE];

    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(len) => {
                let payload = buffer[..len].to_vec();
                if server_tx
                    .send(ServerMessage::Received { id, payload })
                    .is_err()
                {
                    return;
                }
            }
            Err(e) => {
                debug!("Error reading from session {}: {}", id, e);
                break;
            }
        }
    }

    let _ = server_tx.send(ServerMessage::Closed { id });
}

/// Writes queued payloads until the queue closes
///
/// A write stuck for longer than `write_timeout` ends the task, which drops the
/// write half. Further sends to the session then fail and the reaper evicts it.
async fn write_loop(
    id: SessionId,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    write_timeout: Duration,
) {
    while let Some(payload) = outbound.recv().await {
        match timeout(write_timeout, writer.write_all(&payload)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Error writing to session {}: {}", id, e);
                return;
            }
            Err(_) => {
                warn!("Session {} stopped reading, dropping its connection", id);
                return;
            }
        }
    }

    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn loopback_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_bind_reports_local_addr() {
        let (server, _events) = Server::bind(loopback_config()).await.unwrap();

        assert_eq!(server.local_addr().ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let (server, _events) = Server::bind(loopback_config()).await.unwrap();
        let taken = ServerConfig {
            port: server.local_addr().port(),
            ..loopback_config()
        };

        let result = Server::bind(taken).await;

        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_shutdown_stops_run() {
        let (server, _events) = Server::bind(loopback_config()).await.unwrap();
        let handle = server.handle();

        let running = tokio::spawn(server.run());
        handle.shutdown();

        let result = timeout(Duration::from_secs(2), running).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }

    #[tokio::test]
    async fn test_shutdown_after_stop_is_harmless() {
        let (server, _events) = Server::bind(loopback_config()).await.unwrap();
        let handle = server.handle();
        drop(server);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_dispatch_is_bounded_per_tick() {
        let config = ServerConfig {
            max_messages_per_tick: 4,
            ..loopback_config()
        };
        let (mut server, _events) = Server::bind(config).await.unwrap();

        for _ in 0..10 {
            let message = ServerMessage::Received {
                id: 99,
                payload: b"1".to_vec(),
            };
            server.server_tx.send(message).unwrap();
        }

        assert!(server.dispatch_pending());

        let mut left = 0;
        while server.server_rx.try_recv().is_ok() {
            left += 1;
        }
        assert_eq!(left, 6);
    }

    #[tokio::test]
    async fn test_writer_gives_up_on_peer_that_never_reads() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let (_read_half, write_half) = stream.into_split();

        let (tx, rx) = mpsc::channel(4);
        let writer = tokio::spawn(write_loop(0, write_half, rx, Duration::from_millis(200)));

        // queue until the peer's socket buffers are full and the queue backs up
        let payload = vec![b'1'; MAX_MESSAGE_SIZE];
        let mut backed_up = false;
        for _ in 0..100_000 {
            if tx.try_send(payload.clone()).is_err() {
                backed_up = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(backed_up);
        drop(tx);

        let finished = timeout(Duration::from_secs(3), writer).await;
        assert!(finished.is_ok(), "writer still blocked on a stalled peer");
        drop(peer);
    }

    #[test]
    fn test_server_message_creation() {
        let msg = ServerMessage::Received {
            id: 3,
            payload: b"1".to_vec(),
        };

        match msg {
            ServerMessage::Received { id, payload } => {
                assert_eq!(id, 3);
                assert_eq!(payload, b"1".to_vec());
            }
            _ => panic!("Unexpected message type"),
        }
    }
}
