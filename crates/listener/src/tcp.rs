//! TCP accept loop

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{ListenError, NetworkListener, Result};

const BACKLOG: i32 = 128;

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(100);

/// An accepted inbound connection
#[derive(Debug)]
pub struct Connection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// How long `disconnect` waits for the accept loop before aborting it
    pub stop_grace: Duration,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(1),
        }
    }
}

struct AcceptLoop {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Tokio TCP listener
///
/// Connections are forwarded to the optional sink; without one, or when the
/// sink is full, they are closed immediately.
pub struct TcpNetworkListener {
    options: ListenerOptions,
    sink: Option<mpsc::Sender<Connection>>,
    running: Mutex<Option<AcceptLoop>>,
    accepted: Arc<AtomicU64>,
}

impl TcpNetworkListener {
    pub fn new(options: ListenerOptions) -> Self {
        Self {
            options,
            sink: None,
            running: Mutex::new(None),
            accepted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Forward accepted connections to `sink`
    pub fn with_sink(mut self, sink: mpsc::Sender<Connection>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Bound address while listening
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|l| l.local_addr)
    }

    /// Connections accepted since creation
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    async fn shutdown(&self, accept_loop: AcceptLoop) {
        let AcceptLoop {
            local_addr,
            shutdown_tx,
            mut handle,
        } = accept_loop;
        let _ = shutdown_tx.send(true);

        if tokio::time::timeout(self.options.stop_grace, &mut handle)
            .await
            .is_err()
        {
            warn!(%local_addr, "Accept loop did not stop in time, aborting");
            handle.abort();
            let _ = handle.await;
        }
        info!(%local_addr, "Listener stopped");
    }
}

impl Default for TcpNetworkListener {
    fn default() -> Self {
        Self::new(ListenerOptions::default())
    }
}

#[async_trait]
impl NetworkListener for TcpNetworkListener {
    async fn listen(&self, port: u16, ipv6: bool) -> Result<()> {
        let mut running = self.running.lock().await;
        if let Some(previous) = running.take() {
            debug!(local_addr = %previous.local_addr, "Replacing running accept loop");
            self.shutdown(previous).await;
        }

        let listener = bind(port, ipv6).map_err(|e| classify_bind_error(port, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ListenError::Network(e.to_string()))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(accept_loop(
            listener,
            self.sink.clone(),
            self.accepted.clone(),
            shutdown_rx,
        ));

        info!(%local_addr, ipv6, "Listening");
        *running = Some(AcceptLoop {
            local_addr,
            shutdown_tx,
            handle,
        });
        Ok(())
    }

    async fn disconnect(&self) {
        let previous = self.running.lock().await.take();
        if let Some(previous) = previous {
            self.shutdown(previous).await;
        }
    }

    async fn is_listening(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|l| !l.handle.is_finished())
            .unwrap_or(false)
    }
}

/// Bind all interfaces; IPv6 sockets also accept IPv4-mapped peers
fn bind(port: u16, ipv6: bool) -> io::Result<TcpListener> {
    let (domain, addr) = if ipv6 {
        (Domain::IPV6, SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)))
    } else {
        (Domain::IPV4, SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    if ipv6 {
        socket.set_only_v6(false)?;
    }
    #[cfg(unix)]
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

fn classify_bind_error(port: u16, error: io::Error) -> ListenError {
    match error.kind() {
        io::ErrorKind::AddrInUse => ListenError::AddressInUse(port),
        _ => ListenError::Network(format!("bind port {}: {}", port, error)),
    }
}

async fn accept_loop(
    listener: TcpListener,
    sink: Option<mpsc::Sender<Connection>>,
    accepted: Arc<AtomicU64>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    accepted.fetch_add(1, Ordering::Relaxed);
                    debug!(%peer, "Accepted connection");
                    if let Some(sink) = &sink {
                        if let Err(e) = sink.try_send(Connection { stream, peer }) {
                            debug!(%peer, "Dropping connection: {}", e);
                        }
                    }
                }
                Err(e) => {
                    warn!("Accept error: {}", e);
                    tokio::time::sleep(ACCEPT_ERROR_PAUSE).await;
                }
            },
            _ = shutdown.changed() => break,
        }
    }
}
