//! # Event Loop
//!
//! Runs a [`Server`] over UDP on tokio.
//!
//! ```text
//! socket --recv task--> mpsc (backpressure_limit) --> engine task <-- tick interval
//!                                                          |
//!                                                  try_send_to (socket)
//! ```
//!
//! Exactly one task touches the engine; the receive task only copies
//! datagrams into the channel. When the channel is full, new datagrams are
//! dropped at the receive task.
//!
//! Application payloads received from a client are echoed back to it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::{NetworkConfig, MAX_PACKET_BYTES};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::server::{Server, ServerEvent};
use crate::transport::udp::UdpTransport;

type Datagram = (Vec<u8>, SocketAddr);

/// A started server bound to its UDP socket.
pub struct EventLoop {
    server: Server<UdpTransport>,
    socket: Arc<UdpSocket>,
    tick_interval: Duration,
    backpressure_limit: usize,
}

impl EventLoop {
    /// Validate `config`, build the server and bind its socket.
    ///
    /// Must be called from within a tokio runtime.
    #[instrument(skip(config), fields(address = %config.server.address))]
    pub fn bind(config: &NetworkConfig) -> Result<Self> {
        config.validate_strict()?;

        let mut server = Server::new(config, UdpTransport::new())?;
        server.init()?;
        server.start()?;
        let socket = server.transport().socket().ok_or_else(|| {
            ProtocolError::TransportError(constants::ERR_TRANSPORT_NOT_BOUND.to_string())
        })?;

        Ok(Self {
            server,
            socket,
            tick_interval: config.server.tick_interval,
            backpressure_limit: config.server.backpressure_limit,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }

    pub fn server(&self) -> &Server<UdpTransport> {
        &self.server
    }

    /// Drive the server until `shutdown_rx` fires or is dropped.
    pub async fn run(mut self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<Datagram>(self.backpressure_limit);
        let recv_task = tokio::spawn(receive_datagrams(self.socket.clone(), tx));

        let started = Instant::now();
        let mut ticker = time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutting down server");
                    break;
                }

                datagram = rx.recv() => {
                    match datagram {
                        Some((data, from)) => {
                            self.server.process_packet(&data, from);
                            self.echo_payloads();
                        }
                        None => {
                            error!("Receive task ended unexpectedly");
                            break;
                        }
                    }
                }

                _ = ticker.tick() => {
                    self.server.update(started.elapsed().as_secs_f64());
                    self.drain_events();
                }
            }
        }

        recv_task.abort();
        self.server.stop();
        self.drain_events();
        self.server.metrics().log_metrics();
        Ok(())
    }

    fn echo_payloads(&mut self) {
        let connected: Vec<usize> = self
            .server
            .sessions()
            .slots
            .iter()
            .map(|(index, _)| index)
            .collect();
        for index in connected {
            while let Some(payload) = self.server.receive_payload(index) {
                if let Err(e) = self.server.send_payload(index, &payload) {
                    debug!(slot = index, error = %e, "Failed to echo payload");
                }
            }
        }
    }

    fn drain_events(&mut self) {
        while let Some(event) = self.server.poll_event() {
            match event {
                ServerEvent::ClientConnected {
                    client_index,
                    client_id,
                    address,
                } => info!(slot = client_index, client_id, %address, "Client connected"),
                ServerEvent::ClientDisconnected {
                    client_index,
                    client_id,
                    address,
                    reason,
                } => info!(slot = client_index, client_id, %address, ?reason, "Client disconnected"),
            }
        }
    }
}

async fn receive_datagrams(socket: Arc<UdpSocket>, tx: mpsc::Sender<Datagram>) {
    let mut buf = vec![0u8; MAX_PACKET_BYTES + 1];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, from)) => {
                if n > MAX_PACKET_BYTES {
                    trace!(%from, "Dropping oversized datagram");
                    continue;
                }
                match tx.try_send((buf[..n].to_vec(), from)) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(%from, "Receive queue full, dropping datagram");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => return,
                }
            }
            Err(e) => {
                // ICMP port unreachable surfaces here on some platforms
                debug!(error = %e, "UDP receive error");
            }
        }
    }
}

/// Run a server until CTRL+C.
#[instrument(skip(config))]
pub async fn run(config: NetworkConfig) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    run_with_shutdown(config, shutdown_rx).await
}

/// Run a server with an external shutdown channel.
#[instrument(skip(config, shutdown_rx))]
pub async fn run_with_shutdown(config: NetworkConfig, shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
    let event_loop = EventLoop::bind(&config)?;
    if let Some(addr) = event_loop.local_addr() {
        info!(address = %addr, "Listening for connection requests");
    }
    event_loop.run(shutdown_rx).await
}
