//! # Connection Handler Module
//!
//! Per-connection state machine: ROUTING → PROXYING → CLOSED, or
//! ROUTING → CLOSED on failure.
//!
//! Routing takes one point-in-time snapshot of the service map and walks it
//! round-robin from a rotation counter shared per protocol key, dialing each
//! candidate at most once under a bounded timeout. Proxying runs the two
//! forwarding directions as independent tasks so a stalled reader on one side
//! never blocks draining of the other; a half-close on one side propagates as
//! a half-close on the other, while a mid-stream error cancels both
//! directions through a shared token.

use metrics::{counter, gauge};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{ConnectionState, ServiceEntry};
use crate::discovery::service_map::ServiceMap;
use crate::load_balancing::balancer::RoundRobinBalancer;

static ACTIVE_CONNECTIONS: AtomicI64 = AtomicI64::new(0);

/// Shared routing context for every connection of one protocol gateway
pub struct ConnectionContext {
    pub protocol: String,
    pub service_map: Arc<ServiceMap>,
    pub balancer: Arc<RoundRobinBalancer>,
    pub connect_timeout: Duration,
}

/// Handles one accepted client connection to completion
pub struct ConnectionHandler {
    id: Uuid,
    context: Arc<ConnectionContext>,
    peer: SocketAddr,
    shutdown: CancellationToken,
    state: ConnectionState,
}

impl ConnectionHandler {
    pub fn new(
        context: Arc<ConnectionContext>,
        peer: SocketAddr,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            context,
            peer,
            shutdown,
            state: ConnectionState::Routing,
        }
    }

    /// Drive the connection through routing and proxying
    ///
    /// All failures end here: routing errors are reported per connection and
    /// proxy errors are logged at low severity, because client disconnects
    /// are routine. Nothing propagates past this task.
    pub async fn run(mut self, client: TcpStream) {
        let active = ACTIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed) + 1;
        gauge!("gateway_active_connections").set(active as f64);

        let shutdown = self.shutdown.clone();
        let result = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(connection_id = %self.id, "Gateway destroyed; dropping connection");
                Ok(())
            }
            result = self.route_and_proxy(client) => result,
        };

        if let Err(e) = result {
            counter!("gateway_connections_failed").increment(1);
            warn!(
                connection_id = %self.id,
                protocol = %self.context.protocol,
                peer = %self.peer,
                error = %e,
                "Connection failed"
            );
        }

        self.state = ConnectionState::Closed;
        let active = ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed) - 1;
        gauge!("gateway_active_connections").set(active as f64);
    }

    async fn route_and_proxy(&mut self, client: TcpStream) -> GatewayResult<()> {
        let (backend, entry) = self.route().await?;

        self.state = ConnectionState::Proxying;
        debug!(
            connection_id = %self.id,
            state = %self.state,
            protocol = %self.context.protocol,
            peer = %self.peer,
            backend = %entry,
            "Proxying connection"
        );

        proxy_pair(client, backend, self.shutdown.clone(), self.id).await;
        Ok(())
    }

    /// ROUTING: snapshot, round-robin walk, dial with bounded timeout
    ///
    /// An empty snapshot fails the connection immediately, without waiting
    /// for discovery to populate. Each snapshot entry is dialed at most once;
    /// exhausting the snapshot fails the connection.
    async fn route(&mut self) -> GatewayResult<(TcpStream, ServiceEntry)> {
        let snapshot = self.context.service_map.snapshot(&self.context.protocol);

        let start = self
            .context
            .balancer
            .next_index(&self.context.protocol, snapshot.len())
            .ok_or_else(|| {
                GatewayError::routing(self.context.protocol.clone(), "no backend available")
            })?;

        for attempt in 0..snapshot.len() {
            let entry = &snapshot[(start + attempt) % snapshot.len()];

            match timeout(
                self.context.connect_timeout,
                TcpStream::connect(&entry.address),
            )
            .await
            {
                Ok(Ok(stream)) => return Ok((stream, entry.clone())),
                Ok(Err(e)) => {
                    counter!("gateway_dial_failures").increment(1);
                    debug!(
                        connection_id = %self.id,
                        backend = %entry,
                        error = %e,
                        "Backend dial failed; trying next snapshot entry"
                    );
                }
                Err(_) => {
                    counter!("gateway_dial_failures").increment(1);
                    debug!(
                        connection_id = %self.id,
                        backend = %entry,
                        timeout = ?self.context.connect_timeout,
                        "Backend dial timed out; trying next snapshot entry"
                    );
                }
            }
        }

        Err(GatewayError::routing(
            self.context.protocol.clone(),
            format!("all {} backend dial attempts failed", snapshot.len()),
        ))
    }
}

/// PROXYING: forward bytes concurrently and independently in both directions
///
/// Byte-stream transparent: no framing, no buffering beyond the copy buffer,
/// per-direction ordering and exact content preserved. Returns once both
/// directions have finished or the pair was torn down.
async fn proxy_pair(
    client: TcpStream,
    backend: TcpStream,
    teardown: CancellationToken,
    connection_id: Uuid,
) {
    let (client_read, client_write) = client.into_split();
    let (backend_read, backend_write) = backend.into_split();

    let upstream = tokio::spawn(forward(
        client_read,
        backend_write,
        teardown.clone(),
        "client->backend",
    ));
    let downstream = tokio::spawn(forward(
        backend_read,
        client_write,
        teardown.clone(),
        "backend->client",
    ));

    let (sent, received) = match tokio::join!(upstream, downstream) {
        (Ok(sent), Ok(received)) => (sent, received),
        _ => (0, 0),
    };

    debug!(
        connection_id = %connection_id,
        bytes_sent = sent,
        bytes_received = received,
        "Connection closed"
    );
}

/// Forward one direction until end-of-stream, error, or teardown
///
/// End-of-stream propagates the half-close by shutting down the peer's write
/// half and leaves the other direction running. An I/O error cancels the
/// shared token, tearing down the pair; errors here are logged only, never
/// re-raised, since either endpoint hanging up mid-stream is routine.
async fn forward(
    mut read: OwnedReadHalf,
    mut write: OwnedWriteHalf,
    teardown: CancellationToken,
    direction: &'static str,
) -> u64 {
    tokio::select! {
        _ = teardown.cancelled() => 0,
        copied = tokio::io::copy(&mut read, &mut write) => match copied {
            Ok(bytes) => {
                if let Err(e) = write.shutdown().await {
                    debug!(direction = direction, error = %e, "Half-close propagation failed");
                }
                bytes
            }
            Err(e) => {
                debug!(direction = direction, error = %e, "Forwarding ended with error");
                teardown.cancel();
                0
            }
        }
    }
}
