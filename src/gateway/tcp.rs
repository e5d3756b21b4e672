//! # TCP Gateway Module
//!
//! One listening socket per protocol. The gateway treats its protocol as an
//! opaque byte stream: only the protocol name is retained, for service-map
//! addressing and diagnostics. Each accepted connection is delegated to an
//! independent `ConnectionHandler` task, so a stalled or failed handler never
//! blocks acceptance of subsequent connections.
//!
//! ## Rust Concepts Used
//!
//! - `CancellationToken` hierarchies: destroying the gateway cancels the
//!   accept loop and, through child tokens, every in-flight proxy pair
//! - `AtomicU8` encodes the created → running → stopped lifecycle so `init`
//!   happens exactly once and `destroy` is idempotent

use async_trait::async_trait;
use metrics::counter;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::error::{GatewayError, GatewayResult};
use crate::discovery::service_map::ServiceMap;
use crate::gateway::connection::{ConnectionContext, ConnectionHandler};
use crate::load_balancing::balancer::RoundRobinBalancer;

const STATE_CREATED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// A protocol-specific listener
///
/// `init` binds the listening socket and `destroy` closes it; the accessors
/// are immutable after construction.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Bind the listening socket and start accepting connections
    async fn init(&self) -> GatewayResult<()>;

    /// Close the listening socket and cancel in-flight connections
    ///
    /// Idempotent: destroying an already-closed gateway must not fail.
    async fn destroy(&self) -> GatewayResult<()>;

    /// Protocol key this gateway serves
    fn protocol(&self) -> &str;

    /// Configured listening port
    fn port(&self) -> u16;

    /// Configured bind host, if any
    fn host(&self) -> Option<&str>;

    /// Actual bound address once running
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// TCP gateway forwarding one protocol's connections to discovered backends
pub struct TcpGateway {
    protocol: String,
    host: Option<String>,
    port: u16,
    service_map: Arc<ServiceMap>,
    balancer: Arc<RoundRobinBalancer>,
    connect_timeout: Duration,
    state: AtomicU8,
    shutdown: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    bound_addr: Mutex<Option<SocketAddr>>,
}

impl TcpGateway {
    pub fn new(
        protocol: impl Into<String>,
        host: Option<String>,
        port: u16,
        service_map: Arc<ServiceMap>,
        balancer: Arc<RoundRobinBalancer>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            host,
            port,
            service_map,
            balancer,
            connect_timeout,
            state: AtomicU8::new(STATE_CREATED),
            shutdown: CancellationToken::new(),
            accept_task: Mutex::new(None),
            bound_addr: Mutex::new(None),
        }
    }

    fn bind_addr(&self) -> String {
        match &self.host {
            Some(host) => format!("{}:{}", host, self.port),
            None => format!("0.0.0.0:{}", self.port),
        }
    }
}

impl std::fmt::Debug for TcpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpGateway")
            .field("protocol", &self.protocol)
            .field("port", &self.port)
            .field("host", &self.host)
            .finish()
    }
}

#[async_trait]
impl Gateway for TcpGateway {
    async fn init(&self) -> GatewayResult<()> {
        let addr = self.bind_addr();

        if self
            .state
            .compare_exchange(
                STATE_CREATED,
                STATE_RUNNING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(GatewayError::bind(
                self.protocol.clone(),
                addr,
                "gateway already initialized",
            ));
        }

        // An occupied port fails immediately; it is reported, not retried.
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            self.state.store(STATE_STOPPED, Ordering::SeqCst);
            GatewayError::bind(self.protocol.clone(), addr.clone(), e.to_string())
        })?;

        let local_addr = listener.local_addr()?;
        *self.bound_addr.lock() = Some(local_addr);
        info!(
            protocol = %self.protocol,
            addr = %local_addr,
            "Listening for protocol connections"
        );

        let context = Arc::new(ConnectionContext {
            protocol: self.protocol.clone(),
            service_map: self.service_map.clone(),
            balancer: self.balancer.clone(),
            connect_timeout: self.connect_timeout,
        });
        let shutdown = self.shutdown.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            counter!("gateway_connections_accepted").increment(1);
                            let handler = ConnectionHandler::new(
                                context.clone(),
                                peer,
                                shutdown.child_token(),
                            );
                            tokio::spawn(handler.run(stream));
                        }
                        Err(e) => {
                            // Transient accept errors (EMFILE, aborted
                            // handshakes) must not stop the loop.
                            warn!(protocol = %context.protocol, error = %e, "Accept failed");
                        }
                    }
                }
            }
            debug!("Accept loop stopped");
        });
        *self.accept_task.lock() = Some(task);

        Ok(())
    }

    async fn destroy(&self) -> GatewayResult<()> {
        let previous = self.state.swap(STATE_STOPPED, Ordering::SeqCst);
        if previous == STATE_STOPPED {
            return Ok(());
        }

        // Cancelling unblocks the pending accept and, via child tokens,
        // unwinds every in-flight proxy pair.
        self.shutdown.cancel();
        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        if previous == STATE_RUNNING {
            info!(protocol = %self.protocol, port = self.port, "Gateway stopped");
        }
        Ok(())
    }

    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.lock()
    }
}
