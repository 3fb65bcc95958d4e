//! TURN service lifecycle
//!
//! The service owns one UDP socket and one TCP listener on the
//! configured port; both bind or `start` fails with nothing left
//! running. The UDP socket feeds the `turn` server with a static
//! relay-address generator pointed at the configured public IP. The
//! TURN library relays over UDP; the TCP listener reserves the port so
//! bind conflicts surface at start, and simply drops accepted
//! connections.
//!
//! Lifecycle is a strict `stopped → starting → running → stopping →
//! stopped` machine; transitions happen under one async mutex so
//! callers never observe an intermediate state.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use turn::allocation::AllocationInfo;
use turn::auth::{generate_auth_key, AuthHandler};
use turn::relay::relay_static::RelayAddressGeneratorStatic;
use turn::server::config::{ConnConfig, ServerConfig};
use turn::server::Server;
use turn::Error as TurnLibError;
use util::vnet::net::Net;

use crate::stats::{TurnStats, TurnStatsSnapshot};

/// TURN service configuration.
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Listen port for both UDP and TCP (default 3478).
    pub port: u16,
    /// The single allowed long-term-credential user.
    pub username: String,
    pub password: String,
    pub realm: String,
    /// External-facing relay address; must be the public IP in a real
    /// deployment. Also used as the host in the published descriptor.
    pub public_ip: IpAddr,
}

/// The ICE server entry a client pastes into its configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnDescriptor {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

/// Lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        })
    }
}

/// TURN service errors
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("TURN service is already running")]
    AlreadyRunning,
    #[error("TURN service is not running")]
    NotRunning,
    #[error("failed to bind TURN listeners on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("TURN library error: {0}")]
    Library(#[from] TurnLibError),
}

/// Answers long-term-credential requests from the static config.
struct ConfigAuthHandler {
    username: String,
    realm: String,
    /// MD5 long-term key for the configured user, precomputed.
    key: Vec<u8>,
    stats: Arc<TurnStats>,
}

impl AuthHandler for ConfigAuthHandler {
    fn auth_handle(
        &self,
        username: &str,
        realm: &str,
        src_addr: SocketAddr,
    ) -> Result<Vec<u8>, TurnLibError> {
        if username == self.username && realm == self.realm {
            debug!(%username, %src_addr, "TURN auth accepted");
            self.stats.record_auth_success();
            Ok(self.key.clone())
        } else {
            warn!(%username, %realm, %src_addr, "TURN auth rejected");
            Err(TurnLibError::ErrFakeErr)
        }
    }
}

struct RunningServer {
    server: Server,
    tcp_task: JoinHandle<()>,
}

struct Inner {
    state: TurnState,
    running: Option<RunningServer>,
}

/// The embedded TURN relay.
pub struct TurnService {
    config: TurnConfig,
    stats: Arc<TurnStats>,
    inner: Mutex<Inner>,
}

impl TurnService {
    pub fn new(config: TurnConfig) -> Self {
        TurnService {
            config,
            stats: Arc::new(TurnStats::new()),
            inner: Mutex::new(Inner {
                state: TurnState::Stopped,
                running: None,
            }),
        }
    }

    pub fn config(&self) -> &TurnConfig {
        &self.config
    }

    /// Bind listeners and launch the TURN server.
    ///
    /// Fails with `AlreadyRunning` unless stopped; a bind or library
    /// failure leaves the service fully stopped (no partial start).
    pub async fn start(&self) -> Result<(), TurnError> {
        let mut inner = self.inner.lock().await;
        if inner.state != TurnState::Stopped {
            return Err(TurnError::AlreadyRunning);
        }
        inner.state = TurnState::Starting;

        match self.launch().await {
            Ok(running) => {
                inner.running = Some(running);
                inner.state = TurnState::Running;
                info!(port = self.config.port, realm = %self.config.realm, "TURN service running");
                Ok(())
            }
            Err(err) => {
                inner.state = TurnState::Stopped;
                Err(err)
            }
        }
    }

    /// Stop the server and release both listeners.
    pub async fn stop(&self) -> Result<(), TurnError> {
        let mut inner = self.inner.lock().await;
        if inner.state != TurnState::Running {
            return Err(TurnError::NotRunning);
        }
        inner.state = TurnState::Stopping;

        if let Some(running) = inner.running.take() {
            if let Err(err) = running.server.close().await {
                warn!(%err, "TURN server close reported an error");
            }
            running.tcp_task.abort();
        }
        inner.state = TurnState::Stopped;
        info!("TURN service stopped");
        Ok(())
    }

    /// Current lifecycle state.
    pub async fn lifecycle(&self) -> TurnState {
        self.inner.lock().await.state
    }

    /// Counter snapshot; available in every state.
    pub fn stats(&self) -> TurnStatsSnapshot {
        self.stats.snapshot()
    }

    /// The client descriptor, available only while running.
    pub async fn descriptor(&self) -> Option<TurnDescriptor> {
        let inner = self.inner.lock().await;
        if inner.state != TurnState::Running {
            return None;
        }
        Some(TurnDescriptor {
            urls: vec![format!("turn:{}:{}", self.config.public_ip, self.config.port)],
            username: self.config.username.clone(),
            credential: self.config.password.clone(),
        })
    }

    async fn launch(&self) -> Result<RunningServer, TurnError> {
        let port = self.config.port;
        let bind_addr = format!("0.0.0.0:{port}");

        let udp = UdpSocket::bind(&bind_addr)
            .await
            .map_err(|source| TurnError::Bind { port, source })?;
        // Bound UDP socket is dropped if this fails: all or nothing
        let tcp = TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| TurnError::Bind { port, source })?;

        let key = generate_auth_key(
            &self.config.username,
            &self.config.realm,
            &self.config.password,
        );

        // Allocation-close notifications decrement the active counter
        let (release_tx, mut release_rx) = mpsc::channel::<AllocationInfo>(16);
        let release_stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            // Ends when the server drops its sender on close
            while let Some(alloc) = release_rx.recv().await {
                release_stats.record_release(alloc.relayed_bytes as u64);
            }
        });

        let server = Server::new(ServerConfig {
            conn_configs: vec![ConnConfig {
                conn: Arc::new(udp),
                relay_addr_generator: Box::new(RelayAddressGeneratorStatic {
                    relay_address: self.config.public_ip,
                    address: "0.0.0.0".to_owned(),
                    net: Arc::new(Net::new(None)),
                }),
            }],
            realm: self.config.realm.clone(),
            auth_handler: Arc::new(ConfigAuthHandler {
                username: self.config.username.clone(),
                realm: self.config.realm.clone(),
                key,
                stats: Arc::clone(&self.stats),
            }),
            channel_bind_timeout: Duration::from_secs(0),
            alloc_close_notify: Some(release_tx),
        })
        .await?;

        let tcp_task = tokio::spawn(async move {
            loop {
                match tcp.accept().await {
                    Ok((_stream, addr)) => {
                        debug!(%addr, "dropping TURN TCP connection (relaying is UDP)");
                    }
                    Err(err) => {
                        debug!(%err, "TURN TCP accept failed");
                        break;
                    }
                }
            }
        });

        Ok(RunningServer { server, tcp_task })
    }
}
