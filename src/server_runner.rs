//! Listener startup and accept loop
//!
//! Binds the local listener and spawns one session per accepted client.
//! Session failures are logged and contained; the accept loop itself only
//! stops on a fatal listener error.

use std::sync::Arc;

use anyhow::Result;

use crate::auth::MojangAuth;
use crate::config::{CliArgs, ConnConfig};
use crate::logger::log;
use crate::session::ProxySession;
use crate::velocity::VelocityState;

/// Shared state handed to every session
pub struct ProxyServer {
    pub upstream_host: String,
    pub upstream_port: u16,
    pub conn_config: ConnConfig,
    pub velocity: Arc<VelocityState>,
    pub auth: Arc<MojangAuth>,
}

impl ProxyServer {
    pub fn new(cli: &CliArgs, velocity: Arc<VelocityState>, auth: Arc<MojangAuth>) -> Self {
        Self {
            upstream_host: cli.upstream_host.clone(),
            upstream_port: cli.upstream_port,
            conn_config: ConnConfig::from_cli(cli),
            velocity,
            auth,
        }
    }
}

/// Bind the listen socket with SO_REUSEADDR for fast restarts
fn bind_listener(listen_port: u16, backlog: i32) -> Result<tokio::net::TcpListener> {
    let socket_addr: std::net::SocketAddr = ([0, 0, 0, 0], listen_port).into();
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;
    // Allow immediate rebind after restart (skip TIME_WAIT)
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&socket_addr.into())?;
    socket.listen(backlog)?;
    Ok(tokio::net::TcpListener::from_std(socket.into())?)
}

/// Run the accept loop until a fatal listener error
pub async fn run_server(server: Arc<ProxyServer>, listen_port: u16) -> Result<()> {
    let listener = bind_listener(listen_port, server.conn_config.tcp_backlog)?;
    let local_addr = listener.local_addr()?;

    log::info!(
        address = %local_addr,
        upstream = %format!("{}:{}", server.upstream_host, server.upstream_port),
        "Proxy listening, point the client at localhost:{}", listen_port
    );

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let peer_addr = addr.to_string();
                log::connection(&peer_addr, "new");

                let server = Arc::clone(&server);
                tokio::spawn(async move {
                    // Logs "closed" on every exit path, panic included
                    let _guard = scopeguard::guard(peer_addr.clone(), |peer| {
                        log::connection(&peer, "closed");
                    });
                    let session = ProxySession::new(
                        server.upstream_host.clone(),
                        server.upstream_port,
                        server.conn_config,
                        Arc::clone(&server.velocity),
                        Arc::clone(&server.auth),
                        peer_addr.clone(),
                    );
                    if let Err(e) = session.run(stream).await {
                        log::debug!(peer = %peer_addr, error = %e, "Session error");
                    }
                });
            }
            Err(e) => {
                log::error!(error = %e, "Failed to accept connection");
                if e.kind() == std::io::ErrorKind::Other {
                    break;
                }
            }
        }
    }

    Ok(())
}
