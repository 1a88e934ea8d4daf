//! Local web UI and JSON API for rtools.
//!
//! A small hand-rolled HTTP/1.1 server on a tokio listener: one request per
//! connection, JSON bodies, embedded static assets. Tool runs go through
//! `rtools_core::run_tool`, the same path the CLI uses.

mod assets;
pub mod http;
pub mod routes;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rtools_core::ToolContext;
use rtools_shared::{Result, RtoolsError};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::http::{Response, read_request, write_response};
pub use crate::state::{AppState, LastSummaries};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8765;

/// Time allowed for a client to send its request.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// A bound, not yet running server.
pub struct Server {
    listener: TcpListener,
    state: Arc<AppState>,
}

impl Server {
    pub async fn bind(ctx: ToolContext, addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RtoolsError::Network(format!("could not bind {addr}: {e}")))?;
        Ok(Self {
            listener,
            state: Arc::new(AppState::new(ctx)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| RtoolsError::Network(format!("listener has no address: {e}")))
    }

    /// Accept connections until the task is dropped.
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, &state).await {
                    debug!(%peer, error = %e, "connection error");
                }
            });
        }
    }
}

/// Bind and serve until interrupted.
pub async fn serve(ctx: ToolContext, host: &str, port: u16) -> Result<()> {
    let server = Server::bind(ctx, &format!("{host}:{port}")).await?;
    let addr = server.local_addr()?;
    info!(%addr, "rtools UI listening on http://{addr}/");
    server.run().await
}

async fn handle_connection(mut stream: TcpStream, state: &AppState) -> std::io::Result<()> {
    let request = match tokio::time::timeout(READ_TIMEOUT, read_request(&mut stream)).await {
        Ok(Ok(Some(request))) => request,
        Ok(Ok(None)) => return Ok(()),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
            let response = Response::error(413, &e.to_string());
            return write_response(&mut stream, &response, false).await;
        }
        Ok(Err(e)) => return Err(e),
        Err(_) => return Ok(()),
    };

    let started = std::time::Instant::now();
    let response = routes::route(state, &request).await;
    debug!(
        method = %request.method,
        path = %request.path(),
        status = response.status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    write_response(&mut stream, &response, request.method == "HEAD").await
}
