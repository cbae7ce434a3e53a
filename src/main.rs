//! Entry point: parses the CLI surface, wires up the tunnel side (listener
//! registry or dialer) and the control-plane HTTP side, and runs both to
//! completion.
//!
//! Grounded on `original_source/main.go`'s `runServer`/`runClient` split:
//! both modes start a tunnel-side task and an API-side task and exit on
//! whichever finishes first. The local adapter attached to each tunnel is
//! chosen by `--handler`, mirroring `getHandler()`.

mod adapter;
mod config;
mod control;
mod echo;
mod error;
mod httpmsg;
mod logging;
mod pipe;
mod tunnel;
mod wire;

use crate::config::{Cli, Handler, Mode, VERSION};
use crate::tunnel::dialer::Dialer;
use crate::tunnel::registry::Registry;
use crate::tunnel::{TunnelHandle, TunnelSource};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = config::parse();
    logging::setup(cli.log_level);

    log::info!("bitunnel v{VERSION} starting in {:?} mode", cli.mode);

    let target: SocketAddr = match resolve_one(&cli.target) {
        Ok(addr) => addr,
        Err(err) => {
            log::error!("failed to resolve --target {}: {err}", cli.target);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.mode {
        Mode::Server => run_server(&cli, target).await,
        Mode::Client => run_client(&cli, target).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("fatal error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(cli: &Cli, target: SocketAddr) -> Result<(), error::TunnelError> {
    let registry = Registry::new();
    let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), cli.port);

    let handler = cli.handler;
    let on_new_tunnel = move |handle: TunnelHandle| spawn_handler(handle, handler, target);

    let registry_for_listen = registry.clone();
    let tunnel_task = tokio::spawn(async move { registry_for_listen.listen(bind_addr, on_new_tunnel).await });

    let source: Arc<dyn TunnelSource> = Arc::new(registry);
    let api_task = tokio::spawn(run_control_plane(cli.apiport, source));

    race_to_completion(tunnel_task, api_task).await
}

async fn run_client(cli: &Cli, target: SocketAddr) -> Result<(), error::TunnelError> {
    if cli.server.is_empty() {
        log::error!("no --s server given in client mode");
        return Err(error::TunnelError::TunnelNotReady);
    }

    let remote = resolve_one(&format!("{}:{}", cli.server, cli.port))?;
    log::info!("starting in CLIENT mode, connecting to {remote}");

    let dialer = Dialer::connect(remote).await?;

    if let Some(handle) = dialer.handle() {
        spawn_handler(handle, cli.handler, target);
    }

    let source: Arc<dyn TunnelSource> = Arc::new(dialer);
    let api_task = tokio::spawn(run_control_plane(cli.apiport, source));

    api_task.await.map_err(|_| error::TunnelError::StreamClosed)?
}

/// Attaches the configured local adapter to a freshly established tunnel:
/// the production `api` path (the HTTP-style forwarding adapter) or the
/// `echo` diagnostic REPL, carried as a dev aid per
/// `original_source/socket/handler.go`'s `EchoHandler`.
fn spawn_handler(handle: TunnelHandle, handler: Handler, target: SocketAddr) {
    match handler {
        Handler::Api => {
            tokio::spawn(adapter::attach(handle, target));
        }
        Handler::Echo => {
            tokio::spawn(echo::run(handle));
        }
    }
}

async fn run_control_plane(port: u16, source: Arc<dyn TunnelSource>) -> Result<(), error::TunnelError> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("control plane listening on {}", listener.local_addr()?);

    let router = control::router(source);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}

/// Both the tunnel-side task and the control-plane task run for the
/// lifetime of the process; whichever finishes first (normally via a fatal
/// bind/accept error, or Ctrl-C unwinding the control plane) determines the
/// exit code: zero on clean shutdown, non-zero on any fatal startup or
/// runtime error.
async fn race_to_completion(
    tunnel_task: tokio::task::JoinHandle<Result<(), error::TunnelError>>,
    api_task: tokio::task::JoinHandle<Result<(), error::TunnelError>>,
) -> Result<(), error::TunnelError> {
    tokio::select! {
        result = tunnel_task => result.map_err(|_| error::TunnelError::StreamClosed)?,
        result = api_task => result.map_err(|_| error::TunnelError::StreamClosed)?,
    }
}

fn resolve_one(host_port: &str) -> Result<SocketAddr, error::TunnelError> {
    host_port
        .to_socket_addrs()
        .map_err(error::TunnelError::from)?
        .next()
        .ok_or(error::TunnelError::NoSuchTunnel)
}
