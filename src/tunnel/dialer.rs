//! The dialer: a thin symmetric counterpart to the listener registry for
//! the client side. There is exactly one outbound tunnel, so `get(id)`
//! ignores `id` entirely — grounded on `original_source/socket/client.go`,
//! whose `GetConnection`/`GetConnections` do the same.

use super::{spawn, ConnectionInfo, TunnelHandle, TunnelId, TunnelSource};
use crate::error::TunnelError;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;

#[derive(Clone)]
pub struct Dialer {
    inner: Arc<Mutex<Option<TunnelHandle>>>,
}

impl Dialer {
    /// Connects to `addr`, wraps the stream in a pipe, and attaches a
    /// multiplexer. The tunnel is always assigned id 0 — irrelevant, since
    /// [`TunnelSource::get`] ignores the id on this side.
    pub async fn connect(addr: SocketAddr) -> Result<Self, TunnelError> {
        let stream = TcpStream::connect(addr).await?;
        let remote = stream.peer_addr()?;

        let inner: Arc<Mutex<Option<TunnelHandle>>> = Arc::new(Mutex::new(None));
        let teardown_inner = inner.clone();
        let handle = spawn(0, remote, stream, move |_id| {
            *teardown_inner.lock() = None;
        });

        *inner.lock() = Some(handle);
        log::info!("dialed tunnel to {remote}");

        Ok(Dialer { inner })
    }

    /// The single live tunnel, if the connection hasn't torn down.
    pub fn handle(&self) -> Option<TunnelHandle> {
        self.inner.lock().clone()
    }
}

impl TunnelSource for Dialer {
    fn get(&self, _id: TunnelId) -> Option<TunnelHandle> {
        self.handle()
    }

    fn get_all(&self) -> Vec<ConnectionInfo> {
        self.handle().map(|h| h.info()).into_iter().collect()
    }
}
