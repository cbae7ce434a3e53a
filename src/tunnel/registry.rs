//! The listener-side registry: accepts byte-stream connections, assigns
//! 16-bit tunnel ids, and tracks the currently-live tunnels.
//!
//! Grounded on `original_source/socket/server.go`'s `server` type: an id
//! counter mod 65536, a mutex-guarded map, and a teardown closure that
//! removes the id.

use super::{spawn, ConnectionInfo, TunnelHandle, TunnelId, TunnelSource};
use crate::error::TunnelError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Default)]
struct Inner {
    next_id: TunnelId,
    tunnels: HashMap<TunnelId, TunnelHandle>,
}

/// Listener-side table of live tunnels. Cheap to clone; the accept loop
/// and every tunnel's teardown callback share one `Inner` behind an `Arc`.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<Inner>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `addr` and runs the accept loop, spawning a tunnel (and
    /// invoking `on_new_tunnel` with its handle) for every accepted
    /// connection. Only returns on a fatal bind or accept error — callers
    /// run this inside its own task.
    pub async fn listen<F>(&self, addr: SocketAddr, on_new_tunnel: F) -> Result<(), TunnelError>
    where
        F: Fn(TunnelHandle) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(addr).await?;
        log::info!("tunnel listener bound to {}", listener.local_addr()?);

        loop {
            let (stream, remote) = listener.accept().await?;

            // id = (prev_id + 1) mod 2^16, assigned under the registry lock.
            let id = {
                let mut inner = self.inner.lock();
                inner.next_id = inner.next_id.wrapping_add(1);
                inner.next_id
            };

            let teardown_inner = self.inner.clone();
            let handle = spawn(id, remote, stream, move |id| {
                teardown_inner.lock().tunnels.remove(&id);
            });

            self.inner.lock().tunnels.insert(id, handle.clone());
            log::info!("tunnel {id} established with {remote}");

            on_new_tunnel(handle);
        }
    }
}

impl TunnelSource for Registry {
    fn get(&self, id: TunnelId) -> Option<TunnelHandle> {
        self.inner.lock().tunnels.get(&id).cloned()
    }

    fn get_all(&self) -> Vec<ConnectionInfo> {
        self.inner.lock().tunnels.values().map(|h| h.info()).collect()
    }
}
