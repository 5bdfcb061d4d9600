//! Listener creation for the proxy server.

use anyhow::Context;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Resolve `addr` (`host:port`, host names allowed) to its first address.
pub async fn resolve_addr(addr: &str) -> Result<SocketAddr, anyhow::Error> {
    tokio::net::lookup_host(addr)
        .await
        .with_context(|| format!("failed to resolve listen address '{addr}'"))?
        .next()
        .with_context(|| format!("listen address '{addr}' resolved to nothing"))
}

/// Create a TCP listener with `SO_REUSEADDR` so restarts don't wait on TIME_WAIT.
pub fn create_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;

    socket.bind(&addr.into())?;
    socket.listen(1024)?; // Backlog size

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}
