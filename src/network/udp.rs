//! UDP socket setup

use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;

use crate::config::{Destination, RelayConfig, SessionConfig};
use crate::error::NetworkError;

/// Create a nonblocking UDP socket bound to `addr`.
///
/// Broadcast permission is only requested on IPv4 sockets.
pub fn create_socket(addr: SocketAddr, broadcast: bool) -> Result<Socket, NetworkError> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(format!("socket: {}", e)))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| NetworkError::BindFailed(format!("SO_REUSEADDR: {}", e)))?;

    if broadcast && addr.is_ipv4() {
        socket
            .set_broadcast(true)
            .map_err(|e| NetworkError::BindFailed(format!("SO_BROADCAST: {}", e)))?;
    }

    socket
        .set_nonblocking(true)
        .map_err(|e| NetworkError::BindFailed(format!("nonblocking: {}", e)))?;

    socket
        .bind(&addr.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;

    Ok(socket)
}

/// Socket for the sender's network thread.
pub fn bind_sender(config: &SessionConfig) -> Result<std::net::UdpSocket, NetworkError> {
    let broadcast = matches!(config.destination, Destination::Broadcast { .. });
    let socket = create_socket(config.bind_addr(), broadcast)?;
    Ok(socket.into())
}

/// Socket for the receive relay. Must be called inside a tokio runtime.
pub fn bind_relay(config: &RelayConfig) -> Result<tokio::net::UdpSocket, NetworkError> {
    let socket = create_socket(config.bind, true)?;
    tokio::net::UdpSocket::from_std(socket.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", config.bind, e)))
}
