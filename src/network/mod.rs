//! Network module - Datagram transport between peers
//!
//! Provides:
//! - Socket binding for direct and local-broadcast addressing
//! - The arrival queue shared by the receive loop and ACK waiters
//! - The reliable channel (stop-and-wait ARQ over UDP)

mod channel;
mod queue;

pub use channel::*;
pub use queue::*;

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tokio::net::UdpSocket;

use crate::protocol::DEFAULT_PORT;

/// Destination address used in broadcast mode.
pub const BROADCAST_ADDR: Ipv4Addr = Ipv4Addr::BROADCAST;

/// Configuration for binding the session socket.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Local address to bind to.
    pub bind_address: IpAddr,
    /// Local port; 0 lets the system pick one.
    pub port: u16,
    /// Enable SO_BROADCAST and address the peer at 255.255.255.255.
    pub broadcast: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            broadcast: false,
        }
    }
}

impl NetworkConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// Direct mode with an ephemeral local port (joiners and
    /// spectators dialing out).
    pub fn ephemeral() -> Self {
        Self::new(0)
    }

    /// Broadcast mode: bind all interfaces on the shared port.
    pub fn broadcast(port: u16) -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
            broadcast: true,
        }
    }

    pub fn with_bind(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    /// The address battle traffic is sent to in broadcast mode.
    pub fn broadcast_destination(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(BROADCAST_ADDR), self.port)
    }
}

/// Bind the session socket, enabling the broadcast option when the
/// mode requires it.
pub async fn bind_socket(config: &NetworkConfig) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind((config.bind_address, config.port)).await?;
    if config.broadcast {
        socket.set_broadcast(true)?;
    }
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral() {
        let config = NetworkConfig::ephemeral().with_bind("127.0.0.1".parse().unwrap());
        let socket = bind_socket(&config).await.unwrap();
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_broadcast_destination() {
        let config = NetworkConfig::broadcast(5101);
        let destination = config.broadcast_destination();
        assert_eq!(destination.to_string(), "255.255.255.255:5101");
    }
}
