// Transparent proxy - accepts intercepted connections and relays them over the chosen device

pub mod original_dst;

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::dialer::DeviceDialer;
use crate::error::{RouterError, RouterResult};
use original_dst::original_destination;

pub struct ProxyServer {
    listener: TcpListener,
    dialer: Arc<DeviceDialer>,
}

impl ProxyServer {
    pub async fn bind(addr: SocketAddr, dialer: Arc<DeviceDialer>) -> RouterResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(ProxyServer { listener, dialer })
    }

    pub fn local_addr(&self) -> RouterResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept until `shutdown` fires, one task per connection
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((client, peer)) => {
                        let dialer = Arc::clone(&self.dialer);
                        tokio::spawn(handle_connection(client, peer, dialer));
                    }
                    Err(e) => tracing::warn!("Accept failed: {}", e),
                },
            }
        }
        tracing::info!("Proxy listener stopped");
    }
}

async fn handle_connection(client: TcpStream, peer: SocketAddr, dialer: Arc<DeviceDialer>) {
    let destination = match original_destination(&client) {
        Ok(destination) => destination,
        Err(e) => {
            tracing::warn!("Dropping connection from {}: {}", peer, e);
            return;
        }
    };

    match relay(client, destination, &dialer).await {
        Ok((sent, received)) => tracing::debug!(
            "{} -> {} closed ({} bytes up, {} bytes down)",
            peer,
            destination,
            sent,
            received
        ),
        Err(e) => tracing::warn!("{} -> {}: {}", peer, destination, e),
    }
}

/// Dial `destination` and copy bytes both ways until either side closes.
/// If the dial fails the client is dropped without any data.
pub async fn relay(
    mut client: TcpStream,
    destination: SocketAddrV4,
    dialer: &DeviceDialer,
) -> RouterResult<(u64, u64)> {
    // a connection that was not redirected reports the listener as its destination
    if is_local_endpoint(&client, destination)? {
        return Err(RouterError::SelfDestination(destination));
    }

    let mut outcome = dialer.dial(*destination.ip(), destination.port()).await?;
    tracing::debug!("Relaying to {} on dev {}", outcome.target, outcome.device);

    let transferred = tokio::io::copy_bidirectional(&mut client, &mut outcome.stream).await?;
    Ok(transferred)
}

fn is_local_endpoint(client: &TcpStream, destination: SocketAddrV4) -> RouterResult<bool> {
    Ok(client.local_addr()? == SocketAddr::V4(destination))
}
