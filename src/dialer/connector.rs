// Per-interface connect primitive

use std::net::{SocketAddr, SocketAddrV4};

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpSocket, TcpStream};

use crate::error::{RouterError, RouterResult};

/// Longest interface name the kernel accepts (IFNAMSIZ minus the NUL)
const MAX_DEVICE_NAME: usize = 15;

/// Opens a TCP connection whose egress is restricted to one named device.
///
/// Implementations do not apply the dial timeout or cancellation; the
/// dialer wraps every call and drops the future to abort it.
#[async_trait]
pub trait InterfaceConnector: Send + Sync {
    async fn connect(&self, device: &str, addr: SocketAddrV4) -> RouterResult<TcpStream>;
}

/// Production connector using `SO_BINDTODEVICE`. Needs `CAP_NET_RAW`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BoundConnector;

impl BoundConnector {
    fn bound_socket(device: &str) -> RouterResult<TcpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        bind_to_device(&socket, device)?;
        socket.set_nonblocking(true)?;

        let std_stream: std::net::TcpStream = socket.into();
        Ok(TcpSocket::from_std_stream(std_stream))
    }
}

#[async_trait]
impl InterfaceConnector for BoundConnector {
    async fn connect(&self, device: &str, addr: SocketAddrV4) -> RouterResult<TcpStream> {
        let socket = Self::bound_socket(device)?;
        let stream = socket.connect(SocketAddr::V4(addr)).await?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY on dev {}: {}", device, e);
        }
        Ok(stream)
    }
}

fn check_device_name(device: &str) -> RouterResult<()> {
    if device.is_empty() || device.len() > MAX_DEVICE_NAME || device.contains('\0') {
        return Err(RouterError::BindDevice {
            device: device.to_string(),
            reason: format!("invalid interface name (1-{} chars)", MAX_DEVICE_NAME),
        });
    }
    Ok(())
}

#[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
fn bind_to_device(socket: &Socket, device: &str) -> RouterResult<()> {
    check_device_name(device)?;
    socket
        .bind_device(Some(device.as_bytes()))
        .map_err(|e| RouterError::BindDevice {
            device: device.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
fn bind_to_device(_socket: &Socket, device: &str) -> RouterResult<()> {
    check_device_name(device)?;
    Err(RouterError::BindDevice {
        device: device.to_string(),
        reason: "binding to an interface is not supported on this platform".to_string(),
    })
}
