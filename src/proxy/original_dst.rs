// Original destination of a connection redirected by netfilter

use std::net::SocketAddrV4;

use tokio::net::TcpStream;

use crate::error::{RouterError, RouterResult};

/// Destination the client dialled before the NAT REDIRECT rule rewrote it
#[cfg(target_os = "linux")]
pub fn original_destination(stream: &TcpStream) -> RouterResult<SocketAddrV4> {
    use std::mem;
    use std::net::Ipv4Addr;
    use std::os::unix::io::AsRawFd;

    const SO_ORIGINAL_DST: libc::c_int = 80;

    let fd = stream.as_raw_fd();
    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;

    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_IP,
            SO_ORIGINAL_DST,
            std::ptr::addr_of_mut!(addr).cast::<libc::c_void>(),
            &mut len,
        )
    };

    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(RouterError::OriginalDestination(format!(
            "getsockopt SO_ORIGINAL_DST failed: {}",
            err
        )));
    }

    let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
    Ok(SocketAddrV4::new(ip, u16::from_be(addr.sin_port)))
}

#[cfg(not(target_os = "linux"))]
pub fn original_destination(_stream: &TcpStream) -> RouterResult<SocketAddrV4> {
    Err(RouterError::OriginalDestination(
        "SO_ORIGINAL_DST is only available on Linux".to_string(),
    ))
}
