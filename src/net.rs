//! Socket establishment helpers for TCP and Unix-domain transports.

use socket2::{Domain, Protocol, SockAddr, Socket, TcpKeepalive, Type};
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use crate::error::Error::{ArgumentError, IoError};
use crate::error::Result;

/// Interval between TCP keepalive probes.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Number of fresh connect attempts made when the bound source address is
/// temporarily exhausted (EADDRNOTAVAIL) and SO_REUSEADDR is in use.
const CONNECT_RETRIES: usize = 10;

fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
    if addrs.is_empty() {
        return Err(ArgumentError(format!("could not resolve host '{}'", host)));
    }
    Ok(addrs)
}

/// Establishes a blocking TCP connection, trying every resolved address.
pub(crate) fn tcp_connect(
    host: &str,
    port: u16,
    timeout: Option<Duration>,
) -> Result<TcpStream> {
    let addrs = resolve(host, port)?;

    let mut last_err: Option<io::Error> = None;
    for addr in &addrs {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }

    // resolve() returned at least one address, so an error was recorded.
    match last_err {
        Some(err) => Err(IoError(err)),
        None => Err(ArgumentError(format!("could not resolve host '{}'", host))),
    }
}

/// Initiates a non-blocking TCP connect, optionally binding a source
/// address first. The returned stream is usually still connecting; the
/// caller observes completion through its first writable event.
pub(crate) fn tcp_connect_nonblock(
    host: &str,
    port: u16,
    source_addr: Option<&str>,
    reuse: bool,
) -> Result<TcpStream> {
    let addr = resolve(host, port)?[0];

    let mut attempts = if reuse && source_addr.is_some() {
        CONNECT_RETRIES
    } else {
        1
    };

    loop {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

        if reuse {
            socket.set_reuse_address(true)?;
        }
        if let Some(source) = source_addr {
            let bind_addr = resolve(source, 0)?[0];
            socket.bind(&SockAddr::from(bind_addr))?;
        }

        socket.set_nonblocking(true)?;

        match socket.connect(&SockAddr::from(addr)) {
            Ok(()) => return Ok(socket.into()),
            Err(ref err)
                if err.raw_os_error() == Some(libc::EINPROGRESS)
                    || err.kind() == io::ErrorKind::WouldBlock =>
            {
                return Ok(socket.into());
            }
            Err(ref err)
                if err.raw_os_error() == Some(libc::EADDRNOTAVAIL) && attempts > 1 =>
            {
                attempts -= 1;
            }
            Err(err) => return Err(IoError(err)),
        }
    }
}

/// Establishes a blocking Unix-domain connection.
pub(crate) fn unix_connect(path: &Path) -> Result<UnixStream> {
    Ok(UnixStream::connect(path)?)
}

/// Initiates a non-blocking Unix-domain connect.
pub(crate) fn unix_connect_nonblock(path: &Path) -> Result<UnixStream> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    socket.set_nonblocking(true)?;

    let addr = SockAddr::unix(path)?;
    match socket.connect(&addr) {
        Ok(()) => Ok(UnixStream::from(OwnedFd::from(socket))),
        Err(ref err)
            if err.raw_os_error() == Some(libc::EINPROGRESS)
                || err.kind() == io::ErrorKind::WouldBlock =>
        {
            Ok(UnixStream::from(OwnedFd::from(socket)))
        }
        Err(err) => Err(IoError(err)),
    }
}

/// Enables TCP keepalive probing at `KEEPALIVE_INTERVAL`.
pub(crate) fn enable_keepalive<S: AsFd>(stream: &S) -> Result<()> {
    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_INTERVAL)
        .with_interval(KEEPALIVE_INTERVAL);
    socket2::SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    Ok(())
}
