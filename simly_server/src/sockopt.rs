// Listen socket construction and per-socket buffer sizing.
//
// `std::net::TcpListener::bind` fixes the backlog and offers no way to set
// buffer sizes before `listen`, so on unix the listener is built by hand with
// `libc`: socket, SO_REUSEADDR, SO_RCVBUF/SO_SNDBUF, bind, listen(backlog),
// then handed to std. Other platforms fall back to `TcpListener::bind` and
// skip the buffer options.

use std::io;
use std::net::{SocketAddrV4, TcpListener, TcpStream};

#[cfg(unix)]
pub fn bind_listener(
    addr: SocketAddrV4,
    backlog: i32,
    buffer_size: usize,
) -> io::Result<TcpListener> {
    use std::os::fd::FromRawFd;

    #[cfg(any(target_os = "linux", target_os = "android"))]
    let sock_type = libc::SOCK_STREAM | libc::SOCK_CLOEXEC;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let sock_type = libc::SOCK_STREAM;

    // SAFETY: plain syscall, result checked below.
    let fd = unsafe { libc::socket(libc::AF_INET, sock_type, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `fd` is a freshly created socket owned by nobody else. Wrapping
    // it now closes it on every early return below.
    let listener = unsafe { TcpListener::from_raw_fd(fd) };

    set_int_option(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, 1)?;
    set_buffer_sizes(fd, buffer_size)?;

    // SAFETY: all-zero is a valid `sockaddr_in`; the fields that matter are
    // filled in right after.
    let mut sin: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    sin.sin_family = libc::AF_INET as libc::sa_family_t;
    sin.sin_port = addr.port().to_be();
    sin.sin_addr = libc::in_addr {
        s_addr: u32::from(*addr.ip()).to_be(),
    };
    #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd"
    ))]
    {
        sin.sin_len = std::mem::size_of::<libc::sockaddr_in>() as u8;
    }

    // SAFETY: `sin` is a valid sockaddr_in and the length matches it.
    let rc = unsafe {
        libc::bind(
            fd,
            (&raw const sin).cast::<libc::sockaddr>(),
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: plain syscall on a bound socket.
    if unsafe { libc::listen(fd, backlog) } != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(listener)
}

#[cfg(not(unix))]
pub fn bind_listener(
    addr: SocketAddrV4,
    _backlog: i32,
    _buffer_size: usize,
) -> io::Result<TcpListener> {
    TcpListener::bind(addr)
}

/// Apply the configured send/receive buffer size to an accepted stream.
#[cfg(unix)]
pub fn apply_buffer_sizes(stream: &TcpStream, buffer_size: usize) -> io::Result<()> {
    use std::os::fd::AsRawFd;
    set_buffer_sizes(stream.as_raw_fd(), buffer_size)
}

#[cfg(not(unix))]
pub fn apply_buffer_sizes(_stream: &TcpStream, _buffer_size: usize) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_buffer_sizes(fd: libc::c_int, buffer_size: usize) -> io::Result<()> {
    let size = libc::c_int::try_from(buffer_size).unwrap_or(libc::c_int::MAX);
    set_int_option(fd, libc::SOL_SOCKET, libc::SO_RCVBUF, size)?;
    set_int_option(fd, libc::SOL_SOCKET, libc::SO_SNDBUF, size)
}

#[cfg(unix)]
fn set_int_option(
    fd: libc::c_int,
    level: libc::c_int,
    name: libc::c_int,
    value: libc::c_int,
) -> io::Result<()> {
    // SAFETY: `value` outlives the call and the length matches its type.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            (&raw const value).cast::<libc::c_void>(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}
