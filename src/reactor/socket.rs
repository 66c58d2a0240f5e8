//! Unix-domain socket setup.
//!
//! Sockets are created non-blocking and close-on-exec, and are returned as
//! [`OwnedFd`] so that dropping a request closes its connection.

use libc::{
    AF_UNIX, EINPROGRESS, F_GETFD, F_GETFL, F_SETFD, F_SETFL, FD_CLOEXEC, O_NONBLOCK, SO_SNDBUF,
    SOCK_STREAM, SOL_SOCKET, c_int, sockaddr, sockaddr_un, socklen_t,
};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Send buffer size requested for every new connection.
const SEND_BUFFER_BYTES: c_int = 64 * 1024;

/// Outcome of a non-blocking connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectStatus {
    Connected,
    InProgress,
}

pub(crate) fn open_socket() -> io::Result<OwnedFd> {
    let raw = unsafe { libc::socket(AF_UNIX, SOCK_STREAM, 0) };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }

    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
    set_nonblocking(raw)?;
    set_cloexec(raw)?;
    suppress_sigpipe(raw);

    Ok(fd)
}

pub(crate) fn connect_socket(fd: &OwnedFd, path: &Path) -> io::Result<ConnectStatus> {
    let (address, length) = socket_address(path)?;

    let res = unsafe {
        libc::connect(
            fd.as_raw_fd(),
            &address as *const sockaddr_un as *const sockaddr,
            length,
        )
    };
    if res == 0 {
        return Ok(ConnectStatus::Connected);
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(EINPROGRESS) {
        return Ok(ConnectStatus::InProgress);
    }

    Err(err)
}

/// Raises the send buffer so most requests fit in one write. Best effort.
pub(crate) fn raise_send_buffer(fd: &OwnedFd) {
    let size = SEND_BUFFER_BYTES;
    unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            SOL_SOCKET,
            SO_SNDBUF,
            &size as *const c_int as *const libc::c_void,
            mem::size_of::<c_int>() as socklen_t,
        );
    }
}

fn socket_address(path: &Path) -> io::Result<(sockaddr_un, socklen_t)> {
    let mut address: sockaddr_un = unsafe { mem::zeroed() };
    address.sun_family = AF_UNIX as libc::sa_family_t;

    let bytes = path.as_os_str().as_bytes();
    // Room for the trailing NUL.
    if bytes.len() >= address.sun_path.len() {
        return Err(io::Error::from_raw_os_error(libc::ENAMETOOLONG));
    }

    for (dst, src) in address.sun_path.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }

    let offset = mem::size_of::<sockaddr_un>() - address.sun_path.len();
    Ok((address, (offset + bytes.len() + 1) as socklen_t))
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, F_GETFL) };
    if flags < 0 || unsafe { libc::fcntl(fd, F_SETFL, flags | O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

fn set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, F_GETFD) };
    if flags < 0 || unsafe { libc::fcntl(fd, F_SETFD, flags | FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
fn suppress_sigpipe(fd: RawFd) {
    let on: c_int = 1;
    unsafe {
        libc::setsockopt(
            fd,
            SOL_SOCKET,
            libc::SO_NOSIGPIPE,
            &on as *const c_int as *const libc::c_void,
            mem::size_of::<c_int>() as socklen_t,
        );
    }
}

#[cfg(not(any(target_os = "macos", target_os = "ios", target_os = "freebsd")))]
fn suppress_sigpipe(_fd: RawFd) {}

/// Ignores SIGPIPE for the whole process so a peer closing early surfaces
/// as `EPIPE` instead of killing the caller.
pub(crate) fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}
