//! Non-blocking reads and gathered writes on raw descriptors.
//!
//! Both calls report `EAGAIN`/`EWOULDBLOCK` as [`io::ErrorKind::WouldBlock`]
//! and retry transparently on `EINTR`.

use libc::{iovec, msghdr};
use std::io;
use std::mem;
use std::os::fd::RawFd;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

/// Writes as much of `segments` as the socket accepts in one `sendmsg`.
pub(crate) fn write_segments(fd: RawFd, segments: &[&[u8]]) -> io::Result<usize> {
    let mut iov: Vec<iovec> = segments
        .iter()
        .filter(|segment| !segment.is_empty())
        .map(|segment| iovec {
            iov_base: segment.as_ptr() as *mut libc::c_void,
            iov_len: segment.len(),
        })
        .collect();

    if iov.is_empty() {
        return Ok(0);
    }

    let mut message: msghdr = unsafe { mem::zeroed() };
    message.msg_iov = iov.as_mut_ptr();
    message.msg_iovlen = iov.len() as _;

    loop {
        let res = unsafe { libc::sendmsg(fd, &message, SEND_FLAGS) };
        if res >= 0 {
            return Ok(res as usize);
        }

        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Appends up to `limit` bytes read from `fd` to `buffer`.
///
/// Returns `Ok(0)` at end of stream.
pub(crate) fn read_into(fd: RawFd, buffer: &mut Vec<u8>, limit: usize) -> io::Result<usize> {
    if limit == 0 {
        return Err(io::Error::from_raw_os_error(libc::E2BIG));
    }
    buffer.reserve(limit);

    loop {
        let spare = buffer.spare_capacity_mut();
        let res = unsafe {
            libc::recv(
                fd,
                spare.as_mut_ptr() as *mut libc::c_void,
                limit.min(spare.len()),
                0,
            )
        };

        if res >= 0 {
            let read = res as usize;
            unsafe { buffer.set_len(buffer.len() + read) };
            return Ok(read);
        }

        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}
