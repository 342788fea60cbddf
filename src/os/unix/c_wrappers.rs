#![allow(clippy::arithmetic_side_effects)]

use {
    super::unixprelude::*,
    std::{ffi::CString, io, mem, os::fd::OwnedFd, ptr},
};

fn get_flflags(fd: BorrowedFd<'_>) -> io::Result<c_int> {
    let val = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL, 0) };
    ok_or_errno!(val != -1 => val)
}
fn set_flflags(fd: BorrowedFd<'_>, flags: c_int) -> io::Result<()> {
    let success = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags) != -1 };
    ok_or_errno!(success => ())
}
fn set_nonblocking(fd: BorrowedFd<'_>) -> io::Result<()> {
    set_flflags(fd, get_flflags(fd)? | libc::O_NONBLOCK)
}

fn get_fdflags(fd: BorrowedFd<'_>) -> io::Result<c_int> {
    let val = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFD, 0) };
    ok_or_errno!(val != -1 => val)
}
fn set_fdflags(fd: BorrowedFd<'_>, flags: c_int) -> io::Result<()> {
    let success = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, flags) != -1 };
    ok_or_errno!(success => ())
}
fn set_cloexec(fd: BorrowedFd<'_>) -> io::Result<()> {
    set_fdflags(fd, get_fdflags(fd)? | libc::FD_CLOEXEC)
}

/// Creates the nonblocking self-pipe used to interrupt a blocked `poll(2)` call, returned as
/// (read end, write end).
pub(super) fn self_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as c_int; 2];
    let success = unsafe { libc::pipe(fds.as_mut_ptr()) != -1 };
    let (rx, tx) = ok_or_errno!(success => unsafe {
        (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1]))
    })?;
    for fd in [rx.as_fd(), tx.as_fd()] {
        set_nonblocking(fd)?;
        set_cloexec(fd)?;
    }
    Ok((rx, tx))
}

/// Writes one byte, for waking the poller. A full pipe already guarantees a wakeup, so `EAGAIN`
/// is not an error here.
pub(super) fn write_wake_byte(fd: BorrowedFd<'_>) {
    unsafe {
        libc::write(fd.as_raw_fd(), [0u8].as_ptr().cast(), 1);
    }
}

/// Drains all pending wakeup bytes.
pub(super) fn drain(fd: BorrowedFd<'_>) {
    let mut buf = [0u8; 64];
    loop {
        let n = unsafe { libc::read(fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
        if n <= 0 {
            break;
        }
    }
}

pub(super) fn poll(fds: &mut [libc::pollfd], timeout: c_int) -> io::Result<usize> {
    let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
    ok_or_errno!(n != -1 => n as usize)
}

pub(super) fn geteuid() -> uid_t { unsafe { libc::geteuid() } }

/// Transfers ownership of a path to `uid`, leaving the group unchanged. Only meaningful for a
/// privileged process provisioning another user's socket location.
pub(super) fn chown(path: &std::path::Path, uid: uid_t) -> io::Result<()> {
    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a nul byte"))?;
    // gid_t::MAX is the "leave unchanged" sentinel.
    let success = unsafe { libc::chown(cpath.as_ptr(), uid, libc::gid_t::MAX) } != -1;
    ok_or_errno!(success => ())
}

/// Looks a user up by name, returning their uid if the user exists.
pub(super) fn uid_of_user(name: &str) -> io::Result<Option<uid_t>> {
    let cname = CString::new(name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "username contains a nul byte"))?;
    let mut buf = vec![0u8; 512];
    loop {
        let mut pwd = unsafe { mem::zeroed::<libc::passwd>() };
        let mut result = ptr::null_mut::<libc::passwd>();
        let errno = unsafe {
            libc::getpwnam_r(cname.as_ptr(), &mut pwd, buf.as_mut_ptr().cast(), buf.len(), &mut result)
        };
        match errno {
            0 => return Ok((!result.is_null()).then(|| pwd.pw_uid)),
            libc::ERANGE => buf.resize(buf.len() * 2, 0),
            els => return Err(io::Error::from_raw_os_error(els)),
        }
    }
}

/// Name of the user the process is running as.
pub(crate) fn username_of_euid() -> io::Result<String> {
    let uid = geteuid();
    let mut buf = vec![0u8; 512];
    loop {
        let mut pwd = unsafe { mem::zeroed::<libc::passwd>() };
        let mut result = ptr::null_mut::<libc::passwd>();
        let errno = unsafe {
            libc::getpwuid_r(uid, &mut pwd, buf.as_mut_ptr().cast(), buf.len(), &mut result)
        };
        match errno {
            0 if result.is_null() => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no passwd entry for uid {uid}"),
                ))
            }
            0 => {
                let name = unsafe { std::ffi::CStr::from_ptr(pwd.pw_name) };
                return name.to_str().map(ToOwned::to_owned).map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidData, "username is not valid UTF-8")
                });
            }
            libc::ERANGE => buf.resize(buf.len() * 2, 0),
            els => return Err(io::Error::from_raw_os_error(els)),
        }
    }
}
