use {
    super::winprelude::*,
    crate::misc::OrErrno,
    std::{ffi::OsStr, io, os::windows::io::OwnedHandle, ptr},
    widestring::U16CString,
    windows_sys::Win32::{
        Foundation::{ERROR_IO_PENDING, ERROR_PIPE_CONNECTED, WAIT_FAILED},
        Storage::FileSystem::{
            ReadFile, WriteFile, FILE_FLAG_FIRST_PIPE_INSTANCE, FILE_FLAG_OVERLAPPED,
            PIPE_ACCESS_DUPLEX,
        },
        System::{
            Pipes::{
                ConnectNamedPipe, CreateNamedPipeW, DisconnectNamedPipe, PIPE_READMODE_BYTE,
                PIPE_REJECT_REMOTE_CLIENTS, PIPE_TYPE_BYTE, PIPE_WAIT,
            },
            Threading::{CreateEventW, ResetEvent, SetEvent, WaitForMultipleObjects, INFINITE},
            IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED},
        },
    },
};

/// Pipe buffer size hint on both directions, sized for one maximal framed message.
const PIPE_BUFFER_SIZE: u32 = 8192;

fn raw_os_code(e: &io::Error) -> Option<u32> { e.raw_os_error().map(|c| c as u32) }

pub(super) fn create_manual_reset_event() -> io::Result<OwnedHandle> {
    let handle = unsafe { CreateEventW(ptr::null(), 1, 0, ptr::null()) };
    ok_or_errno!(handle != 0 => unsafe { OwnedHandle::from_raw_handle(handle as RawHandle) })
}

pub(super) fn set_event(event: HANDLE) -> io::Result<()> {
    unsafe { SetEvent(event) != 0 }.true_val_or_errno(())
}

pub(super) fn reset_event(event: HANDLE) -> io::Result<()> {
    unsafe { ResetEvent(event) != 0 }.true_val_or_errno(())
}

/// Blocks until one of `handles` is signaled, returning its index. `WAIT_FAILED` surfaces as an
/// error, which the dispatcher treats as fatal.
pub(super) fn wait_for_multiple(handles: &[HANDLE]) -> io::Result<usize> {
    debug_assert!(!handles.is_empty(), "empty wait set would block forever");
    let result =
        unsafe { WaitForMultipleObjects(handles.len() as u32, handles.as_ptr(), 0, INFINITE) };
    if result == WAIT_FAILED {
        return Err(io::Error::last_os_error());
    }
    // WAIT_OBJECT_0 is zero; abandoned-mutex values cannot occur for event handles.
    Ok(result as usize)
}

/// Creates a duplex byte-mode overlapped pipe instance. The first-instance flag makes a
/// concurrent creation of the same pipe name fail fast instead of silently coexisting.
pub(super) fn create_named_pipe(path: &OsStr, first_instance: bool) -> io::Result<OwnedHandle> {
    let wide = U16CString::from_os_str(path)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pipe path contains a nul"))?;
    let mut open_mode = PIPE_ACCESS_DUPLEX | FILE_FLAG_OVERLAPPED;
    if first_instance {
        open_mode |= FILE_FLAG_FIRST_PIPE_INSTANCE;
    }
    let handle = unsafe {
        CreateNamedPipeW(
            wide.as_ptr(),
            open_mode,
            PIPE_TYPE_BYTE | PIPE_READMODE_BYTE | PIPE_WAIT | PIPE_REJECT_REMOTE_CLIENTS,
            1,
            PIPE_BUFFER_SIZE,
            PIPE_BUFFER_SIZE,
            0,
            ptr::null(),
        )
    };
    ok_or_errno!(handle != INVALID_HANDLE_VALUE => unsafe {
        OwnedHandle::from_raw_handle(handle as RawHandle)
    })
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(super) enum ConnectOutcome {
    /// A client is connected; no completion event will fire for this call.
    Connected,
    /// The wait for a client is in flight; completion signals the overlapped event.
    Pending,
}

/// Issues an overlapped server-side wait for a client connection.
///
/// `ERROR_PIPE_CONNECTED` means a client raced ahead of the call and is already attached, which
/// is a success.
pub(super) fn connect_named_pipe(
    pipe: HANDLE,
    overlapped: *mut OVERLAPPED,
) -> io::Result<ConnectOutcome> {
    if unsafe { ConnectNamedPipe(pipe, overlapped) } != 0 {
        return Ok(ConnectOutcome::Connected);
    }
    let e = io::Error::last_os_error();
    match raw_os_code(&e) {
        Some(ERROR_IO_PENDING) => Ok(ConnectOutcome::Pending),
        Some(ERROR_PIPE_CONNECTED) => Ok(ConnectOutcome::Connected),
        _ => Err(e),
    }
}

/// Starts an overlapped read. Synchronous completion still signals the overlapped event, so the
/// dispatcher handles both completions through the same path.
pub(super) fn start_overlapped_read(
    pipe: HANDLE,
    buf: &mut [u8],
    overlapped: *mut OVERLAPPED,
) -> io::Result<()> {
    let ok = unsafe {
        ReadFile(pipe, buf.as_mut_ptr(), buf.len() as u32, ptr::null_mut(), overlapped) != 0
    };
    if ok {
        return Ok(());
    }
    let e = io::Error::last_os_error();
    match raw_os_code(&e) {
        Some(ERROR_IO_PENDING) => Ok(()),
        _ => Err(e),
    }
}

/// Starts an overlapped write of the whole buffer. See
/// [`start_overlapped_read`] for the completion model.
pub(super) fn start_overlapped_write(
    pipe: HANDLE,
    buf: &[u8],
    overlapped: *mut OVERLAPPED,
) -> io::Result<()> {
    let ok = unsafe {
        WriteFile(pipe, buf.as_ptr(), buf.len() as u32, ptr::null_mut(), overlapped) != 0
    };
    if ok {
        return Ok(());
    }
    let e = io::Error::last_os_error();
    match raw_os_code(&e) {
        Some(ERROR_IO_PENDING) => Ok(()),
        _ => Err(e),
    }
}

/// Collects the result of a completed overlapped operation without waiting.
pub(super) fn overlapped_result(pipe: HANDLE, overlapped: *mut OVERLAPPED) -> io::Result<usize> {
    let mut transferred = 0u32;
    unsafe { GetOverlappedResult(pipe, overlapped, &mut transferred, 0) != 0 }
        .true_val_or_errno(transferred as usize)
}

pub(super) fn disconnect_named_pipe(pipe: HANDLE) -> io::Result<()> {
    unsafe { DisconnectNamedPipe(pipe) != 0 }.true_val_or_errno(())
}

/// Best-effort cancellation of all outstanding overlapped operations on the handle. Failure
/// means nothing was in flight.
pub(super) fn cancel_io(pipe: HANDLE) {
    unsafe {
        CancelIoEx(pipe, ptr::null());
    }
}
