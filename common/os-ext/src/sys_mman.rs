use std::{
    io,
    os::unix::io::{AsRawFd, BorrowedFd},
    ptr::{NonNull, null_mut},
};

/// Call mmap(2) with the given arguments.
///
/// The address hint is always null; the kernel chooses the address.
/// If `fd` is [`None`], `-1` is passed, as anonymous mappings require.
pub fn mmap(
    length: usize,
    prot:   libc::c_int,
    flags:  libc::c_int,
    fd:     Option<BorrowedFd>,
    offset: libc::off_t,
) -> io::Result<NonNull<libc::c_void>>
{
    let fd = fd.map(|fd| fd.as_raw_fd()).unwrap_or(-1);

    // SAFETY: A null hint never replaces an existing mapping.
    let ptr = unsafe {
        libc::mmap(
            /* addr   */ null_mut(),
            /* length */ length,
            /* prot   */ prot,
            /* flags  */ flags,
            /* fd     */ fd,
            /* offset */ offset,
        )
    };

    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }

    // A successful mmap(2) with a null hint never returns null.
    NonNull::new(ptr).ok_or_else(|| io::Error::from(io::ErrorKind::Other))
}

/// Call munmap(2) with the given arguments.
///
/// # Safety
///
/// The range must not be in use by anything that outlives the call.
pub unsafe fn munmap(addr: NonNull<libc::c_void>, length: usize)
    -> io::Result<()>
{
    let result = libc::munmap(addr.as_ptr(), length);

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Call mprotect(2) with the given arguments.
///
/// # Safety
///
/// Removing access from memory that is still referenced
/// turns later accesses into faults.
pub unsafe fn mprotect(
    addr:   NonNull<libc::c_void>,
    length: usize,
    prot:   libc::c_int,
) -> io::Result<()>
{
    let result = libc::mprotect(addr.as_ptr(), length, prot);

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}
