use std::io;

/// Call sysconf(3) with the given argument.
///
/// Indefinite limits are indistinguishable from failure and
/// are reported as an error; only query names that have a value.
pub fn sysconf(name: libc::c_int) -> io::Result<libc::c_long>
{
    // SAFETY: This is always safe.
    let result = unsafe { libc::sysconf(name) };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(result)
}

/// Equivalent to [`sysconf`] with `_SC_PAGESIZE`.
pub fn page_size() -> io::Result<usize>
{
    let size = sysconf(libc::_SC_PAGESIZE)?;
    usize::try_from(size)
        .map_err(|_| io::Error::from(io::ErrorKind::InvalidData))
}
