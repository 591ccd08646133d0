use thiserror::Error;

/// Result of coroutine operations.
pub type Result<T> =
    std::result::Result<T, Error>;

/// Error returned by coroutine operations.
///
/// Failures of the host logic running inside a coroutine are not errors
/// at this level; they are reported through [`Outcome::Failed`].
///
/// [`Outcome::Failed`]: `crate::Outcome::Failed`
#[derive(Debug, Error)]
pub enum Error
{
    /// The stack allocator could not provide a stack.
    #[error("Cannot allocate a coroutine stack of {size} bytes")]
    OutOfMemory
    {
        /// Requested stack size, after clamping and rounding.
        size: usize,
    },

    /// An operation was used against its contract.
    #[error("{0}")]
    Misuse(#[from] Misuse),
}

/// Contract violation by the caller of a coroutine operation.
///
/// These are programming errors in the host.
/// They are detected before any state changes,
/// so the coroutine is left exactly as it was.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum Misuse
{
    #[error("Cannot resume a running coroutine")]
    ResumeRunning,

    #[error("Cannot resume a dead coroutine")]
    ResumeDead,

    #[error("Cannot yield from outside the running coroutine")]
    YieldOutside,

    #[error("Cannot yield from a coroutine without a stack")]
    YieldWithoutStack,

    #[error("Cannot destroy a running coroutine")]
    DestroyRunning,

    #[error("Cannot switch stacks while the host state is borrowed")]
    HostBorrowed,
}

impl Error
{
    /// The contract violation, if this is one.
    pub fn misuse(&self) -> Option<Misuse>
    {
        match self {
            Self::Misuse(misuse)   => Some(*misuse),
            Self::OutOfMemory{..} => None,
        }
    }
}
