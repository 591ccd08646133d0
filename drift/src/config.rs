//! Process-wide coroutine configuration.
//!
//! These settings apply to coroutines created after they change;
//! existing coroutines keep whatever they were created with.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering::SeqCst};

/// Stack size used when none is configured.
///
/// Not a multiple of 64 KiB, which would cause D-cache aliasing conflicts
/// between the tops of different stacks.
pub const DEFAULT_STACK_SIZE: usize = 8 * 1024;

/// Smallest stack size that will ever be allocated.
pub const MIN_STACK_SIZE: usize = 2 * 1024;

/// Alignment of stack sizes, stack tops, and control blocks.
pub const STACK_ALIGN: usize = 16;

/// When a coroutine's stack is returned to its allocator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Release
{
    /// Release the stack as soon as the coroutine dies,
    /// inside the resume call that observed the death.
    Eager,

    /// Keep the stack until the coroutine is destroyed or dropped.
    Lazy,
}

static DEFAULT_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_STACK_SIZE);

static RELEASE_POLICY: AtomicU8 = AtomicU8::new(Release::Eager as u8);

/// The stack size that [`StackSize::Default`] resolves to.
///
/// [`StackSize::Default`]: `crate::StackSize::Default`
pub fn default_stack_size() -> usize
{
    DEFAULT_SIZE.load(SeqCst)
}

/// Change the default stack size and return the previous one.
///
/// Zero restores [`DEFAULT_STACK_SIZE`].
/// Sizes below [`MIN_STACK_SIZE`] are clamped up to it.
pub fn set_default_stack_size(size: usize) -> usize
{
    let size = match size {
        0 => DEFAULT_STACK_SIZE,
        _ => size.max(MIN_STACK_SIZE),
    };
    DEFAULT_SIZE.swap(size, SeqCst)
}

/// The release policy for coroutines that do not choose one.
pub fn release_policy() -> Release
{
    match RELEASE_POLICY.load(SeqCst) {
        x if x == Release::Lazy as u8 => Release::Lazy,
        _                             => Release::Eager,
    }
}

/// Change the default release policy and return the previous one.
pub fn set_release_policy(policy: Release) -> Release
{
    match RELEASE_POLICY.swap(policy as u8, SeqCst) {
        x if x == Release::Lazy as u8 => Release::Lazy,
        _                             => Release::Eager,
    }
}

/// Serializes tests that change process-wide settings.
#[cfg(test)]
pub(crate) static TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
