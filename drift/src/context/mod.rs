//! Machine contexts and switching between them.
//!
//! A [`Context`] is a snapshot of the registers that the target's
//! calling convention requires a callee to preserve,
//! plus the stack pointer and the address at which to continue.
//! Nothing outside this module knows the layout of a context;
//! each supported architecture has a backend that defines
//! the slot indices and the three assembly routines:
//!
//!  - *capture* records the caller's registers into a context.
//!    Resuming a captured context behaves as if the capture returned again,
//!    so it is only valid while the capturing frame is still live.
//!
//!  - *switch* saves the running registers into one context
//!    and restores another. It returns to its caller only when
//!    a later switch targets the saved context.
//!
//!  - *bootstrap* is the first code a freshly installed context runs.
//!    It moves the argument slot into the first argument register,
//!    calls the entry slot, and traps if the entry ever returns.
//!
//! [`install`] builds a fresh context by capturing and then patching:
//! the stack pointer slot receives the new stack top,
//! the program counter slot receives the bootstrap stub,
//! and two callee-saved slots carry the entry function and its argument.
//! Capturing first means the fresh context inherits the floating-point
//! control state of whoever installed it.

use std::ptr::{NonNull, addr_of_mut};

/// Define a global function in assembly.
///
/// Mach-O symbols carry a leading underscore; ELF symbols do not.
macro_rules! asm_function
{
    ($name:literal, $($body:literal),* $(,)?) => {
        #[cfg(target_vendor = "apple")]
        std::arch::global_asm!(concat!(
            ".text\n",
            ".p2align 4\n",
            ".globl _", $name, "\n",
            "_", $name, ":\n",
            $($body, "\n",)*
        ));

        #[cfg(not(target_vendor = "apple"))]
        std::arch::global_asm!(concat!(
            ".text\n",
            ".p2align 4\n",
            ".globl ", $name, "\n",
            ".hidden ", $name, "\n",
            $name, ":\n",
            $($body, "\n",)*
        ));
    };
}

#[cfg(all(target_arch = "x86_64", not(windows)))]
#[path = "x86_64.rs"]
mod arch;

#[cfg(all(target_arch = "aarch64", not(windows)))]
#[path = "aarch64.rs"]
mod arch;

#[cfg(not(any(
    all(target_arch = "x86_64", not(windows)),
    all(target_arch = "aarch64", not(windows)),
)))]
compile_error!("drift supports x86_64 and aarch64 with the System V or AAPCS64 calling convention");

/// Entry function of a freshly installed context.
///
/// The function receives the argument given to [`install`].
/// It must never return; the bootstrap stub traps if it does.
pub type Entry = extern "C" fn(usize) -> !;

/// Saved machine state.
#[repr(C, align(16))]
pub struct Context
{
    slots: [usize; arch::SLOTS],
}

impl Context
{
    /// A context that has not captured anything yet.
    ///
    /// Switching into an empty context is undefined behavior;
    /// it only exists to be written by [`capture`], [`install`], or [`switch`].
    pub const fn empty() -> Self
    {
        Self{slots: [0; arch::SLOTS]}
    }
}

/// Record the caller's machine state into `ctx`.
///
/// # Safety
///
/// `ctx` must be valid for writes.
/// Switching into the captured context after the caller
/// of this function has returned is undefined behavior.
#[inline(always)]
pub unsafe fn capture(ctx: *mut Context)
{
    arch::drift_context_capture(ctx);
}

/// Initialize `ctx` so that switching into it calls `entry(arg0)`
/// on the stack whose highest usable address is `stack_top`.
///
/// # Safety
///
///  - `ctx` must be valid for writes.
///  - `stack_top` must be aligned to [`crate::STACK_ALIGN`]
///    and the memory below it must be exclusively owned by the new context
///    for as long as the context may run.
pub unsafe fn install(
    ctx:       *mut Context,
    entry:     Entry,
    stack_top: NonNull<u8>,
    arg0:      usize,
)
{
    debug_assert_eq!(stack_top.as_ptr() as usize % crate::STACK_ALIGN, 0);

    capture(ctx);

    let slots = &mut *addr_of_mut!((*ctx).slots);
    slots[arch::SP]    = stack_top.as_ptr() as usize;
    slots[arch::PC]    = arch::drift_context_bootstrap as *const () as usize;
    slots[arch::ENTRY] = entry as *const () as usize;
    slots[arch::ARG]   = arg0;

    // Terminate frame pointer chains at the bootstrap stub.
    for &slot in arch::CLEARED {
        slots[slot] = 0;
    }
}

/// Save the running machine state into `from` and resume `to`.
///
/// Returns when some later switch resumes `from`.
///
/// # Safety
///
///  - `from` must be valid for writes and `to` for reads.
///  - `to` must have been filled by [`install`], or by [`switch`]
///    from a frame that is still suspended in that switch.
#[inline(always)]
pub unsafe fn switch(from: *mut Context, to: *const Context)
{
    arch::drift_context_switch(from, to);
}
