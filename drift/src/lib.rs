//! Stackful cooperative coroutines.
//!
//! A [`Coroutine`] owns a private call stack.
//! [Resuming][`Coroutine::resume`] it switches the CPU onto that stack
//! until the coroutine [suspends][`Coroutine::suspend`] or finishes,
//! with all local state of both sides preserved across the switch.
//! What runs inside a coroutine is decided by its [`Host`].
//!
//! Scheduling is strictly cooperative and single-threaded:
//! coroutines cannot be sent to other threads,
//! and a resume blocks its caller like an ordinary call.

#![warn(missing_docs)]

pub use self::{config::*, coroutine::*, error::*, host::*};
pub use self::stack::{
    ArenaSize,
    HeapAllocator,
    MAPPED_STACK_RESERVE,
    MappedAllocator,
    StackAllocator,
    StackSize,
};

pub mod config;

mod context;
mod coroutine;
mod error;
mod host;
mod stack;
