//! Extra items for talking to the operating system.
//!
//! This crate provides a safe, low-level interface to the operating system.
//! The functions in this crate are named after their underlying system calls,
//! and their behavior is identical except for the differences listed below.
//! The exact semantics of each function can be found in their man pages.
//! This is in contrast with the std crate, which gives no such guarantees.
//! This is a trade-off against cross-platform compatibility.
//!
//! # Differences with underlying system calls
//!
//! Errors are reported using [`Result`] rather than
//! through `errno` and an arbitrary return value.
//!
//! Pointers that are never null on success are returned as [`NonNull`].
//! File descriptors are accepted as [`BorrowedFd`],
//! with [`None`] standing in for `-1`.
//!
//! [`Result`]: `std::io::Result`
//! [`NonNull`]: `std::ptr::NonNull`
//! [`BorrowedFd`]: `std::os::unix::io::BorrowedFd`

#![warn(missing_docs)]

pub use {
    self::{sys_mman::*, unistd::*},
    libc::{MAP_ANON, MAP_PRIVATE, PROT_NONE, PROT_READ, PROT_WRITE, c_int, c_void},
};

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
pub use libc::MAP_STACK;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use libc::MAP_NORESERVE;

mod sys_mman;
mod unistd;
