//! AArch64 AAPCS64 backend.
//!
//! | Slot    | Offset      | Contents                               |
//! |---------|-------------|----------------------------------------|
//! | 0       | 0           | sp                                     |
//! | 1       | 8           | pc                                     |
//! | 2       | 16          | x19, entry function of a fresh context |
//! | 3       | 24          | x20, argument of a fresh context       |
//! | 4 – 11  | 32 – 88     | x21 – x28                              |
//! | 12      | 96          | x29 (frame pointer)                    |
//! | 13      | 104         | x30 (link register)                    |
//! | 14 – 21 | 112 – 168   | d8 – d15                               |
//!
//! x18 is never touched; it is reserved on several platforms.

use super::Context;

pub const SLOTS: usize = 22;

pub const SP:    usize = 0;
pub const PC:    usize = 1;
pub const ENTRY: usize = 2;
pub const ARG:   usize = 3;

/// Frame pointer and link register.
pub const CLEARED: &[usize] = &[12, 13];

extern "C"
{
    pub fn drift_context_capture(ctx: *mut Context);
    pub fn drift_context_switch(from: *mut Context, to: *const Context);
    pub fn drift_context_bootstrap();
}

// x0: context to fill.
// The saved pc is the link register, so a resume returns from this call.
asm_function!(
    "drift_context_capture",
    "mov x9, sp",
    "stp x9, x30, [x0, #0]",
    "stp x19, x20, [x0, #16]",
    "stp x21, x22, [x0, #32]",
    "stp x23, x24, [x0, #48]",
    "stp x25, x26, [x0, #64]",
    "stp x27, x28, [x0, #80]",
    "stp x29, x30, [x0, #96]",
    "stp d8, d9, [x0, #112]",
    "stp d10, d11, [x0, #128]",
    "stp d12, d13, [x0, #144]",
    "stp d14, d15, [x0, #160]",
    "ret",
);

// x0: context to save into, x1: context to restore.
// A saved context continues at label 2 with the caller's link register.
asm_function!(
    "drift_context_switch",
    "mov x9, sp",
    "adr x10, 2f",
    "stp x9, x10, [x0, #0]",
    "stp x19, x20, [x0, #16]",
    "stp x21, x22, [x0, #32]",
    "stp x23, x24, [x0, #48]",
    "stp x25, x26, [x0, #64]",
    "stp x27, x28, [x0, #80]",
    "stp x29, x30, [x0, #96]",
    "stp d8, d9, [x0, #112]",
    "stp d10, d11, [x0, #128]",
    "stp d12, d13, [x0, #144]",
    "stp d14, d15, [x0, #160]",
    "ldp x9, x10, [x1, #0]",
    "ldp x19, x20, [x1, #16]",
    "ldp x21, x22, [x1, #32]",
    "ldp x23, x24, [x1, #48]",
    "ldp x25, x26, [x1, #64]",
    "ldp x27, x28, [x1, #80]",
    "ldp x29, x30, [x1, #96]",
    "ldp d8, d9, [x1, #112]",
    "ldp d10, d11, [x1, #128]",
    "ldp d12, d13, [x1, #144]",
    "ldp d14, d15, [x1, #160]",
    "mov sp, x9",
    "br x10",
    "2:",
    "ret",
);

// Entered with sp at the 16-byte aligned stack top.
asm_function!(
    "drift_context_bootstrap",
    ".cfi_startproc",
    ".cfi_undefined x30",
    "mov x0, x20",
    "blr x19",
    "brk #0",
    ".cfi_endproc",
);
