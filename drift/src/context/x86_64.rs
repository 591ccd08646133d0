//! x86_64 System V backend.
//!
//! | Slot | Offset | Contents                                  |
//! |------|--------|-------------------------------------------|
//! | 0    | 0x00   | rsp                                       |
//! | 1    | 0x08   | rip                                       |
//! | 2    | 0x10   | rbx                                       |
//! | 3    | 0x18   | rbp                                       |
//! | 4    | 0x20   | r12, entry function of a fresh context    |
//! | 5    | 0x28   | r13, argument of a fresh context          |
//! | 6    | 0x30   | r14                                       |
//! | 7    | 0x38   | r15                                       |
//! | 8    | 0x40   | MXCSR (low half), x87 control word (0x44) |
//! | 9    | 0x48   | padding                                   |

use super::Context;

pub const SLOTS: usize = 10;

pub const SP:    usize = 0;
pub const PC:    usize = 1;
pub const ENTRY: usize = 4;
pub const ARG:   usize = 5;

/// rbp.
pub const CLEARED: &[usize] = &[3];

extern "C"
{
    pub fn drift_context_capture(ctx: *mut Context);
    pub fn drift_context_switch(from: *mut Context, to: *const Context);
    pub fn drift_context_bootstrap();
}

// rdi: context to fill.
// The saved stack pointer is the caller's, after this function returns.
asm_function!(
    "drift_context_capture",
    "lea rax, [rsp + 8]",
    "mov [rdi + 0x00], rax",
    "mov rax, [rsp]",
    "mov [rdi + 0x08], rax",
    "mov [rdi + 0x10], rbx",
    "mov [rdi + 0x18], rbp",
    "mov [rdi + 0x20], r12",
    "mov [rdi + 0x28], r13",
    "mov [rdi + 0x30], r14",
    "mov [rdi + 0x38], r15",
    "stmxcsr dword ptr [rdi + 0x40]",
    "fnstcw word ptr [rdi + 0x44]",
    "ret",
);

// rdi: context to save into, rsi: context to restore.
// A saved context continues at label 2 with rsp pointing at
// the return address of the call that saved it.
asm_function!(
    "drift_context_switch",
    "lea rax, [rip + 2f]",
    "mov [rdi + 0x00], rsp",
    "mov [rdi + 0x08], rax",
    "mov [rdi + 0x10], rbx",
    "mov [rdi + 0x18], rbp",
    "mov [rdi + 0x20], r12",
    "mov [rdi + 0x28], r13",
    "mov [rdi + 0x30], r14",
    "mov [rdi + 0x38], r15",
    "stmxcsr dword ptr [rdi + 0x40]",
    "fnstcw word ptr [rdi + 0x44]",
    "mov rsp, [rsi + 0x00]",
    "mov rbx, [rsi + 0x10]",
    "mov rbp, [rsi + 0x18]",
    "mov r12, [rsi + 0x20]",
    "mov r13, [rsi + 0x28]",
    "mov r14, [rsi + 0x30]",
    "mov r15, [rsi + 0x38]",
    "ldmxcsr dword ptr [rsi + 0x40]",
    "fldcw word ptr [rsi + 0x44]",
    "jmp qword ptr [rsi + 0x08]",
    "2:",
    "ret",
);

// Entered with rsp at the 16-byte aligned stack top.
// The call pushes the return address slot the entry expects.
asm_function!(
    "drift_context_bootstrap",
    ".cfi_startproc",
    ".cfi_undefined rip",
    "mov rdi, r13",
    "call r12",
    "ud2",
    ".cfi_endproc",
);

#[cfg(test)]
mod tests
{
    use {super::*, std::mem::size_of};

    #[test]
    fn slots_cover_the_assembly_offsets()
    {
        // The last offset written by the assembly is the x87 control word.
        assert!(size_of::<Context>() >= 0x46);
        assert_eq!(size_of::<Context>(), SLOTS * 8);
    }
}
