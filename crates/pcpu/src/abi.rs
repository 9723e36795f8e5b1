//! PiOS ABI constants (Registers, Frame Layout, Linker Defaults).
//!
//! This module centralizes the calling-convention and frame-layout facts shared
//! by the code generator, the driver and the tests.

use crate::isa::Register;

// ── Register Assignments ──

/// Return value register (rv).
/// Holds the first return value; the second goes to [`RETURN_REGS`]`[1]`.
pub const RETURN_VALUE_REG: Register = Register::RV;

/// Argument registers, in assignment order.
pub const ARG_REGS: [Register; 4] = [Register::R0, Register::R1, Register::R2, Register::R3];

/// Registers that carry return values.
pub const RETURN_REGS: [Register; 2] = [Register::R0, Register::R1];

/// Scratch register.
/// Breaks cycles when argument moves are sequentialised and backs the
/// emergency spill slot.
pub const SCRATCH_REG: Register = Register::R4;

/// Frame pointer (fp).
pub const FRAME_PTR_REG: Register = Register::FP;

/// Return address register (rca). Written by `call`.
pub const RETURN_ADDR_REG: Register = Register::RCA;

/// Stack pointer (sp). Grows downwards.
pub const STACK_PTR_REG: Register = Register::SP;

/// Registers the allocator never hands out.
pub const RESERVED_REGS: [Register; 3] = [Register::FP, Register::RCA, Register::SP];

/// Registers available to the allocator and the scavenger.
pub const ALLOCATABLE_REGS: [Register; 5] = [
    Register::R0,
    Register::R1,
    Register::R2,
    Register::R3,
    Register::R4,
];

/// Registers a call may clobber.
pub const CALLER_SAVED_REGS: [Register; 5] = ALLOCATABLE_REGS;

// ── Stack Frame Layout ──
//
// Offsets are relative to the frame pointer, which holds the stack pointer at
// entry:
//
//   fp + gap + n   incoming stack argument n
//   fp + 0         saved rca (in the caller's header gap)
//   fp - slot      saved fp
//   fp - slot - k  local objects, emergency spill slot first
//   sp + gap + n   outgoing stack argument n

/// Offset of the saved return address from the frame pointer.
pub const RETURN_ADDR_SLOT: i64 = 0;

/// Largest immediate an `add`/`sub` can apply to the frame pointer.
pub const MAX_ALU_IMM: u64 = 0xFFFF;

/// Largest frame the prologue's single `sub sp, sp, size` can allocate.
pub const MAX_FRAME_SIZE: u64 = MAX_ALU_IMM;

/// Size of one indirect-call expansion in bytes (`rsr.pc`, `add`, `jmp`).
pub const INDIRECT_CALL_RETURN_OFFSET: i64 = 12;

// ── Linker Defaults ──

/// Program entry symbol.
pub const ENTRY_SYMBOL: &str = crate::link::DEFAULT_ENTRY;

/// Linker script looked up under `<sysroot>/lib`.
pub const DEFAULT_LINKER_SCRIPT: &str = "default.ld";

/// Link base address.
pub const LINK_BASE_ADDRESS: u64 = 0;

/// Compiler runtime archive, relative to the sysroot.
pub const COMPILER_RT: &str = "usr/lib/libcompiler_rt.a";
