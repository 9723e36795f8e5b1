// Machine-level code generation: frames, calls, branches and emission.

#![allow(
    clippy::cast_possible_truncation, // frame sizes are bounded before narrowing
    clippy::cast_possible_wrap,       // offsets are signed views of frame sizes
    clippy::cast_sign_loss            // offsets are negated back into immediates
)]

pub mod branch;
pub mod calling_conv;
pub mod frame;
pub mod frame_lowering;
pub mod lower;
pub mod mir;
pub mod scavenger;

pub use branch::{BranchKind, analyze_branch, simplify_branches};
pub use calling_conv::{
    ArgInfo, ArgLocation, CallLayout, CallSite, CallingConvention, IncomingArg,
    sequentialize_moves,
};
pub use frame::{FrameInfo, FrameObject};
pub use frame_lowering::FrameLowering;
pub use lower::{compile_function, emit_function};
pub use mir::{
    BlockId, CallTarget, FrameIndex, MachineBlock, MachineFunction, MachineInstr, RegSet,
};
pub use scavenger::{Liveness, RegScavenger};
