//! Terminator analysis and rewriting over machine blocks.

use super::mir::{BlockId, MachineBlock, MachineFunction, MachineInstr};
use crate::isa::{BranchTarget, CondCode, Instruction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    /// No terminator.
    Fallthrough,
    Unconditional(BlockId),
    /// `otherwise: None` falls through when the condition fails.
    Conditional {
        cond: CondCode,
        taken: BlockId,
        otherwise: Option<BlockId>,
    },
    /// Return or a jump through a register.
    Indirect,
}

/// Classifies the terminators of `block`. `None` when they do not form one
/// of the recognised shapes.
#[must_use]
pub fn analyze_branch(block: &MachineBlock) -> Option<BranchKind> {
    let terminators = &block.instrs[block.first_terminator()..];
    match terminators {
        [] => Some(BranchKind::Fallthrough),
        [
            MachineInstr::Jump {
                cond: CondCode::T,
                target,
            },
        ] => Some(BranchKind::Unconditional(*target)),
        [MachineInstr::Jump { cond, target }] => Some(BranchKind::Conditional {
            cond: *cond,
            taken: *target,
            otherwise: None,
        }),
        [
            MachineInstr::Jump { cond, target },
            MachineInstr::Jump {
                cond: CondCode::T,
                target: otherwise,
            },
        ] if *cond != CondCode::T => Some(BranchKind::Conditional {
            cond: *cond,
            taken: *target,
            otherwise: Some(*otherwise),
        }),
        [MachineInstr::Ret]
        | [
            MachineInstr::Real(Instruction::Branch {
                cond: CondCode::T,
                target: BranchTarget::Reg(_),
            }),
        ] => Some(BranchKind::Indirect),
        _ => None,
    }
}

/// The condition with the opposite outcome. `None` for `T` and `OVF`.
#[must_use]
pub fn reverse_branch_condition(cond: CondCode) -> Option<CondCode> {
    cond.negation()
}

/// Removes trailing block jumps. Returns how many were removed.
pub fn remove_branch(block: &mut MachineBlock) -> usize {
    let mut removed = 0;
    while let Some(MachineInstr::Jump { .. }) = block.instrs.last() {
        block.instrs.pop();
        removed += 1;
    }
    removed
}

/// Appends a jump to `taken` under `cond`, then an unconditional jump to
/// `otherwise` if given. Returns how many jumps were added.
///
/// # Panics
/// If `otherwise` is given for an unconditional `cond`.
pub fn insert_branch(
    block: &mut MachineBlock,
    taken: BlockId,
    cond: CondCode,
    otherwise: Option<BlockId>,
) -> usize {
    block.push(MachineInstr::Jump {
        cond,
        target: taken,
    });
    let Some(otherwise) = otherwise else {
        return 1;
    };
    assert!(cond != CondCode::T, "two-way branch needs a condition");
    block.push(MachineInstr::Jump {
        cond: CondCode::T,
        target: otherwise,
    });
    2
}

/// Successor blocks of `id`. Unanalyzable blocks report every jump target
/// plus the fallthrough block.
#[must_use]
pub fn successors(mf: &MachineFunction, id: BlockId) -> Vec<BlockId> {
    let next = (id.0 + 1 < mf.blocks.len()).then_some(BlockId(id.0 + 1));
    let block = &mf.blocks[id.0];
    match analyze_branch(block) {
        Some(BranchKind::Fallthrough) => next.into_iter().collect(),
        Some(BranchKind::Unconditional(target)) => vec![target],
        Some(BranchKind::Conditional {
            taken, otherwise, ..
        }) => std::iter::once(taken).chain(otherwise.or(next)).collect(),
        Some(BranchKind::Indirect) => Vec::new(),
        None => {
            let mut out: Vec<BlockId> = block
                .instrs
                .iter()
                .filter_map(|inst| match inst {
                    MachineInstr::Jump { target, .. } => Some(*target),
                    _ => None,
                })
                .collect();
            out.extend(next);
            out.dedup();
            out
        }
    }
}

/// Drops jumps to the layout successor and turns `jcc next; jmp other` into
/// `j!cc other`. Returns the number of blocks changed.
pub fn simplify_branches(mf: &mut MachineFunction) -> usize {
    let mut changed = 0;
    for index in 0..mf.blocks.len() {
        let next = BlockId(index + 1);
        let block = &mut mf.blocks[index];
        match analyze_branch(block) {
            Some(BranchKind::Unconditional(target)) if target == next => {
                remove_branch(block);
            }
            Some(BranchKind::Conditional {
                cond,
                taken,
                otherwise: Some(otherwise),
            }) if otherwise == next => {
                remove_branch(block);
                insert_branch(block, taken, cond, None);
            }
            Some(BranchKind::Conditional {
                cond,
                taken,
                otherwise: Some(otherwise),
            }) if taken == next => {
                let Some(reversed) = reverse_branch_condition(cond) else {
                    continue;
                };
                remove_branch(block);
                insert_branch(block, otherwise, reversed, None);
            }
            _ => continue,
        }
        changed += 1;
    }
    if changed > 0 {
        tracing::trace!(function = %mf.name, changed, "simplified branches");
    }
    changed
}
