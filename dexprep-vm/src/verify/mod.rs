//! The method verifier: a forward work-list data-flow analysis over
//! [`crate::regline::RegisterLine`], proving every register use is
//! type-safe before the rewriter is allowed to run.

mod transfer;

pub use transfer::{MethodShape, Successors, TryRange};

use std::collections::BTreeSet;

use dexprep_asm::Instruction;
use dexprep_types::InsnAddr;

use crate::lattice::{RegisterType, UninitMap};
use crate::regline::MonitorError;
use crate::regtable::{InterestingAddressPolicy, RegisterTable};

/// Failure of verification, carrying the offending instruction's address.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
#[non_exhaustive]
pub enum VerifyError {
    #[display("at {addr}: {reason}")]
    TypeError { addr: InsnAddr, reason: String },
    #[display("at {addr}: register {reg} used while uninitialized")]
    UseOfUninitialized { addr: InsnAddr, reg: u16 },
    #[display("constructor returns without calling a superclass constructor")]
    ConstructorReturnsUninitialized,
    #[display("at {addr}: {source}")]
    Monitor { addr: InsnAddr, source: MonitorError },
    #[display("at {addr}: branch target out of range")]
    BadBranchTarget { addr: InsnAddr },
}

impl std::error::Error for VerifyError {}

/// Runs the fixed-point verifier over one method's decoded instruction
/// stream, returning the populated [`RegisterTable`] on success (useful
/// for downstream register-map generation) or the first failure
/// encountered.
///
/// `is_constructor` marks `<init>` methods, which get the
/// uninitialized-`this` argument-0 seeding and the post-fixed-point
/// "no uninitialized this on any return path" check.
pub fn verify_method(
    shape: &MethodShape,
    instructions: &[(InsnAddr, Instruction, usize)],
    is_constructor: bool,
    policy: InterestingAddressPolicy,
) -> Result<RegisterTable, VerifyError> {
    let mut table = RegisterTable::new(shape.register_count, policy);
    let mut uninit = UninitMap::new();

    seed_arguments(&mut table, shape, is_constructor);

    let by_addr: std::collections::BTreeMap<InsnAddr, (&Instruction, usize)> =
        instructions.iter().map(|(addr, insn, len)| (*addr, (insn, *len))).collect();

    let mut changed: BTreeSet<InsnAddr> = BTreeSet::new();
    changed.insert(0);

    // Seed every saved line referenced by a branch/catch target so the
    // first merge into it has something to merge against; real targets
    // are discovered as instructions are processed, so this starts empty
    // and grows via `merge_into`.
    let mut restarted_once = false;

    while let Some(&addr) = changed.iter().next() {
        changed.remove(&addr);
        let Some(&(insn, len)) = by_addr.get(&addr) else {
            return Err(VerifyError::BadBranchTarget { addr });
        };

        if let Some(saved) = table.saved(addr).cloned() {
            table.load_into_work(&saved);
        }

        let throws_in_try_range = shape.is_in_try_range(addr) && transfer::can_throw(insn);
        if throws_in_try_range {
            table.snapshot_work_at(addr);
        }

        transfer::apply(table.work_mut(), insn, &mut uninit, shape, is_constructor, addr)
            .map_err(|reason| VerifyError::TypeError { addr, reason })?;

        let successors = transfer::successors(shape, addr, insn, len);
        for target in &successors.normal {
            if table.merge_into(*target) {
                changed.insert(*target);
            }
        }
        let pre_execution = table.saved(addr).cloned();
        if let Some(line) = pre_execution {
            for target in &successors.exception {
                if table.merge_line_into(*target, &line) {
                    changed.insert(*target);
                }
            }
        }

        if successors.falls_through {
            let next = addr + len as InsnAddr;
            if by_addr.contains_key(&next) {
                changed.insert(next);
            }
        }

        if changed.is_empty() && !restarted_once {
            restarted_once = true;
            changed.insert(0);
        }
    }

    if is_constructor {
        check_constructor_returns_initialized(&by_addr, &mut table, shape)?;
    }

    Ok(table)
}

fn seed_arguments(table: &mut RegisterTable, shape: &MethodShape, is_constructor: bool) {
    let first_arg_reg = shape.register_count - shape.ins_count;
    let work = table.work_mut();
    for (offset, arg_ty) in shape.argument_types.iter().enumerate() {
        let reg = (first_arg_reg + offset) as u16;
        work.set(reg, arg_ty.clone());
    }
    if is_constructor && !shape.argument_types.is_empty() {
        if let RegisterType::Reference(_) = &shape.argument_types[0] {
            work.set(first_arg_reg as u16, RegisterType::UninitThis(shape.owning_class));
        }
    }
    table.snapshot_work_at(0);
}

fn check_constructor_returns_initialized(
    by_addr: &std::collections::BTreeMap<InsnAddr, (&Instruction, usize)>,
    table: &mut RegisterTable,
    shape: &MethodShape,
) -> Result<(), VerifyError> {
    let first_arg_reg = (shape.register_count - shape.ins_count) as u16;
    for (&addr, (insn, _)) in by_addr.iter() {
        if matches!(insn, Instruction::Return { .. } | Instruction::ReturnVoidBarrier) {
            if let Some(line) = table.saved(addr) {
                if matches!(line.get(first_arg_reg), Some(RegisterType::UninitThis(_))) {
                    return Err(VerifyError::ConstructorReturnsUninitialized);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(register_count: usize, ins_count: usize, owning_class: dexprep_types::ClassHandle) -> MethodShape {
        MethodShape {
            register_count,
            ins_count,
            argument_types: vec![RegisterType::Reference(dexprep_types::TypeId::new(0))],
            owning_class,
            try_ranges: Vec::new(),
        }
    }

    #[test]
    fn trivial_return_void_method_verifies() {
        let s = shape(1, 1, dexprep_types::ClassHandle::ROOT);
        let instructions = vec![(0u32, Instruction::Return { reg: None, width: None }, 1usize)];
        let result = verify_method(&s, &instructions, false, InterestingAddressPolicy::BranchTargetsAndHandlers);
        assert!(result.is_ok());
    }

    #[test]
    fn constructor_returning_without_super_init_fails() {
        let s = shape(1, 1, dexprep_types::ClassHandle::ROOT);
        let instructions = vec![(0u32, Instruction::Return { reg: None, width: None }, 1usize)];
        let result = verify_method(&s, &instructions, true, InterestingAddressPolicy::BranchTargetsAndHandlers);
        assert_eq!(result.unwrap_err(), VerifyError::ConstructorReturnsUninitialized);
    }

    #[test]
    fn unknown_successor_address_is_a_bad_branch_target() {
        let s = shape(1, 1, dexprep_types::ClassHandle::ROOT);
        let instructions = vec![(0u32, Instruction::Goto { offset: 5 }, 1usize)];
        let result = verify_method(&s, &instructions, false, InterestingAddressPolicy::BranchTargetsAndHandlers);
        assert!(matches!(result, Err(VerifyError::BadBranchTarget { .. })));
    }
}
