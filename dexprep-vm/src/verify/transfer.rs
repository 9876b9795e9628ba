//! Per-opcode transfer functions and successor-set computation.

use dexprep_asm::{FieldRef, Instruction, InvokeKind};
use dexprep_types::{ClassHandle, InsnAddr, TypeId};

use crate::lattice::{RegisterType, UninitMap, UninitSite};
use crate::regline::RegisterLine;

/// One try range and the handlers that cover it, enough for the verifier
/// to compute exception successors and try-range membership without
/// depending on `dexprep_image`'s pool-indexed representation directly.
#[derive(Debug, Clone)]
pub struct TryRange {
    pub start: InsnAddr,
    pub end: InsnAddr,
    pub handlers: Vec<InsnAddr>,
}

/// Everything about a method's static shape the verifier needs that isn't
/// carried by the instruction stream itself.
#[derive(Debug, Clone)]
pub struct MethodShape {
    pub register_count: usize,
    pub ins_count: usize,
    pub argument_types: Vec<RegisterType>,
    pub owning_class: ClassHandle,
    pub try_ranges: Vec<TryRange>,
}

impl MethodShape {
    pub fn is_in_try_range(&self, addr: InsnAddr) -> bool {
        self.try_ranges.iter().any(|t| addr >= t.start && addr < t.end)
    }

    fn handlers_covering(&self, addr: InsnAddr) -> Vec<InsnAddr> {
        self.try_ranges
            .iter()
            .filter(|t| addr >= t.start && addr < t.end)
            .flat_map(|t| t.handlers.iter().copied())
            .collect()
    }
}

/// The successor addresses of one instruction: normal (fall-through plus
/// any branch/switch targets) and exception (catch handlers covering this
/// address, only relevant if the opcode can throw).
#[derive(Debug, Clone, Default)]
pub struct Successors {
    pub normal: Vec<InsnAddr>,
    pub exception: Vec<InsnAddr>,
    pub falls_through: bool,
}

/// True if `insn` may throw and therefore needs a pre-execution register
/// snapshot when it lies in a try range.
pub fn can_throw(insn: &Instruction) -> bool {
    !matches!(
        insn,
        Instruction::Nop
            | Instruction::Move { .. }
            | Instruction::MoveResult { .. }
            | Instruction::Const { .. }
            | Instruction::Goto { .. }
            | Instruction::If { .. }
    )
}

/// Computes the successor set for `insn` at `addr` (length `len` code
/// units), consulting `shape` for catch-handler coverage.
pub fn successors(shape: &MethodShape, addr: InsnAddr, insn: &Instruction, len: usize) -> Successors {
    let mut s = Successors::default();
    match insn {
        Instruction::Goto { offset } => {
            s.normal.push((addr as i64 + *offset as i64) as InsnAddr);
        }
        Instruction::If { offset, .. } => {
            s.normal.push((addr as i64 + *offset as i64) as InsnAddr);
            s.falls_through = true;
        }
        Instruction::Switch { targets, .. } => {
            for offset in targets {
                s.normal.push((addr as i64 + *offset as i64) as InsnAddr);
            }
            s.falls_through = true;
        }
        Instruction::Throw { .. } | Instruction::Return { .. } | Instruction::ReturnVoidBarrier => {
            s.falls_through = false;
        }
        _ => {
            s.falls_through = true;
        }
    }
    let _ = len;
    if can_throw(insn) {
        s.exception = shape.handlers_covering(addr);
    }
    s
}

fn category_conflict(reason: impl Into<String>) -> String {
    reason.into()
}

/// Applies `insn`'s transfer function to `line`, mutating it in place.
/// Returns `Err(reason)` for any violation of the per-opcode obligations
/// the verifier checks.
#[allow(clippy::too_many_arguments)]
pub fn apply(
    line: &mut RegisterLine,
    insn: &Instruction,
    uninit: &mut UninitMap,
    shape: &MethodShape,
    is_constructor: bool,
    addr: InsnAddr,
) -> Result<(), String> {
    match insn {
        Instruction::Nop => {}
        Instruction::Move { dst, src, .. } => {
            let ty = line.get(*src).cloned().unwrap_or(RegisterType::Unknown);
            line.set(*dst, ty);
        }
        Instruction::MoveResult { dst, width } => {
            let ty = if width.slots() == 2 { RegisterType::Long } else { RegisterType::Integer };
            line.set(*dst, ty);
        }
        Instruction::MoveException { dst } => {
            line.set(*dst, RegisterType::Reference(TypeId::new(0)));
        }
        Instruction::Const { dst, value, wide } => {
            if *wide {
                line.set_wide(*dst, RegisterType::Long);
            } else {
                line.set(*dst, RegisterType::ConstInt(*value as i32));
            }
        }
        Instruction::ConstString { dst, .. } => {
            line.set(*dst, RegisterType::Reference(TypeId::new(0)));
        }
        Instruction::ConstClass { dst, .. } => {
            line.set(*dst, RegisterType::Reference(TypeId::new(0)));
        }
        Instruction::Goto { .. } => {}
        Instruction::If { a, b, .. } => {
            narrow_on_use(line, *a);
            if let Some(b) = b {
                narrow_on_use(line, *b);
            }
        }
        Instruction::Switch { reg, .. } => {
            narrow_on_use(line, *reg);
        }
        Instruction::ArrayLength { dst, array } => {
            require_reference_or_null(line, *array)?;
            line.set(*dst, RegisterType::Integer);
        }
        Instruction::NewInstance { dst, ty } => {
            let site = UninitSite(addr);
            uninit.mark_pending(site);
            line.set(*dst, RegisterType::UninitRef(*ty));
        }
        Instruction::NewArray { dst, ty, .. } => {
            line.set(*dst, RegisterType::Reference(*ty));
        }
        Instruction::FilledNewArray { ty, .. } => {
            let _ = ty;
        }
        Instruction::InstanceOf { dst, src, .. } => {
            require_reference_or_null(line, *src)?;
            line.set(*dst, RegisterType::Integer);
        }
        Instruction::CheckCast { reg, ty } => {
            require_reference_or_null(line, *reg)?;
            line.set(*reg, RegisterType::Reference(*ty));
        }
        Instruction::Throw { reg } => {
            require_reference_or_null(line, *reg)?;
        }
        Instruction::Return { reg, .. } => {
            if reg.is_some() && !line.monitors_balanced() {
                return Err(category_conflict("return with unbalanced monitor stack"));
            }
        }
        Instruction::ReturnVoidBarrier => {
            if !line.monitors_balanced() {
                return Err(category_conflict("return with unbalanced monitor stack"));
            }
        }
        Instruction::MonitorEnter { reg } => {
            require_reference_or_null(line, *reg)?;
            line.monitor_enter(addr).map_err(|e| e.to_string())?;
        }
        Instruction::MonitorExit { reg } => {
            require_reference_or_null(line, *reg)?;
            line.monitor_exit().map_err(|e| e.to_string())?;
        }
        Instruction::ArrayGet { dst, array, index, width } => {
            require_reference_or_null(line, *array)?;
            narrow_on_use(line, *index);
            let ty = if width.is_object() {
                RegisterType::Reference(TypeId::new(0))
            } else if width.is_wide() {
                RegisterType::Long
            } else {
                RegisterType::Integer
            };
            line.set(*dst, ty);
        }
        Instruction::ArrayPut { array, index, .. } => {
            require_reference_or_null(line, *array)?;
            narrow_on_use(line, *index);
        }
        Instruction::InstanceFieldGet { dst, obj, field, width, .. } => {
            check_field_access_receiver(line, *obj, shape, is_constructor, field)?;
            let ty = if width.is_object() {
                RegisterType::Reference(TypeId::new(0))
            } else if width.is_wide() {
                RegisterType::Long
            } else {
                RegisterType::Integer
            };
            line.set(*dst, ty);
        }
        Instruction::InstanceFieldPut { obj, field, .. } => {
            check_field_access_receiver(line, *obj, shape, is_constructor, field)?;
        }
        Instruction::StaticFieldGet { dst, width, .. } => {
            let ty = if width.is_object() {
                RegisterType::Reference(TypeId::new(0))
            } else if width.is_wide() {
                RegisterType::Long
            } else {
                RegisterType::Integer
            };
            line.set(*dst, ty);
        }
        Instruction::StaticFieldPut { .. } => {}
        Instruction::Invoke { kind, method, args } => {
            for arg in args {
                narrow_on_use(line, *arg);
            }
            if matches!(kind, InvokeKind::Direct) && is_object_init(method) {
                if let Some(&receiver) = args.first() {
                    if let Some(RegisterType::UninitThis(_) | RegisterType::UninitRef(_)) = line.get(receiver).cloned() {
                        resolve_uninit_aliases(line, uninit, receiver);
                    }
                }
            }
        }
        Instruction::Arith { dst, a, b, width, is_float_domain } => {
            narrow_on_use(line, *a);
            if let Some(b) = b {
                narrow_on_use(line, *b);
            }
            let ty = if width.slots() == 2 {
                if *is_float_domain { RegisterType::Double } else { RegisterType::Long }
            } else if *is_float_domain {
                RegisterType::Float
            } else {
                RegisterType::Integer
            };
            line.set(*dst, ty);
        }
        Instruction::ThrowVerificationError { .. } => {}
    }
    Ok(())
}

fn is_object_init(method: &dexprep_asm::MethodRef) -> bool {
    matches!(method, dexprep_asm::MethodRef::ObjectInit)
}

fn resolve_uninit_aliases(line: &mut RegisterLine, uninit: &mut UninitMap, receiver: dexprep_types::RegisterId) {
    if let Some(RegisterType::UninitRef(ty)) = line.get(receiver).cloned() {
        for reg in 0..line.len() as u16 {
            if matches!(line.get(reg), Some(RegisterType::UninitRef(t)) if *t == ty) {
                line.set(reg, RegisterType::Reference(ty));
            }
        }
    } else {
        line.set(receiver, RegisterType::Reference(TypeId::new(0)));
    }
    let _ = uninit;
}

fn require_reference_or_null(line: &RegisterLine, reg: dexprep_types::RegisterId) -> Result<(), String> {
    match line.get(reg) {
        Some(RegisterType::Reference(_)) | Some(RegisterType::Null) | Some(RegisterType::Unknown) => Ok(()),
        other => Err(category_conflict(format!("expected a reference in r{reg}, found {other:?}"))),
    }
}

fn check_field_access_receiver(
    line: &mut RegisterLine,
    obj: dexprep_types::RegisterId,
    shape: &MethodShape,
    is_constructor: bool,
    field: &FieldRef,
) -> Result<(), String> {
    let _ = field;
    match line.get(obj).cloned() {
        Some(RegisterType::Reference(_)) | Some(RegisterType::Null) => Ok(()),
        Some(RegisterType::UninitThis(class)) if is_constructor && class == shape.owning_class => Ok(()),
        other => Err(category_conflict(format!("field access on non-reference receiver {other:?}"))),
    }
}

fn narrow_on_use(line: &mut RegisterLine, reg: dexprep_types::RegisterId) {
    if let Some(ty) = line.get(reg).cloned() {
        line.set(reg, ty.narrow_const());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> MethodShape {
        MethodShape {
            register_count: 4,
            ins_count: 1,
            argument_types: Vec::new(),
            owning_class: ClassHandle::ROOT,
            try_ranges: Vec::new(),
        }
    }

    #[test]
    fn const_sets_const_int() {
        let mut line = RegisterLine::new(2);
        let mut uninit = UninitMap::new();
        apply(&mut line, &Instruction::Const { dst: 0, value: 5, wide: false }, &mut uninit, &shape(), false, 0).unwrap();
        assert_eq!(line.get(0), Some(&RegisterType::ConstInt(5)));
    }

    #[test]
    fn array_length_requires_reference() {
        let mut line = RegisterLine::new(2);
        line.set(0, RegisterType::Integer);
        let mut uninit = UninitMap::new();
        let err = apply(
            &mut line,
            &Instruction::ArrayLength { dst: 1, array: 0 },
            &mut uninit,
            &shape(),
            false,
            0,
        );
        assert!(err.is_err());
    }

    #[test]
    fn monitor_exit_without_enter_is_rejected() {
        let mut line = RegisterLine::new(1);
        line.set(0, RegisterType::Reference(TypeId::new(0)));
        let mut uninit = UninitMap::new();
        let err = apply(&mut line, &Instruction::MonitorExit { reg: 0 }, &mut uninit, &shape(), false, 0);
        assert!(err.is_err());
    }

    #[test]
    fn new_instance_marks_pending_and_sets_uninit_ref() {
        let mut line = RegisterLine::new(1);
        let mut uninit = UninitMap::new();
        let ty = TypeId::new(7);
        apply(&mut line, &Instruction::NewInstance { dst: 0, ty }, &mut uninit, &shape(), false, 3).unwrap();
        assert_eq!(line.get(0), Some(&RegisterType::UninitRef(ty)));
        assert!(uninit.is_pending(UninitSite(3)));
    }

    #[test]
    fn narrow_on_use_converts_const_int_to_integer() {
        let mut line = RegisterLine::new(1);
        line.set(0, RegisterType::ConstInt(3));
        narrow_on_use(&mut line, 0);
        assert_eq!(line.get(0), Some(&RegisterType::Integer));
    }

    #[test]
    fn successors_of_goto_is_its_target() {
        let s = successors(&shape(), 10, &Instruction::Goto { offset: -4 }, 1);
        assert_eq!(s.normal, vec![6]);
        assert!(!s.falls_through);
    }

    #[test]
    fn successors_of_if_includes_fallthrough() {
        let s = successors(&shape(), 10, &Instruction::If { a: 0, b: None, offset: 4 }, 1);
        assert_eq!(s.normal, vec![14]);
        assert!(s.falls_through);
    }
}
