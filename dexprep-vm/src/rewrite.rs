//! The instruction rewriter: after verification succeeds (or is skipped,
//! essential-only), substitutes specialized opcodes using facts the
//! linker and verifier established.

use std::collections::HashMap;

use dexprep_asm::quick::SubstitutionClass;
use dexprep_asm::{FieldRef, Instruction, InvokeKind, MethodRef};
use dexprep_types::{FieldId, MethodId};

/// What the linker resolved about one field reference, as far as the
/// rewriter needs to know.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedField {
    pub offset: u16,
    pub volatile: bool,
}

/// What the linker resolved about one method reference.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedMethod {
    pub vtable_index: u16,
    pub is_root_object_init: bool,
}

/// The process-global inline table consulted for `execute-inline`
/// substitution, part of the non-essential tier.
#[derive(Debug, Default, Clone)]
pub struct InlineTable {
    entries: HashMap<MethodId, u16>,
}

impl InlineTable {
    pub fn new() -> Self {
        InlineTable { entries: HashMap::new() }
    }

    pub fn register(&mut self, method: MethodId, index: u16) {
        self.entries.insert(method, index);
    }

    pub fn lookup(&self, method: MethodId) -> Option<u16> {
        self.entries.get(&method).copied()
    }
}

/// Everything [`rewrite_instruction`] needs to resolve a substitution: the
/// linker's field/method facts and the inline table, plus whether this
/// method's owning class has any `final` instance field (needed for the
/// `return-void-barrier` essential substitution) and whether the target
/// memory model requires SMP-essential volatile splitting.
pub struct RewriteContext<'a> {
    pub fields: &'a dyn Fn(FieldId) -> Option<ResolvedField>,
    pub methods: &'a dyn Fn(MethodId) -> Option<ResolvedMethod>,
    pub inline_table: &'a InlineTable,
    pub owning_class_has_final_field: bool,
    pub relaxed_memory_model: bool,
}

/// Applies the first matching substitution, in commit order (Essential,
/// SmpEssential, NonEssential), or returns `insn` unchanged if none
/// applies. Already-quickened instructions are returned as-is, which is
/// what makes running this twice idempotent.
pub fn rewrite_instruction(insn: Instruction, ctx: &RewriteContext) -> Instruction {
    if insn.is_quickened() {
        return insn;
    }
    if let Some(result) = try_essential(&insn, ctx) {
        return result;
    }
    if let Some(result) = try_smp_essential(&insn, ctx) {
        return result;
    }
    if let Some(result) = try_non_essential(&insn, ctx) {
        return result;
    }
    insn
}

fn try_essential(insn: &Instruction, ctx: &RewriteContext) -> Option<Instruction> {
    match insn {
        Instruction::InstanceFieldGet { dst, obj, field: FieldRef::Pool(id), width, .. } if width.is_wide() => {
            let resolved = (ctx.fields)(*id)?;
            resolved.volatile.then(|| Instruction::InstanceFieldGet {
                dst: *dst,
                obj: *obj,
                field: FieldRef::Pool(*id),
                width: *width,
                volatile: true,
            })
        }
        Instruction::InstanceFieldPut { src, obj, field: FieldRef::Pool(id), width, .. } if width.is_wide() => {
            let resolved = (ctx.fields)(*id)?;
            resolved.volatile.then(|| Instruction::InstanceFieldPut {
                src: *src,
                obj: *obj,
                field: FieldRef::Pool(*id),
                width: *width,
                volatile: true,
            })
        }
        Instruction::Invoke { kind: InvokeKind::Direct, method: MethodRef::Pool(id), args } => {
            let resolved = (ctx.methods)(*id)?;
            resolved.is_root_object_init.then(|| Instruction::Invoke {
                kind: InvokeKind::Direct,
                method: MethodRef::ObjectInit,
                args: args.clone(),
            })
        }
        Instruction::Return { reg: None, width: None } => {
            (ctx.owning_class_has_final_field && ctx.relaxed_memory_model).then_some(Instruction::ReturnVoidBarrier)
        }
        _ => None,
    }
}

fn try_smp_essential(insn: &Instruction, ctx: &RewriteContext) -> Option<Instruction> {
    if !ctx.relaxed_memory_model {
        return None;
    }
    match insn {
        Instruction::InstanceFieldGet { dst, obj, field: FieldRef::Pool(id), width, .. } if !width.is_wide() => {
            let resolved = (ctx.fields)(*id)?;
            resolved.volatile.then(|| Instruction::InstanceFieldGet {
                dst: *dst,
                obj: *obj,
                field: FieldRef::Pool(*id),
                width: *width,
                volatile: true,
            })
        }
        Instruction::InstanceFieldPut { src, obj, field: FieldRef::Pool(id), width, .. } if !width.is_wide() => {
            let resolved = (ctx.fields)(*id)?;
            resolved.volatile.then(|| Instruction::InstanceFieldPut {
                src: *src,
                obj: *obj,
                field: FieldRef::Pool(*id),
                width: *width,
                volatile: true,
            })
        }
        Instruction::StaticFieldGet { dst, field, width, .. } => {
            let resolved = (ctx.fields)(*field)?;
            resolved.volatile.then(|| Instruction::StaticFieldGet {
                dst: *dst,
                field: *field,
                width: *width,
                volatile: true,
            })
        }
        Instruction::StaticFieldPut { src, field, width, .. } => {
            let resolved = (ctx.fields)(*field)?;
            resolved.volatile.then(|| Instruction::StaticFieldPut {
                src: *src,
                field: *field,
                width: *width,
                volatile: true,
            })
        }
        _ => None,
    }
}

fn try_non_essential(insn: &Instruction, ctx: &RewriteContext) -> Option<Instruction> {
    match insn {
        Instruction::InstanceFieldGet { dst, obj, field: FieldRef::Pool(id), width, volatile: false } => {
            let resolved = (ctx.fields)(*id)?;
            (!resolved.volatile).then(|| Instruction::InstanceFieldGet {
                dst: *dst,
                obj: *obj,
                field: FieldRef::QuickOffset(resolved.offset),
                width: *width,
                volatile: false,
            })
        }
        Instruction::InstanceFieldPut { src, obj, field: FieldRef::Pool(id), width, volatile: false } => {
            let resolved = (ctx.fields)(*id)?;
            (!resolved.volatile).then(|| Instruction::InstanceFieldPut {
                src: *src,
                obj: *obj,
                field: FieldRef::QuickOffset(resolved.offset),
                width: *width,
                volatile: false,
            })
        }
        Instruction::Invoke { kind: kind @ (InvokeKind::Virtual | InvokeKind::Super), method: MethodRef::Pool(id), args } => {
            if let Some(index) = ctx.inline_table.lookup(*id) {
                return Some(Instruction::Invoke {
                    kind: *kind,
                    method: MethodRef::InlineIndex(index),
                    args: args.clone(),
                });
            }
            let resolved = (ctx.methods)(*id)?;
            Some(Instruction::Invoke {
                kind: *kind,
                method: MethodRef::VtableIndex(resolved.vtable_index),
                args: args.clone(),
            })
        }
        Instruction::Invoke { kind, method: MethodRef::Pool(id), args } => {
            let index = ctx.inline_table.lookup(*id)?;
            Some(Instruction::Invoke {
                kind: *kind,
                method: MethodRef::InlineIndex(index),
                args: args.clone(),
            })
        }
        _ => None,
    }
}

/// Classifies which tier, if any, a given (unquickened) instruction could
/// be rewritten under — exposed for callers that want to report which
/// substitution class ultimately fired, matching [`SubstitutionClass`]'s
/// role as the shared vocabulary between `dexprep_asm` and this rewriter.
pub fn classify(insn: &Instruction) -> Option<SubstitutionClass> {
    match insn {
        Instruction::InstanceFieldGet { width, .. } | Instruction::InstanceFieldPut { width, .. } if width.is_wide() => {
            Some(SubstitutionClass::Essential)
        }
        Instruction::Invoke { kind: InvokeKind::Direct, .. } | Instruction::Return { .. } => {
            Some(SubstitutionClass::Essential)
        }
        Instruction::InstanceFieldGet { .. }
        | Instruction::InstanceFieldPut { .. }
        | Instruction::StaticFieldGet { .. }
        | Instruction::StaticFieldPut { .. } => Some(SubstitutionClass::SmpEssential),
        Instruction::Invoke { .. } => Some(SubstitutionClass::NonEssential),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dexprep_asm::ArrayWidth;

    fn ctx<'a>(
        fields: &'a dyn Fn(FieldId) -> Option<ResolvedField>,
        methods: &'a dyn Fn(MethodId) -> Option<ResolvedMethod>,
        inline_table: &'a InlineTable,
    ) -> RewriteContext<'a> {
        RewriteContext {
            fields,
            methods,
            inline_table,
            owning_class_has_final_field: false,
            relaxed_memory_model: true,
        }
    }

    #[test]
    fn wide_volatile_field_gets_essential_rewrite() {
        let fields = |_: FieldId| Some(ResolvedField { offset: 8, volatile: true });
        let methods = |_: MethodId| None;
        let table = InlineTable::new();
        let insn = Instruction::InstanceFieldGet {
            dst: 0,
            obj: 1,
            field: FieldRef::Pool(FieldId::new(0)),
            width: ArrayWidth::Wide,
            volatile: false,
        };
        let rewritten = rewrite_instruction(insn, &ctx(&fields, &methods, &table));
        assert!(matches!(rewritten, Instruction::InstanceFieldGet { volatile: true, .. }));
    }

    #[test]
    fn non_volatile_narrow_field_gets_quickened_offset() {
        let fields = |_: FieldId| Some(ResolvedField { offset: 12, volatile: false });
        let methods = |_: MethodId| None;
        let table = InlineTable::new();
        let insn = Instruction::InstanceFieldGet {
            dst: 0,
            obj: 1,
            field: FieldRef::Pool(FieldId::new(0)),
            width: ArrayWidth::Int,
            volatile: false,
        };
        let rewritten = rewrite_instruction(insn, &ctx(&fields, &methods, &table));
        assert!(matches!(
            rewritten,
            Instruction::InstanceFieldGet { field: FieldRef::QuickOffset(12), .. }
        ));
    }

    #[test]
    fn invoke_direct_of_object_init_becomes_invoke_object_init() {
        let fields = |_: FieldId| None;
        let methods = |_: MethodId| Some(ResolvedMethod { vtable_index: 0, is_root_object_init: true });
        let table = InlineTable::new();
        let insn = Instruction::Invoke {
            kind: InvokeKind::Direct,
            method: MethodRef::Pool(MethodId::new(0)),
            args: vec![0],
        };
        let rewritten = rewrite_instruction(insn, &ctx(&fields, &methods, &table));
        assert!(matches!(
            rewritten,
            Instruction::Invoke { method: MethodRef::ObjectInit, .. }
        ));
    }

    #[test]
    fn invoke_virtual_inlines_vtable_index() {
        let fields = |_: FieldId| None;
        let methods = |_: MethodId| Some(ResolvedMethod { vtable_index: 7, is_root_object_init: false });
        let table = InlineTable::new();
        let insn = Instruction::Invoke {
            kind: InvokeKind::Virtual,
            method: MethodRef::Pool(MethodId::new(0)),
            args: vec![0],
        };
        let rewritten = rewrite_instruction(insn, &ctx(&fields, &methods, &table));
        assert!(matches!(
            rewritten,
            Instruction::Invoke { method: MethodRef::VtableIndex(7), .. }
        ));
    }

    #[test]
    fn rewrite_is_idempotent_on_already_quickened_instructions() {
        let fields = |_: FieldId| Some(ResolvedField { offset: 99, volatile: false });
        let methods = |_: MethodId| None;
        let table = InlineTable::new();
        let once = Instruction::InstanceFieldGet {
            dst: 0,
            obj: 1,
            field: FieldRef::QuickOffset(12),
            width: ArrayWidth::Int,
            volatile: false,
        };
        let twice = rewrite_instruction(once.clone(), &ctx(&fields, &methods, &table));
        assert_eq!(once, twice);
    }

    #[test]
    fn inline_table_takes_priority_over_vtable_quickening() {
        let fields = |_: FieldId| None;
        let methods = |_: MethodId| Some(ResolvedMethod { vtable_index: 3, is_root_object_init: false });
        let mut table = InlineTable::new();
        table.register(MethodId::new(5), 42);
        let insn = Instruction::Invoke {
            kind: InvokeKind::Virtual,
            method: MethodRef::Pool(MethodId::new(5)),
            args: Vec::new(),
        };
        let rewritten = rewrite_instruction(insn, &ctx(&fields, &methods, &table));
        assert!(matches!(
            rewritten,
            Instruction::Invoke { method: MethodRef::InlineIndex(42), .. }
        ));
    }
}
