//! Decoded instruction shapes.
//!
//! Dalvik-style bytecode is variable-width (one to five 16-bit code
//! units per instruction) rather than a fixed 32-bit instruction word,
//! so `Instruction` here is a sum type over operand shapes rather than
//! one fixed-layout struct. `dexprep_asm::decode` turns a code-unit
//! stream into a sequence of these.

use alloc::vec::Vec;
use dexprep_types::{FieldId, MethodId, RegisterId, TypeId};

use crate::panic_reason::{PanicReason, RefKind};

/// Width of an array-element access, used by `aget`/`aput` and instance/static
/// field access opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ArrayWidth {
    /// 8-bit signed (`byte`).
    Byte,
    /// 8-bit boolean.
    Boolean,
    /// 16-bit signed (`short`).
    Short,
    /// 16-bit UTF-16 code unit (`char`).
    Char,
    /// 32-bit integer.
    Int,
    /// 32-bit float.
    Float,
    /// 64-bit integer/long.
    Wide,
    /// Object/array reference.
    Object,
}

impl ArrayWidth {
    /// True if this is the two-register-wide category.
    pub const fn is_wide(self) -> bool {
        matches!(self, ArrayWidth::Wide)
    }

    /// True if this is a reference (object/array) category.
    pub const fn is_object(self) -> bool {
        matches!(self, ArrayWidth::Object)
    }
}

/// How a field is currently referenced: by pool id, or already quickened
/// to a resolved byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldRef {
    /// Unresolved reference into the field pool.
    Pool(FieldId),
    /// Resolved instance-field byte offset (a `*-quick` rewrite).
    QuickOffset(u16),
}

/// The dispatch kind of an `invoke-*` opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InvokeKind {
    /// Dynamic dispatch through the vtable.
    Virtual,
    /// Statically bound: private methods and constructors.
    Direct,
    /// No receiver.
    Static,
    /// Dynamic dispatch through an interface's iftable.
    Interface,
    /// Statically bound to the superclass's vtable slot.
    Super,
}

/// How a method is currently referenced on an `invoke-*` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MethodRef {
    /// Unresolved reference into the method pool.
    Pool(MethodId),
    /// Resolved vtable slot (`invoke-virtual-quick`/`invoke-super-quick`).
    VtableIndex(u16),
    /// Resolved process-wide inline-table slot (`execute-inline`).
    InlineIndex(u16),
    /// The root object's zero-argument constructor (`invoke-object-init`).
    ObjectInit,
}

/// A decoded instruction.
///
/// Variants are grouped by the verifier obligation they carry; the
/// quickened counterparts of a generic opcode reuse the same variant
/// with a `Quick`/`Volatile`-flavored [`FieldRef`]/[`MethodRef`]/`volatile`
/// flag rather than a separate variant, so that the rewriter's idempotence
/// check ("once quickened, no rule matches it again") is a single pattern
/// match on that flag instead of an extra enum discriminant.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Instruction {
    /// No-op, including the "write the trailing unit as a NOP first" filler
    /// the rewriter uses when shrinking an instruction's code-unit count.
    Nop,
    /// `move`/`move-wide`/`move-object`.
    Move {
        dst: RegisterId,
        src: RegisterId,
        width: crate::Width,
    },
    /// `move-result`/`move-result-wide`/`move-result-object`.
    MoveResult {
        dst: RegisterId,
        width: crate::Width,
    },
    /// `move-exception`, legal only as a catch handler's first instruction.
    MoveException { dst: RegisterId },
    /// `const`/`const/4`/`const/16`/`const-wide` family; `value` is sign
    /// extended to 64 bits regardless of the source encoding width.
    Const {
        dst: RegisterId,
        value: i64,
        wide: bool,
    },
    /// `const-string`.
    ConstString {
        dst: RegisterId,
        string: dexprep_types::StringId,
    },
    /// `const-class`.
    ConstClass { dst: RegisterId, ty: TypeId },
    /// `goto`/`goto/16`/`goto/32`.
    Goto { offset: i32 },
    /// `if-eq`/`if-ne`/`if-lt`/`if-ge`/`if-gt`/`if-le`, binary or
    /// compare-with-zero depending on whether `b` is `None`.
    If {
        a: RegisterId,
        b: Option<RegisterId>,
        offset: i32,
    },
    /// `packed-switch`/`sparse-switch`.
    Switch {
        reg: RegisterId,
        targets: Vec<i32>,
    },
    /// `array-length`.
    ArrayLength {
        dst: RegisterId,
        array: RegisterId,
    },
    /// `new-instance`.
    NewInstance { dst: RegisterId, ty: TypeId },
    /// `new-array`.
    NewArray {
        dst: RegisterId,
        size: RegisterId,
        ty: TypeId,
    },
    /// `filled-new-array`.
    FilledNewArray { ty: TypeId, args: Vec<RegisterId> },
    /// `instance-of`.
    InstanceOf {
        dst: RegisterId,
        src: RegisterId,
        ty: TypeId,
    },
    /// `check-cast`.
    CheckCast { reg: RegisterId, ty: TypeId },
    /// `throw`.
    Throw { reg: RegisterId },
    /// `return`/`return-wide`/`return-object`/`return-void`.
    Return {
        reg: Option<RegisterId>,
        width: Option<crate::Width>,
    },
    /// `return-void-barrier`, the memory-fenced form of `return-void`
    /// synthesized for constructors of classes with a `final` instance field.
    ReturnVoidBarrier,
    /// `monitor-enter`.
    MonitorEnter { reg: RegisterId },
    /// `monitor-exit`.
    MonitorExit { reg: RegisterId },
    /// `aget-*`.
    ArrayGet {
        dst: RegisterId,
        array: RegisterId,
        index: RegisterId,
        width: ArrayWidth,
    },
    /// `aput-*`.
    ArrayPut {
        src: RegisterId,
        array: RegisterId,
        index: RegisterId,
        width: ArrayWidth,
    },
    /// `iget-*`/`iget-*-quick`/`iget-*-volatile`.
    InstanceFieldGet {
        dst: RegisterId,
        obj: RegisterId,
        field: FieldRef,
        width: ArrayWidth,
        volatile: bool,
    },
    /// `iput-*`/`iput-*-quick`/`iput-*-volatile`.
    InstanceFieldPut {
        src: RegisterId,
        obj: RegisterId,
        field: FieldRef,
        width: ArrayWidth,
        volatile: bool,
    },
    /// `sget-*`/`sget-*-volatile`.
    StaticFieldGet {
        dst: RegisterId,
        field: FieldId,
        width: ArrayWidth,
        volatile: bool,
    },
    /// `sput-*`/`sput-*-volatile`.
    StaticFieldPut {
        src: RegisterId,
        field: FieldId,
        width: ArrayWidth,
        volatile: bool,
    },
    /// `invoke-*`/`invoke-*-quick`/`execute-inline`/`invoke-object-init`.
    Invoke {
        kind: InvokeKind,
        method: MethodRef,
        args: Vec<RegisterId>,
    },
    /// A unary or binary arithmetic/logic op (`add-int`, `neg-float`, ...);
    /// the verifier only cares about each operand's primitive category, not
    /// the operation performed, so all such opcodes share this shape.
    Arith {
        dst: RegisterId,
        a: RegisterId,
        b: Option<RegisterId>,
        width: crate::Width,
        is_float_domain: bool,
    },
    /// Synthetic instruction committed by the rewriter's deferred-failure
    /// path: replaces an instruction whose reference could not be
    /// resolved, so the method still verifies but traps at run time.
    ThrowVerificationError {
        kind: PanicReason,
        ref_kind: RefKind,
        ref_index: u32,
    },
}

impl Instruction {
    /// True if this instruction is already in some quickened/specialized
    /// form, i.e. a second rewriter pass has nothing left to do with it.
    pub fn is_quickened(&self) -> bool {
        match self {
            Instruction::InstanceFieldGet { field, volatile, .. }
            | Instruction::InstanceFieldPut { field, volatile, .. } => {
                matches!(field, FieldRef::QuickOffset(_)) || *volatile
            }
            Instruction::StaticFieldGet { volatile, .. }
            | Instruction::StaticFieldPut { volatile, .. } => *volatile,
            Instruction::Invoke { method, .. } => !matches!(method, MethodRef::Pool(_)),
            Instruction::ReturnVoidBarrier => true,
            _ => false,
        }
    }
}
