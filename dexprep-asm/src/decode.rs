//! Decodes a method's raw code-unit stream into [`Instruction`]s.
//!
//! Each instruction occupies one or more 16-bit code units: the first unit
//! holds an 8-bit opcode tag in its low byte and an 8-bit sub-flags byte in
//! its high byte (width category, volatile bit, wide-operand bit); the
//! following units hold register numbers and literals, tag-dependent.
//! `encode_one` is the rewriter's counterpart, used to commit quickening
//! substitutions back into the unit stream.

use alloc::vec::Vec;
use dexprep_types::{FieldId, InsnAddr, MethodId, RegisterId, StringId, TypeId};

use crate::instruction::{ArrayWidth, FieldRef, InvokeKind, MethodRef};
use crate::panic_reason::{PanicReason, RefKind};
use crate::{Instruction, Width};

/// A code-unit-stream decoding failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The stream ended mid-instruction.
    Truncated,
    /// The opcode tag byte did not name a known instruction.
    UnknownTag(u8),
}

const TAG_NOP: u8 = 0x00;
const TAG_MOVE: u8 = 0x01;
const TAG_MOVE_RESULT: u8 = 0x02;
const TAG_MOVE_EXCEPTION: u8 = 0x03;
const TAG_CONST: u8 = 0x04;
const TAG_CONST_STRING: u8 = 0x05;
const TAG_CONST_CLASS: u8 = 0x06;
const TAG_GOTO: u8 = 0x07;
const TAG_IF: u8 = 0x08;
const TAG_SWITCH: u8 = 0x09;
const TAG_ARRAY_LENGTH: u8 = 0x0a;
const TAG_NEW_INSTANCE: u8 = 0x0b;
const TAG_NEW_ARRAY: u8 = 0x0c;
const TAG_FILLED_NEW_ARRAY: u8 = 0x0d;
const TAG_INSTANCE_OF: u8 = 0x0e;
const TAG_CHECK_CAST: u8 = 0x0f;
const TAG_THROW: u8 = 0x10;
const TAG_RETURN: u8 = 0x11;
const TAG_RETURN_VOID_BARRIER: u8 = 0x12;
const TAG_MONITOR_ENTER: u8 = 0x13;
const TAG_MONITOR_EXIT: u8 = 0x14;
const TAG_AGET: u8 = 0x15;
const TAG_APUT: u8 = 0x16;
const TAG_IGET: u8 = 0x17;
const TAG_IPUT: u8 = 0x18;
const TAG_SGET: u8 = 0x19;
const TAG_SPUT: u8 = 0x1a;
const TAG_INVOKE: u8 = 0x1b;
const TAG_ARITH: u8 = 0x1c;
const TAG_THROW_VERIFY_ERROR: u8 = 0x1d;

fn array_width_from_u8(v: u8) -> Option<ArrayWidth> {
    Some(match v {
        0 => ArrayWidth::Byte,
        1 => ArrayWidth::Boolean,
        2 => ArrayWidth::Short,
        3 => ArrayWidth::Char,
        4 => ArrayWidth::Int,
        5 => ArrayWidth::Float,
        6 => ArrayWidth::Wide,
        7 => ArrayWidth::Object,
        _ => return None,
    })
}

fn array_width_to_u8(w: ArrayWidth) -> u8 {
    match w {
        ArrayWidth::Byte => 0,
        ArrayWidth::Boolean => 1,
        ArrayWidth::Short => 2,
        ArrayWidth::Char => 3,
        ArrayWidth::Int => 4,
        ArrayWidth::Float => 5,
        ArrayWidth::Wide => 6,
        ArrayWidth::Object => 7,
    }
}

fn invoke_kind_from_u8(v: u8) -> Option<InvokeKind> {
    Some(match v {
        0 => InvokeKind::Virtual,
        1 => InvokeKind::Direct,
        2 => InvokeKind::Static,
        3 => InvokeKind::Interface,
        4 => InvokeKind::Super,
        _ => return None,
    })
}

fn invoke_kind_to_u8(k: InvokeKind) -> u8 {
    match k {
        InvokeKind::Virtual => 0,
        InvokeKind::Direct => 1,
        InvokeKind::Static => 2,
        InvokeKind::Interface => 3,
        InvokeKind::Super => 4,
    }
}

struct Reader<'a> {
    units: &'a [u16],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn next(&mut self) -> Result<u16, DecodeError> {
        let v = *self.units.get(self.pos).ok_or(DecodeError::Truncated)?;
        self.pos += 1;
        Ok(v)
    }

    fn next_u32(&mut self) -> Result<u32, DecodeError> {
        let lo = self.next()? as u32;
        let hi = self.next()? as u32;
        Ok(lo | (hi << 16))
    }

    fn next_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(self.next_u32()? as i32)
    }

    fn next_reg(&mut self) -> Result<RegisterId, DecodeError> {
        Ok(self.next()? as RegisterId)
    }
}

/// Decodes the instruction beginning at `units[0]`, returning it and its
/// length in 16-bit units.
pub fn decode_one(units: &[u16]) -> Result<(Instruction, usize), DecodeError> {
    let first = *units.first().ok_or(DecodeError::Truncated)?;
    let tag = (first & 0xff) as u8;
    let flags = (first >> 8) as u8;
    let mut r = Reader { units, pos: 1 };

    let insn = match tag {
        TAG_NOP => Instruction::Nop,
        TAG_MOVE => {
            let width = width_from_flags(flags);
            Instruction::Move {
                dst: r.next_reg()?,
                src: r.next_reg()?,
                width,
            }
        }
        TAG_MOVE_RESULT => Instruction::MoveResult {
            dst: r.next_reg()?,
            width: width_from_flags(flags),
        },
        TAG_MOVE_EXCEPTION => Instruction::MoveException {
            dst: r.next_reg()?,
        },
        TAG_CONST => {
            let wide = flags & 0x1 != 0;
            let value = r.next_i32()? as i64;
            Instruction::Const {
                dst: r.next_reg()?,
                value,
                wide,
            }
        }
        TAG_CONST_STRING => Instruction::ConstString {
            dst: r.next_reg()?,
            string: StringId::new(r.next_u32()?),
        },
        TAG_CONST_CLASS => Instruction::ConstClass {
            dst: r.next_reg()?,
            ty: TypeId::new(r.next_u32()?),
        },
        TAG_GOTO => Instruction::Goto {
            offset: r.next_i32()?,
        },
        TAG_IF => {
            let has_b = flags & 0x1 != 0;
            let a = r.next_reg()?;
            let b = if has_b { Some(r.next_reg()?) } else { None };
            let offset = r.next_i32()?;
            Instruction::If { a, b, offset }
        }
        TAG_SWITCH => {
            let reg = r.next_reg()?;
            let n = r.next()? as usize;
            let mut targets = Vec::with_capacity(n);
            for _ in 0..n {
                targets.push(r.next_i32()?);
            }
            Instruction::Switch { reg, targets }
        }
        TAG_ARRAY_LENGTH => Instruction::ArrayLength {
            dst: r.next_reg()?,
            array: r.next_reg()?,
        },
        TAG_NEW_INSTANCE => Instruction::NewInstance {
            dst: r.next_reg()?,
            ty: TypeId::new(r.next_u32()?),
        },
        TAG_NEW_ARRAY => Instruction::NewArray {
            dst: r.next_reg()?,
            size: r.next_reg()?,
            ty: TypeId::new(r.next_u32()?),
        },
        TAG_FILLED_NEW_ARRAY => {
            let ty = TypeId::new(r.next_u32()?);
            let n = r.next()? as usize;
            let mut args = Vec::with_capacity(n);
            for _ in 0..n {
                args.push(r.next_reg()?);
            }
            Instruction::FilledNewArray { ty, args }
        }
        TAG_INSTANCE_OF => Instruction::InstanceOf {
            dst: r.next_reg()?,
            src: r.next_reg()?,
            ty: TypeId::new(r.next_u32()?),
        },
        TAG_CHECK_CAST => Instruction::CheckCast {
            reg: r.next_reg()?,
            ty: TypeId::new(r.next_u32()?),
        },
        TAG_THROW => Instruction::Throw { reg: r.next_reg()? },
        TAG_RETURN => {
            let has_reg = flags & 0x80 != 0;
            let reg = if has_reg { Some(r.next_reg()?) } else { None };
            let width = if has_reg {
                Some(width_from_flags(flags))
            } else {
                None
            };
            Instruction::Return { reg, width }
        }
        TAG_RETURN_VOID_BARRIER => Instruction::ReturnVoidBarrier,
        TAG_MONITOR_ENTER => Instruction::MonitorEnter { reg: r.next_reg()? },
        TAG_MONITOR_EXIT => Instruction::MonitorExit { reg: r.next_reg()? },
        TAG_AGET => {
            let width = array_width_from_u8(flags).ok_or(DecodeError::UnknownTag(tag))?;
            Instruction::ArrayGet {
                dst: r.next_reg()?,
                array: r.next_reg()?,
                index: r.next_reg()?,
                width,
            }
        }
        TAG_APUT => {
            let width = array_width_from_u8(flags).ok_or(DecodeError::UnknownTag(tag))?;
            Instruction::ArrayPut {
                src: r.next_reg()?,
                array: r.next_reg()?,
                index: r.next_reg()?,
                width,
            }
        }
        TAG_IGET => {
            let width = array_width_from_u8(flags & 0x0f).ok_or(DecodeError::UnknownTag(tag))?;
            let volatile = flags & 0x40 != 0;
            let quick = flags & 0x80 != 0;
            let dst = r.next_reg()?;
            let obj = r.next_reg()?;
            let field = if quick {
                FieldRef::QuickOffset(r.next()?)
            } else {
                FieldRef::Pool(FieldId::new(r.next_u32()?))
            };
            Instruction::InstanceFieldGet {
                dst,
                obj,
                field,
                width,
                volatile,
            }
        }
        TAG_IPUT => {
            let width = array_width_from_u8(flags & 0x0f).ok_or(DecodeError::UnknownTag(tag))?;
            let volatile = flags & 0x40 != 0;
            let quick = flags & 0x80 != 0;
            let src = r.next_reg()?;
            let obj = r.next_reg()?;
            let field = if quick {
                FieldRef::QuickOffset(r.next()?)
            } else {
                FieldRef::Pool(FieldId::new(r.next_u32()?))
            };
            Instruction::InstanceFieldPut {
                src,
                obj,
                field,
                width,
                volatile,
            }
        }
        TAG_SGET => {
            let width = array_width_from_u8(flags & 0x0f).ok_or(DecodeError::UnknownTag(tag))?;
            let volatile = flags & 0x40 != 0;
            Instruction::StaticFieldGet {
                dst: r.next_reg()?,
                field: FieldId::new(r.next_u32()?),
                width,
                volatile,
            }
        }
        TAG_SPUT => {
            let width = array_width_from_u8(flags & 0x0f).ok_or(DecodeError::UnknownTag(tag))?;
            let volatile = flags & 0x40 != 0;
            Instruction::StaticFieldPut {
                src: r.next_reg()?,
                field: FieldId::new(r.next_u32()?),
                width,
                volatile,
            }
        }
        TAG_INVOKE => {
            let kind = invoke_kind_from_u8(flags & 0x0f).ok_or(DecodeError::UnknownTag(tag))?;
            let method_kind = (flags >> 4) & 0x3;
            let method = match method_kind {
                0 => MethodRef::Pool(MethodId::new(r.next_u32()?)),
                1 => MethodRef::VtableIndex(r.next()?),
                2 => MethodRef::InlineIndex(r.next()?),
                _ => MethodRef::ObjectInit,
            };
            let n = r.next()? as usize;
            let mut args = Vec::with_capacity(n);
            for _ in 0..n {
                args.push(r.next_reg()?);
            }
            Instruction::Invoke { kind, method, args }
        }
        TAG_ARITH => {
            let width = width_from_flags(flags);
            let is_float_domain = flags & 0x10 != 0;
            let has_b = flags & 0x20 != 0;
            let dst = r.next_reg()?;
            let a = r.next_reg()?;
            let b = if has_b { Some(r.next_reg()?) } else { None };
            Instruction::Arith {
                dst,
                a,
                b,
                width,
                is_float_domain,
            }
        }
        TAG_THROW_VERIFY_ERROR => {
            let kind = panic_reason_from_u8(flags & 0x0f).ok_or(DecodeError::UnknownTag(tag))?;
            let ref_kind = ref_kind_from_u8((flags >> 4) & 0x3).ok_or(DecodeError::UnknownTag(tag))?;
            let ref_index = r.next_u32()?;
            Instruction::ThrowVerificationError {
                kind,
                ref_kind,
                ref_index,
            }
        }
        other => return Err(DecodeError::UnknownTag(other)),
    };
    Ok((insn, r.pos))
}

fn width_from_flags(flags: u8) -> Width {
    match flags & 0x3 {
        0 => Width::Cat1NonRef,
        1 => Width::Cat1Ref,
        _ => Width::Cat2,
    }
}

fn width_to_flags(width: Width) -> u8 {
    match width {
        Width::Cat1NonRef => 0,
        Width::Cat1Ref => 1,
        Width::Cat2 => 2,
    }
}

fn panic_reason_from_u8(v: u8) -> Option<PanicReason> {
    Some(match v {
        1 => PanicReason::ClassFormatError,
        2 => PanicReason::ClassCircularity,
        3 => PanicReason::NoClassDef,
        4 => PanicReason::IllegalAccess,
        5 => PanicReason::IncompatibleClassChange,
        6 => PanicReason::NoSuchField,
        7 => PanicReason::NoSuchMethod,
        8 => PanicReason::VerifyError,
        9 => PanicReason::LinkageError,
        10 => PanicReason::Instantiation,
        11 => PanicReason::InternalError,
        _ => return None,
    })
}

fn ref_kind_from_u8(v: u8) -> Option<RefKind> {
    Some(match v {
        0 => RefKind::Class,
        1 => RefKind::Field,
        2 => RefKind::Method,
        _ => return None,
    })
}

/// Decodes an entire method body into `(address, instruction, unit_len)`
/// triples. Addresses are in 16-bit-unit offsets, matching how branch
/// offsets and try-range bounds are expressed.
pub fn decode_method(units: &[u16]) -> Result<Vec<(InsnAddr, Instruction, usize)>, DecodeError> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < units.len() {
        let (insn, len) = decode_one(&units[pos..])?;
        out.push((pos as InsnAddr, insn, len));
        pos += len;
    }
    Ok(out)
}

/// Encodes one instruction, appending its code units to `out`. This is the
/// rewriter's write path: quickened variants use the same tag as their
/// generic counterpart with the quick/volatile bits set in the flags byte,
/// so a quickened instruction never round-trips back through a rule that
/// would quicken it again.
pub fn encode_one(insn: &Instruction, out: &mut Vec<u16>) {
    match insn {
        Instruction::Nop => out.push(TAG_NOP as u16),
        Instruction::Move { dst, src, width } => {
            out.push(TAG_MOVE as u16 | ((width_to_flags(*width) as u16) << 8));
            out.push(*dst);
            out.push(*src);
        }
        Instruction::MoveResult { dst, width } => {
            out.push(TAG_MOVE_RESULT as u16 | ((width_to_flags(*width) as u16) << 8));
            out.push(*dst);
        }
        Instruction::MoveException { dst } => {
            out.push(TAG_MOVE_EXCEPTION as u16);
            out.push(*dst);
        }
        Instruction::Const { dst, value, wide } => {
            let flags = if *wide { 1u16 } else { 0 };
            out.push(TAG_CONST as u16 | (flags << 8));
            push_i32(out, *value as i32);
            out.push(*dst);
        }
        Instruction::ConstString { dst, string } => {
            out.push(TAG_CONST_STRING as u16);
            out.push(*dst);
            push_u32(out, string.raw());
        }
        Instruction::ConstClass { dst, ty } => {
            out.push(TAG_CONST_CLASS as u16);
            out.push(*dst);
            push_u32(out, ty.raw());
        }
        Instruction::Goto { offset } => {
            out.push(TAG_GOTO as u16);
            push_i32(out, *offset);
        }
        Instruction::If { a, b, offset } => {
            let flags = if b.is_some() { 1u16 } else { 0 };
            out.push(TAG_IF as u16 | (flags << 8));
            out.push(*a);
            if let Some(b) = b {
                out.push(*b);
            }
            push_i32(out, *offset);
        }
        Instruction::Switch { reg, targets } => {
            out.push(TAG_SWITCH as u16);
            out.push(*reg);
            out.push(targets.len() as u16);
            for t in targets {
                push_i32(out, *t);
            }
        }
        Instruction::ArrayLength { dst, array } => {
            out.push(TAG_ARRAY_LENGTH as u16);
            out.push(*dst);
            out.push(*array);
        }
        Instruction::NewInstance { dst, ty } => {
            out.push(TAG_NEW_INSTANCE as u16);
            out.push(*dst);
            push_u32(out, ty.raw());
        }
        Instruction::NewArray { dst, size, ty } => {
            out.push(TAG_NEW_ARRAY as u16);
            out.push(*dst);
            out.push(*size);
            push_u32(out, ty.raw());
        }
        Instruction::FilledNewArray { ty, args } => {
            out.push(TAG_FILLED_NEW_ARRAY as u16);
            push_u32(out, ty.raw());
            out.push(args.len() as u16);
            out.extend(args.iter().copied());
        }
        Instruction::InstanceOf { dst, src, ty } => {
            out.push(TAG_INSTANCE_OF as u16);
            out.push(*dst);
            out.push(*src);
            push_u32(out, ty.raw());
        }
        Instruction::CheckCast { reg, ty } => {
            out.push(TAG_CHECK_CAST as u16);
            out.push(*reg);
            push_u32(out, ty.raw());
        }
        Instruction::Throw { reg } => {
            out.push(TAG_THROW as u16);
            out.push(*reg);
        }
        Instruction::Return { reg, width } => {
            let flags = if let Some(w) = width {
                0x80u16 | width_to_flags(*w) as u16
            } else {
                0
            };
            out.push(TAG_RETURN as u16 | (flags << 8));
            if let Some(reg) = reg {
                out.push(*reg);
            }
        }
        Instruction::ReturnVoidBarrier => out.push(TAG_RETURN_VOID_BARRIER as u16),
        Instruction::MonitorEnter { reg } => {
            out.push(TAG_MONITOR_ENTER as u16);
            out.push(*reg);
        }
        Instruction::MonitorExit { reg } => {
            out.push(TAG_MONITOR_EXIT as u16);
            out.push(*reg);
        }
        Instruction::ArrayGet {
            dst,
            array,
            index,
            width,
        } => {
            out.push(TAG_AGET as u16 | ((array_width_to_u8(*width) as u16) << 8));
            out.push(*dst);
            out.push(*array);
            out.push(*index);
        }
        Instruction::ArrayPut {
            src,
            array,
            index,
            width,
        } => {
            out.push(TAG_APUT as u16 | ((array_width_to_u8(*width) as u16) << 8));
            out.push(*src);
            out.push(*array);
            out.push(*index);
        }
        Instruction::InstanceFieldGet {
            dst,
            obj,
            field,
            width,
            volatile,
        } => {
            let quick = matches!(field, FieldRef::QuickOffset(_));
            let mut flags = array_width_to_u8(*width) as u16;
            if *volatile {
                flags |= 0x40;
            }
            if quick {
                flags |= 0x80;
            }
            out.push(TAG_IGET as u16 | (flags << 8));
            out.push(*dst);
            out.push(*obj);
            match field {
                FieldRef::Pool(id) => push_u32(out, id.raw()),
                FieldRef::QuickOffset(off) => out.push(*off),
            }
        }
        Instruction::InstanceFieldPut {
            src,
            obj,
            field,
            width,
            volatile,
        } => {
            let quick = matches!(field, FieldRef::QuickOffset(_));
            let mut flags = array_width_to_u8(*width) as u16;
            if *volatile {
                flags |= 0x40;
            }
            if quick {
                flags |= 0x80;
            }
            out.push(TAG_IPUT as u16 | (flags << 8));
            out.push(*src);
            out.push(*obj);
            match field {
                FieldRef::Pool(id) => push_u32(out, id.raw()),
                FieldRef::QuickOffset(off) => out.push(*off),
            }
        }
        Instruction::StaticFieldGet {
            dst,
            field,
            width,
            volatile,
        } => {
            let mut flags = array_width_to_u8(*width) as u16;
            if *volatile {
                flags |= 0x40;
            }
            out.push(TAG_SGET as u16 | (flags << 8));
            out.push(*dst);
            push_u32(out, field.raw());
        }
        Instruction::StaticFieldPut {
            src,
            field,
            width,
            volatile,
        } => {
            let mut flags = array_width_to_u8(*width) as u16;
            if *volatile {
                flags |= 0x40;
            }
            out.push(TAG_SPUT as u16 | (flags << 8));
            out.push(*src);
            push_u32(out, field.raw());
        }
        Instruction::Invoke { kind, method, args } => {
            let method_kind: u16 = match method {
                MethodRef::Pool(_) => 0,
                MethodRef::VtableIndex(_) => 1,
                MethodRef::InlineIndex(_) => 2,
                MethodRef::ObjectInit => 3,
            };
            let flags = invoke_kind_to_u8(*kind) as u16 | (method_kind << 4);
            out.push(TAG_INVOKE as u16 | (flags << 8));
            match method {
                MethodRef::Pool(id) => push_u32(out, id.raw()),
                MethodRef::VtableIndex(idx) | MethodRef::InlineIndex(idx) => out.push(*idx),
                MethodRef::ObjectInit => {}
            }
            out.push(args.len() as u16);
            out.extend(args.iter().copied());
        }
        Instruction::Arith {
            dst,
            a,
            b,
            width,
            is_float_domain,
        } => {
            let mut flags = width_to_flags(*width) as u16;
            if *is_float_domain {
                flags |= 0x10;
            }
            if b.is_some() {
                flags |= 0x20;
            }
            out.push(TAG_ARITH as u16 | (flags << 8));
            out.push(*dst);
            out.push(*a);
            if let Some(b) = b {
                out.push(*b);
            }
        }
        Instruction::ThrowVerificationError {
            kind,
            ref_kind,
            ref_index,
        } => {
            let flags = (*kind as u16) | ((*ref_kind as u16) << 4);
            out.push(TAG_THROW_VERIFY_ERROR as u16 | (flags << 8));
            push_u32(out, *ref_index);
        }
    }
}

fn push_u32(out: &mut Vec<u16>, v: u32) {
    out.push((v & 0xffff) as u16);
    out.push((v >> 16) as u16);
}

fn push_i32(out: &mut Vec<u16>, v: i32) {
    push_u32(out, v as u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(insn: Instruction) {
        let mut units = Vec::new();
        encode_one(&insn, &mut units);
        let (decoded, len) = decode_one(&units).expect("decode");
        assert_eq!(len, units.len());
        assert_eq!(decoded, insn);
    }

    #[test]
    fn nop_roundtrips() {
        roundtrip(Instruction::Nop);
    }

    #[test]
    fn const_roundtrips() {
        roundtrip(Instruction::Const {
            dst: 3,
            value: -5,
            wide: false,
        });
    }

    #[test]
    fn quickened_iget_is_quickened_and_roundtrips() {
        let insn = Instruction::InstanceFieldGet {
            dst: 1,
            obj: 2,
            field: FieldRef::QuickOffset(16),
            width: ArrayWidth::Int,
            volatile: false,
        };
        assert!(insn.is_quickened());
        roundtrip(insn);
    }

    #[test]
    fn invoke_with_args_roundtrips() {
        roundtrip(Instruction::Invoke {
            kind: InvokeKind::Virtual,
            method: MethodRef::Pool(MethodId::new(9)),
            args: alloc::vec![0, 1, 2],
        });
    }

    #[test]
    fn decode_method_walks_sequential_addresses() {
        let mut units = Vec::new();
        encode_one(&Instruction::Nop, &mut units);
        encode_one(
            &Instruction::Const {
                dst: 0,
                value: 1,
                wide: false,
            },
            &mut units,
        );
        let decoded = decode_method(&units).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].0, 0);
        assert_eq!(decoded[1].0, 1);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let units = [0xffu16];
        assert_eq!(decode_one(&units), Err(DecodeError::UnknownTag(0xff)));
    }
}
