//! Decodes the class-data region of an inbound image: the string pool,
//! type/proto/field/method id tables, and the per-class definitions that
//! reference them. `format.rs` defines the shapes this module populates;
//! everything here is a pure function of the raw bytes plus the header's
//! per-table offsets.

use alloc::string::String;
use alloc::vec::Vec;
use dexprep_types::cursor::Cursor;
use dexprep_types::{ClassDefIdx, FieldId, MethodId, ProtoId, StringId, TypeId};

use crate::error::FormatError;
use crate::format::{
    self, AccessFlags, CatchHandler, ClassDef, CodeItem, FieldDef, ImageHeader, MethodDef,
    StringPool, TryItem,
};
use crate::validate;

/// A decoded method prototype: return type plus parameter types, in order.
#[derive(Debug, Clone)]
pub struct ProtoShape {
    pub return_type: TypeId,
    pub param_types: Vec<TypeId>,
}

/// One entry of the field-reference pool: the field's declaring class,
/// type, and name, each still a pool id until a class def resolves them.
#[derive(Debug, Clone, Copy)]
pub struct FieldIdEntry {
    pub class_type: TypeId,
    pub type_desc: TypeId,
    pub name: StringId,
}

/// One entry of the method-reference pool.
#[derive(Debug, Clone, Copy)]
pub struct MethodIdEntry {
    pub class_type: TypeId,
    pub proto: ProtoId,
    pub name: StringId,
}

/// The fully-decoded, not-yet-linked image: every table a class def or a
/// field/method reference can index into.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub header: ImageHeader,
    pub strings: StringPool,
    pub type_ids: Vec<StringId>,
    pub protos: Vec<ProtoShape>,
    pub field_ids: Vec<FieldIdEntry>,
    pub method_ids: Vec<MethodIdEntry>,
    pub classes: Vec<ClassDef>,
}

impl DecodedImage {
    /// The descriptor string naming `id`, e.g. `"Ljava/lang/Object;"`.
    pub fn type_descriptor(&self, id: TypeId) -> Result<&str, FormatError> {
        let sid = *self
            .type_ids
            .get(id.raw() as usize)
            .ok_or(FormatError::PoolIndexOutOfBounds {
                index: id.raw(),
                len: self.type_ids.len() as u32,
            })?;
        self.strings.get(sid)
    }

    /// The prototype shape for `id`.
    pub fn proto(&self, id: ProtoId) -> Result<&ProtoShape, FormatError> {
        self.protos
            .get(id.raw() as usize)
            .ok_or(FormatError::PoolIndexOutOfBounds {
                index: id.raw(),
                len: self.protos.len() as u32,
            })
    }
}

/// Validates and decodes a pool entry that names a declaration-site member
/// (so `<init>`/`<clinit>` are permitted).
fn resolve_name(strings: &StringPool, id: StringId) -> Result<String, FormatError> {
    let s = strings.get(id)?;
    format::check_member_name(s.as_bytes(), true)
}

fn seek(c: &mut Cursor<'_>, offset: u32) -> Result<(), FormatError> {
    c.seek(offset as usize).ok_or(FormatError::Truncated)
}

fn read_u32(c: &mut Cursor<'_>) -> Result<u32, FormatError> {
    c.u32().ok_or(FormatError::Truncated)
}

fn read_u16(c: &mut Cursor<'_>) -> Result<u16, FormatError> {
    c.u16().ok_or(FormatError::Truncated)
}

fn type_id_or_none(raw: u32) -> Option<TypeId> {
    if raw == u32::MAX {
        None
    } else {
        Some(TypeId::new(raw))
    }
}

fn decode_strings(bytes: &[u8], off: u32, count: u32) -> Result<StringPool, FormatError> {
    let mut c = Cursor::new(bytes);
    seek(&mut c, off)?;
    let mut strings = Vec::with_capacity(count as usize);
    for index in 0..count {
        let len = c.uleb128().ok_or(FormatError::Truncated)?;
        let raw = c
            .take(len as usize)
            .ok_or(FormatError::InvalidStringPoolEntry { index })?;
        let s = dexprep_types::mutf8::decode(raw)
            .map_err(|_| FormatError::InvalidStringPoolEntry { index })?;
        strings.push(s);
    }
    Ok(StringPool::from_strings(strings))
}

fn decode_type_ids(
    bytes: &[u8],
    off: u32,
    count: u32,
    strings: &StringPool,
) -> Result<Vec<StringId>, FormatError> {
    let mut c = Cursor::new(bytes);
    seek(&mut c, off)?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let raw = read_u32(&mut c)?;
        let sid = StringId::from(raw);
        let s = strings.get(sid)?;
        validate::validate_descriptor(s.as_bytes())?;
        out.push(sid);
    }
    Ok(out)
}

fn decode_protos(bytes: &[u8], off: u32, count: u32) -> Result<Vec<ProtoShape>, FormatError> {
    let mut c = Cursor::new(bytes);
    seek(&mut c, off)?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let return_type = TypeId::new(read_u32(&mut c)?);
        let param_count = read_u32(&mut c)?;
        let mut param_types = Vec::with_capacity(param_count as usize);
        for _ in 0..param_count {
            param_types.push(TypeId::new(read_u32(&mut c)?));
        }
        out.push(ProtoShape {
            return_type,
            param_types,
        });
    }
    Ok(out)
}

fn decode_field_ids(bytes: &[u8], off: u32, count: u32) -> Result<Vec<FieldIdEntry>, FormatError> {
    let mut c = Cursor::new(bytes);
    seek(&mut c, off)?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let class_type = TypeId::new(read_u32(&mut c)?);
        let type_desc = TypeId::new(read_u32(&mut c)?);
        let name = StringId::from(read_u32(&mut c)?);
        out.push(FieldIdEntry {
            class_type,
            type_desc,
            name,
        });
    }
    Ok(out)
}

fn decode_method_ids(
    bytes: &[u8],
    off: u32,
    count: u32,
) -> Result<Vec<MethodIdEntry>, FormatError> {
    let mut c = Cursor::new(bytes);
    seek(&mut c, off)?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let class_type = TypeId::new(read_u32(&mut c)?);
        let proto = ProtoId::new(read_u32(&mut c)?);
        let name = StringId::from(read_u32(&mut c)?);
        out.push(MethodIdEntry {
            class_type,
            proto,
            name,
        });
    }
    Ok(out)
}

fn decode_try_item(c: &mut Cursor<'_>) -> Result<TryItem, FormatError> {
    let start_addr = read_u32(c)?;
    let end_addr = read_u32(c)?;
    let handler_count = read_u32(c)?;
    let mut handlers = Vec::with_capacity(handler_count as usize);
    for _ in 0..handler_count {
        let exception_raw = read_u32(c)?;
        let handler_addr = read_u32(c)?;
        handlers.push(CatchHandler {
            exception_type: type_id_or_none(exception_raw),
            handler_addr,
        });
    }
    Ok(TryItem {
        start_addr,
        end_addr,
        handlers,
    })
}

fn decode_code_item(c: &mut Cursor<'_>) -> Result<CodeItem, FormatError> {
    let registers_size = read_u16(c)?;
    let ins_size = read_u16(c)?;
    let outs_size = read_u16(c)?;
    let insns_size = read_u32(c)?;
    let mut insns = Vec::with_capacity(insns_size as usize);
    for _ in 0..insns_size {
        insns.push(read_u16(c)?);
    }
    let tries_size = read_u32(c)?;
    let mut tries = Vec::with_capacity(tries_size as usize);
    for _ in 0..tries_size {
        tries.push(decode_try_item(c)?);
    }
    let code = CodeItem {
        registers_size,
        ins_size,
        outs_size,
        insns,
        tries,
    };
    code.validate_try_catch()?;
    Ok(code)
}

fn decode_field_def(
    c: &mut Cursor<'_>,
    strings: &StringPool,
    field_ids: &[FieldIdEntry],
) -> Result<FieldDef, FormatError> {
    let field_idx = read_u32(c)?;
    let access_raw = read_u32(c)?;
    let entry = field_ids
        .get(field_idx as usize)
        .ok_or(FormatError::MalformedFieldRef {
            field: FieldId::new(field_idx),
        })?;
    Ok(FieldDef {
        field_id: FieldId::new(field_idx),
        name: resolve_name(strings, entry.name)?,
        type_desc: entry.type_desc,
        access_flags: AccessFlags::from_bits_truncate(access_raw),
    })
}

fn decode_method_def(
    c: &mut Cursor<'_>,
    strings: &StringPool,
    protos: &[ProtoShape],
    method_ids: &[MethodIdEntry],
) -> Result<MethodDef, FormatError> {
    let method_idx = read_u32(c)?;
    let access_raw = read_u32(c)?;
    let has_code = read_u32(c)?;
    let entry = method_ids
        .get(method_idx as usize)
        .ok_or(FormatError::MalformedMethodRef {
            method: MethodId::new(method_idx),
        })?;
    let shape = protos
        .get(entry.proto.raw() as usize)
        .ok_or(FormatError::PoolIndexOutOfBounds {
            index: entry.proto.raw(),
            len: protos.len() as u32,
        })?;
    let code = if has_code != 0 {
        Some(decode_code_item(c)?)
    } else {
        None
    };
    Ok(MethodDef {
        method_id: MethodId::new(method_idx),
        name: resolve_name(strings, entry.name)?,
        proto: entry.proto,
        param_types: shape.param_types.clone(),
        return_type: shape.return_type,
        access_flags: AccessFlags::from_bits_truncate(access_raw),
        code,
    })
}

fn decode_class_def(
    c: &mut Cursor<'_>,
    idx: ClassDefIdx,
    strings: &StringPool,
    protos: &[ProtoShape],
    field_ids: &[FieldIdEntry],
    method_ids: &[MethodIdEntry],
) -> Result<ClassDef, FormatError> {
    let class_type = TypeId::new(read_u32(c)?);
    let access_flags = AccessFlags::from_bits_truncate(read_u32(c)?);
    let superclass_type = type_id_or_none(read_u32(c)?);

    let interfaces_count = read_u32(c)?;
    let mut interfaces = Vec::with_capacity(interfaces_count as usize);
    for _ in 0..interfaces_count {
        interfaces.push(TypeId::new(read_u32(c)?));
    }

    let static_fields_count = read_u32(c)?;
    let mut static_fields = Vec::with_capacity(static_fields_count as usize);
    for _ in 0..static_fields_count {
        static_fields.push(decode_field_def(c, strings, field_ids)?);
    }

    let instance_fields_count = read_u32(c)?;
    let mut instance_fields = Vec::with_capacity(instance_fields_count as usize);
    for _ in 0..instance_fields_count {
        instance_fields.push(decode_field_def(c, strings, field_ids)?);
    }

    let direct_methods_count = read_u32(c)?;
    let mut direct_methods = Vec::with_capacity(direct_methods_count as usize);
    for _ in 0..direct_methods_count {
        direct_methods.push(decode_method_def(c, strings, protos, method_ids)?);
    }

    let virtual_methods_count = read_u32(c)?;
    let mut virtual_methods = Vec::with_capacity(virtual_methods_count as usize);
    for _ in 0..virtual_methods_count {
        virtual_methods.push(decode_method_def(c, strings, protos, method_ids)?);
    }

    Ok(ClassDef {
        idx,
        class_type,
        access_flags,
        superclass_type,
        interfaces,
        static_fields,
        instance_fields,
        direct_methods,
        virtual_methods,
    })
}

fn decode_class_defs(
    bytes: &[u8],
    off: u32,
    count: u32,
    strings: &StringPool,
    protos: &[ProtoShape],
    field_ids: &[FieldIdEntry],
    method_ids: &[MethodIdEntry],
) -> Result<Vec<ClassDef>, FormatError> {
    let mut c = Cursor::new(bytes);
    seek(&mut c, off)?;
    let mut out = Vec::with_capacity(count as usize);
    for i in 0..count {
        out.push(decode_class_def(
            &mut c,
            ClassDefIdx::new(i),
            strings,
            protos,
            field_ids,
            method_ids,
        )?);
    }
    Ok(out)
}

fn push_string(out: &mut Vec<u8>, s: &str) {
    let bytes = dexprep_types::mutf8::encode(s);
    let mut len = bytes.len() as u32;
    loop {
        let mut byte = (len & 0x7F) as u8;
        len >>= 7;
        if len != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            break;
        }
    }
    out.extend_from_slice(&bytes);
}

fn encode_strings(strings: &StringPool) -> Vec<u8> {
    let mut out = Vec::new();
    for i in 0..strings.len() {
        let s = strings.get(StringId::new(i as u32)).expect("index within len");
        push_string(&mut out, s);
    }
    out
}

fn encode_type_ids(type_ids: &[StringId]) -> Vec<u8> {
    let mut out = Vec::with_capacity(type_ids.len() * 4);
    for id in type_ids {
        out.extend_from_slice(&id.raw().to_le_bytes());
    }
    out
}

fn encode_protos(protos: &[ProtoShape]) -> Vec<u8> {
    let mut out = Vec::new();
    for proto in protos {
        out.extend_from_slice(&proto.return_type.raw().to_le_bytes());
        out.extend_from_slice(&(proto.param_types.len() as u32).to_le_bytes());
        for p in &proto.param_types {
            out.extend_from_slice(&p.raw().to_le_bytes());
        }
    }
    out
}

fn encode_field_ids(field_ids: &[FieldIdEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(field_ids.len() * 12);
    for entry in field_ids {
        out.extend_from_slice(&entry.class_type.raw().to_le_bytes());
        out.extend_from_slice(&entry.type_desc.raw().to_le_bytes());
        out.extend_from_slice(&entry.name.raw().to_le_bytes());
    }
    out
}

fn encode_method_ids(method_ids: &[MethodIdEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(method_ids.len() * 12);
    for entry in method_ids {
        out.extend_from_slice(&entry.class_type.raw().to_le_bytes());
        out.extend_from_slice(&entry.proto.raw().to_le_bytes());
        out.extend_from_slice(&entry.name.raw().to_le_bytes());
    }
    out
}

fn type_id_to_raw(id: Option<TypeId>) -> u32 {
    id.map(|t| t.raw()).unwrap_or(u32::MAX)
}

fn encode_try_item(out: &mut Vec<u8>, t: &TryItem) {
    out.extend_from_slice(&t.start_addr.to_le_bytes());
    out.extend_from_slice(&t.end_addr.to_le_bytes());
    out.extend_from_slice(&(t.handlers.len() as u32).to_le_bytes());
    for h in &t.handlers {
        out.extend_from_slice(&type_id_to_raw(h.exception_type).to_le_bytes());
        out.extend_from_slice(&h.handler_addr.to_le_bytes());
    }
}

fn encode_code_item(out: &mut Vec<u8>, code: &CodeItem) {
    out.extend_from_slice(&code.registers_size.to_le_bytes());
    out.extend_from_slice(&code.ins_size.to_le_bytes());
    out.extend_from_slice(&code.outs_size.to_le_bytes());
    out.extend_from_slice(&(code.insns.len() as u32).to_le_bytes());
    for unit in &code.insns {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&(code.tries.len() as u32).to_le_bytes());
    for t in &code.tries {
        encode_try_item(out, t);
    }
}

fn encode_field_def(out: &mut Vec<u8>, field: &FieldDef) {
    out.extend_from_slice(&field.field_id.raw().to_le_bytes());
    out.extend_from_slice(&field.access_flags.bits().to_le_bytes());
}

fn encode_method_def(out: &mut Vec<u8>, method: &MethodDef) {
    out.extend_from_slice(&method.method_id.raw().to_le_bytes());
    out.extend_from_slice(&method.access_flags.bits().to_le_bytes());
    match &method.code {
        Some(code) => {
            out.extend_from_slice(&1u32.to_le_bytes());
            encode_code_item(out, code);
        }
        None => out.extend_from_slice(&0u32.to_le_bytes()),
    }
}

fn encode_class_def(out: &mut Vec<u8>, class: &ClassDef) {
    out.extend_from_slice(&class.class_type.raw().to_le_bytes());
    out.extend_from_slice(&class.access_flags.bits().to_le_bytes());
    out.extend_from_slice(&type_id_to_raw(class.superclass_type).to_le_bytes());
    out.extend_from_slice(&(class.interfaces.len() as u32).to_le_bytes());
    for i in &class.interfaces {
        out.extend_from_slice(&i.raw().to_le_bytes());
    }
    out.extend_from_slice(&(class.static_fields.len() as u32).to_le_bytes());
    for f in &class.static_fields {
        encode_field_def(out, f);
    }
    out.extend_from_slice(&(class.instance_fields.len() as u32).to_le_bytes());
    for f in &class.instance_fields {
        encode_field_def(out, f);
    }
    out.extend_from_slice(&(class.direct_methods.len() as u32).to_le_bytes());
    for m in &class.direct_methods {
        encode_method_def(out, m);
    }
    out.extend_from_slice(&(class.virtual_methods.len() as u32).to_le_bytes());
    for m in &class.virtual_methods {
        encode_method_def(out, m);
    }
}

/// Serializes a [`DecodedImage`] back to bytes, recomputing every header
/// offset and size from the tables' current contents. Used once class
/// linking, verification, and instruction rewriting have mutated the
/// decoded method bodies in place: the pool tables are carried through
/// unchanged, only the per-method `insns` differ from what `decode_image`
/// originally read.
pub fn encode_image(image: &DecodedImage) -> Vec<u8> {
    let strings = encode_strings(&image.strings);
    let type_ids = encode_type_ids(&image.type_ids);
    let protos = encode_protos(&image.protos);
    let field_ids = encode_field_ids(&image.field_ids);
    let method_ids = encode_method_ids(&image.method_ids);
    let mut class_defs = Vec::new();
    for class in &image.classes {
        encode_class_def(&mut class_defs, class);
    }

    let string_ids_off = ImageHeader::ENCODED_LEN as u32;
    let type_ids_off = string_ids_off + strings.len() as u32;
    let proto_ids_off = type_ids_off + type_ids.len() as u32;
    let field_ids_off = proto_ids_off + protos.len() as u32;
    let method_ids_off = field_ids_off + field_ids.len() as u32;
    let class_defs_off = method_ids_off + method_ids.len() as u32;

    let header = ImageHeader {
        version: image.header.version,
        checksum: image.header.checksum,
        signature: image.header.signature,
        string_ids_off,
        string_ids_size: image.strings.len() as u32,
        type_ids_off,
        type_ids_size: image.type_ids.len() as u32,
        proto_ids_off,
        proto_ids_size: image.protos.len() as u32,
        field_ids_off,
        field_ids_size: image.field_ids.len() as u32,
        method_ids_off,
        method_ids_size: image.method_ids.len() as u32,
        class_defs_off,
        class_defs_size: image.classes.len() as u32,
    };

    let mut out = Vec::new();
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(&strings);
    out.extend_from_slice(&type_ids);
    out.extend_from_slice(&protos);
    out.extend_from_slice(&field_ids);
    out.extend_from_slice(&method_ids);
    out.extend_from_slice(&class_defs);
    out
}

/// Walks an inbound image end to end: header, string pool, id tables, and
/// every class definition.
pub fn decode_image(bytes: &[u8]) -> Result<DecodedImage, FormatError> {
    let header = ImageHeader::parse(bytes)?;
    let strings = decode_strings(bytes, header.string_ids_off, header.string_ids_size)?;
    let type_ids = decode_type_ids(bytes, header.type_ids_off, header.type_ids_size, &strings)?;
    let protos = decode_protos(bytes, header.proto_ids_off, header.proto_ids_size)?;
    let field_ids = decode_field_ids(bytes, header.field_ids_off, header.field_ids_size)?;
    let method_ids = decode_method_ids(bytes, header.method_ids_off, header.method_ids_size)?;
    let classes = decode_class_defs(
        bytes,
        header.class_defs_off,
        header.class_defs_size,
        &strings,
        &protos,
        &field_ids,
        &method_ids,
    )?;
    Ok(DecodedImage {
        header,
        strings,
        type_ids,
        protos,
        field_ids,
        method_ids,
        classes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_string(buf: &mut Vec<u8>, s: &str) {
        let mut len = s.len() as u32;
        loop {
            let mut byte = (len & 0x7F) as u8;
            len >>= 7;
            if len != 0 {
                byte |= 0x80;
            }
            buf.push(byte);
            if len == 0 {
                break;
            }
        }
        buf.extend_from_slice(s.as_bytes());
    }

    /// Builds a minimal single-class image: one root class `LMain;` with
    /// one static `I` field and one direct `<init>` method with a
    /// three-instruction body and no try ranges.
    fn minimal_image() -> Vec<u8> {
        let mut strings = Vec::new();
        push_string(&mut strings, "LMain;");
        push_string(&mut strings, "I");
        push_string(&mut strings, "V");
        push_string(&mut strings, "f");
        push_string(&mut strings, "<init>");

        let type_ids_off = ImageHeader::ENCODED_LEN as u32 + strings.len() as u32;
        let mut type_ids = Vec::new();
        for raw in [0u32, 1, 2] {
            type_ids.extend_from_slice(&raw.to_le_bytes());
        }

        let proto_ids_off = type_ids_off + type_ids.len() as u32;
        let mut proto_ids = Vec::new();
        proto_ids.extend_from_slice(&2u32.to_le_bytes()); // return type V
        proto_ids.extend_from_slice(&0u32.to_le_bytes()); // no params

        let field_ids_off = proto_ids_off + proto_ids.len() as u32;
        let mut field_ids = Vec::new();
        field_ids.extend_from_slice(&0u32.to_le_bytes()); // class LMain;
        field_ids.extend_from_slice(&1u32.to_le_bytes()); // type I
        field_ids.extend_from_slice(&3u32.to_le_bytes()); // name "f"

        let method_ids_off = field_ids_off + field_ids.len() as u32;
        let mut method_ids = Vec::new();
        method_ids.extend_from_slice(&0u32.to_le_bytes()); // class LMain;
        method_ids.extend_from_slice(&0u32.to_le_bytes()); // proto 0
        method_ids.extend_from_slice(&4u32.to_le_bytes()); // name "<init>"

        let class_defs_off = method_ids_off + method_ids.len() as u32;
        let mut class_defs = Vec::new();
        class_defs.extend_from_slice(&0u32.to_le_bytes()); // class_type LMain;
        class_defs.extend_from_slice(&0u32.to_le_bytes()); // access flags
        class_defs.extend_from_slice(&u32::MAX.to_le_bytes()); // no superclass
        class_defs.extend_from_slice(&0u32.to_le_bytes()); // interfaces
        // static fields: 1
        class_defs.extend_from_slice(&1u32.to_le_bytes());
        class_defs.extend_from_slice(&0u32.to_le_bytes()); // field_idx 0
        class_defs.extend_from_slice(&0x0008u32.to_le_bytes()); // STATIC
        // instance fields: 0
        class_defs.extend_from_slice(&0u32.to_le_bytes());
        // direct methods: 1
        class_defs.extend_from_slice(&1u32.to_le_bytes());
        class_defs.extend_from_slice(&0u32.to_le_bytes()); // method_idx 0
        class_defs.extend_from_slice(&0x10000u32.to_le_bytes()); // CONSTRUCTOR
        class_defs.extend_from_slice(&1u32.to_le_bytes()); // has_code
        class_defs.extend_from_slice(&2u16.to_le_bytes()); // registers_size
        class_defs.extend_from_slice(&0u16.to_le_bytes()); // ins_size
        class_defs.extend_from_slice(&0u16.to_le_bytes()); // outs_size
        class_defs.extend_from_slice(&2u32.to_le_bytes()); // insns_size
        class_defs.extend_from_slice(&0x0e00u16.to_le_bytes()); // return-void-ish placeholder unit
        class_defs.extend_from_slice(&0x0000u16.to_le_bytes());
        class_defs.extend_from_slice(&0u32.to_le_bytes()); // tries_size
        // virtual methods: 0
        class_defs.extend_from_slice(&0u32.to_le_bytes());

        let header = ImageHeader {
            version: 1,
            checksum: 0,
            signature: [0u8; 20],
            string_ids_off: ImageHeader::ENCODED_LEN as u32,
            string_ids_size: 5,
            type_ids_off,
            type_ids_size: 3,
            proto_ids_off,
            proto_ids_size: 1,
            field_ids_off,
            field_ids_size: 1,
            method_ids_off,
            method_ids_size: 1,
            class_defs_off,
            class_defs_size: 1,
        };

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&header.encode());
        bytes.extend_from_slice(&strings);
        bytes.extend_from_slice(&type_ids);
        bytes.extend_from_slice(&proto_ids);
        bytes.extend_from_slice(&field_ids);
        bytes.extend_from_slice(&method_ids);
        bytes.extend_from_slice(&class_defs);
        bytes
    }

    #[test]
    fn decodes_minimal_single_class_image() {
        let bytes = minimal_image();
        let image = decode_image(&bytes).unwrap();
        assert_eq!(image.classes.len(), 1);
        let class = &image.classes[0];
        assert_eq!(image.type_descriptor(class.class_type).unwrap(), "LMain;");
        assert_eq!(class.static_fields.len(), 1);
        assert_eq!(class.static_fields[0].name, "f");
        assert_eq!(class.direct_methods.len(), 1);
        assert_eq!(class.direct_methods[0].name, "<init>");
        assert!(class.direct_methods[0].code.is_some());
    }

    #[test]
    fn rejects_out_of_range_field_reference() {
        let mut bytes = minimal_image();
        // Corrupt the lone field_idx (first u32 in the static-fields entry)
        // to point past the one-entry field_ids table.
        let header = ImageHeader::parse(&bytes).unwrap();
        let static_field_idx_off = (header.class_defs_off
            + 4   // class_type
            + 4   // access_flags
            + 4   // superclass
            + 4   // interfaces_count
            + 4) as usize; // static_fields_count
        bytes[static_field_idx_off..static_field_idx_off + 4]
            .copy_from_slice(&99u32.to_le_bytes());
        assert!(decode_image(&bytes).is_err());
    }

    #[test]
    fn encode_image_round_trips_through_decode() {
        let bytes = minimal_image();
        let image = decode_image(&bytes).unwrap();
        let re_encoded = encode_image(&image);
        let re_decoded = decode_image(&re_encoded).unwrap();
        assert_eq!(re_decoded.classes.len(), image.classes.len());
        assert_eq!(
            re_decoded.classes[0].direct_methods[0].code.as_ref().unwrap().insns,
            image.classes[0].direct_methods[0].code.as_ref().unwrap().insns,
        );
    }

    #[test]
    fn encode_image_reflects_rewritten_instructions() {
        let bytes = minimal_image();
        let mut image = decode_image(&bytes).unwrap();
        image.classes[0].direct_methods[0]
            .code
            .as_mut()
            .unwrap()
            .insns = alloc::vec![0x0001, 0x0002, 0x0003];
        let re_encoded = encode_image(&image);
        let re_decoded = decode_image(&re_encoded).unwrap();
        assert_eq!(
            re_decoded.classes[0].direct_methods[0].code.as_ref().unwrap().insns,
            alloc::vec![0x0001, 0x0002, 0x0003]
        );
    }

    #[test]
    fn round_trips_header_offsets() {
        let bytes = minimal_image();
        let header = ImageHeader::parse(&bytes).unwrap();
        assert_eq!(header.string_ids_size, 5);
        assert_eq!(header.class_defs_size, 1);
    }
}
