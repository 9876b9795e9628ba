//! Glues class linking, verification, and rewriting to one inbound image:
//! decode the class-data region, link every class to a fixed point, then
//! run each method's code through [`crate::verify::verify_method`] and
//! [`crate::rewrite::rewrite_instruction`] before re-encoding.

use std::collections::HashMap;

use dexprep_asm::decode::{decode_method, encode_one};
use dexprep_asm::Instruction;
use dexprep_image::classdata::{self, DecodedImage};
use dexprep_image::container::OptChunk;
use dexprep_image::format::{AccessFlags, ClassDef, CodeItem, FieldDef, MethodDef};
use dexprep_image::FormatError;
use dexprep_types::{ClassHandle, FieldId, MethodId, ProtoId, TypeId};

use crate::context::PrepareConfig;
use crate::error::PrepareError;
use crate::lattice::RegisterType;
use crate::link::{self, Class, DeclaredField, DeclaredMethod, LinkError};
use crate::regmap;
use crate::regtable::InterestingAddressPolicy;
use crate::rewrite::{InlineTable, ResolvedField, ResolvedMethod, RewriteContext};
use crate::verify::{verify_method, MethodShape, TryRange};

/// The outcome of preparing one inbound image: the re-encoded image bytes
/// plus any `OptChunk`s to embed in the cache container's optimized-data
/// region (register maps, at present).
pub struct PreparedImage {
    pub bytes: Vec<u8>,
    pub opt_chunks: Vec<OptChunk>,
}

/// Decodes `bytes`, links every class to a fixed point, then verifies and
/// rewrites each method's code according to `config`, returning the
/// re-encoded image ready for [`crate::cache::write_container`].
pub fn prepare_image(bytes: &[u8], config: &PrepareConfig) -> Result<PreparedImage, PrepareError> {
    let mut image = classdata::decode_image(bytes)?;
    let linked = link_all_classes(&image)?;

    let policy = if config.generate_register_maps {
        InterestingAddressPolicy::Every
    } else {
        InterestingAddressPolicy::BranchTargetsAndHandlers
    };

    let mut rewrites = Vec::new();
    let mut opt_chunks = Vec::new();

    for (class_idx, def) in image.classes.iter().enumerate() {
        let owning_class = ClassHandle::new(def.idx.raw());
        let has_final_field = linked.get(&def.class_type).is_some_and(|c| {
            c.instance_fields
                .iter()
                .any(|f| f.access_flags.contains(AccessFlags::FINAL))
        });

        let methods = def
            .direct_methods
            .iter()
            .enumerate()
            .map(|(i, m)| (true, i, m))
            .chain(def.virtual_methods.iter().enumerate().map(|(i, m)| (false, i, m)));

        for (is_direct, method_idx, method) in methods {
            let Some(code) = method.code.as_ref() else { continue };

            let instructions =
                decode_method(&code.insns).map_err(|e| PrepareError::InternalError(format!("{e:?}")))?;

            let shape = build_method_shape(&image, def, method, owning_class)?;

            let table = if config.verify_enabled {
                Some(
                    verify_method(&shape, &instructions, method.is_instance_init(), policy)
                        .map_err(PrepareError::Verify)?,
                )
            } else {
                None
            };

            if config.generate_register_maps {
                if let Some(table) = &table {
                    let map = regmap::build_register_map(table);
                    opt_chunks.push(regmap::encode_register_map(method.method_id.raw(), &map));
                }
            }

            if !config.optimize_enabled {
                continue;
            }

            let inline_table = InlineTable::new();
            let fields = |id: FieldId| resolve_field(&image, &linked, id);
            let methods_fn = |id: MethodId| resolve_method(&image, &linked, id);
            let ctx = RewriteContext {
                fields: &fields,
                methods: &methods_fn,
                inline_table: &inline_table,
                owning_class_has_final_field: has_final_field,
                relaxed_memory_model: false,
            };

            let mut new_insns = Vec::with_capacity(code.insns.len());
            for (_, insn, _) in instructions {
                let rewritten = crate::rewrite::rewrite_instruction(insn, &ctx);
                encode_one(&rewritten, &mut new_insns);
            }
            rewrites.push((class_idx, is_direct, method_idx, new_insns));
        }
    }

    for (class_idx, is_direct, method_idx, new_insns) in rewrites {
        let methods = if is_direct {
            &mut image.classes[class_idx].direct_methods
        } else {
            &mut image.classes[class_idx].virtual_methods
        };
        if let Some(code) = methods[method_idx].code.as_mut() {
            code.insns = new_insns;
        }
    }

    Ok(PreparedImage {
        bytes: classdata::encode_image(&image),
        opt_chunks,
    })
}

/// Links every class in `image` against its superclass and interfaces,
/// resolving the supertype graph to a fixed point. A `TypeId` absent from
/// `image.classes` is treated as an already-resolved bootstrap class — this
/// pipeline only ever sees one image's worth of class defs, not the whole
/// loaded-classes table.
fn link_all_classes(image: &DecodedImage) -> Result<HashMap<TypeId, Class>, PrepareError> {
    let idx_by_type: HashMap<TypeId, u32> =
        image.classes.iter().map(|d| (d.class_type, d.idx.raw())).collect();

    let mut linked: HashMap<TypeId, Class> = HashMap::new();
    let mut pending: Vec<&ClassDef> = image.classes.iter().collect();

    while !pending.is_empty() {
        let mut next_pending = Vec::new();
        let mut progressed = false;

        for def in pending {
            let superclass_ready = def
                .superclass_type
                .map_or(true, |ty| linked.contains_key(&ty) || !idx_by_type.contains_key(&ty));
            let interfaces_ready = def
                .interfaces
                .iter()
                .all(|ty| linked.contains_key(ty) || !idx_by_type.contains_key(ty));

            if !superclass_ready || !interfaces_ready {
                next_pending.push(def);
                continue;
            }

            let superclass = def.superclass_type.and_then(|ty| linked.get(&ty));
            let interfaces: Vec<&Class> = def.interfaces.iter().filter_map(|ty| linked.get(ty)).collect();

            let mut virtuals = Vec::with_capacity(def.virtual_methods.len());
            for m in &def.virtual_methods {
                virtuals.push(declared_method(image, m)?);
            }
            let mut instance_fields = Vec::with_capacity(def.instance_fields.len());
            for f in &def.instance_fields {
                instance_fields.push(declared_field(image, f)?);
            }
            let mut static_fields = Vec::with_capacity(def.static_fields.len());
            for f in &def.static_fields {
                static_fields.push(declared_field(image, f)?);
            }

            let mut class = Class::new_root(image.type_descriptor(def.class_type)?.to_string());
            class.access_flags = def.access_flags;
            class.superclass_type = def.superclass_type;
            class.superclass = def
                .superclass_type
                .and_then(|ty| idx_by_type.get(&ty))
                .map(|&i| ClassHandle::new(i));
            class.interface_types = def.interfaces.clone();
            class.interfaces = def
                .interfaces
                .iter()
                .filter_map(|ty| idx_by_type.get(ty))
                .map(|&i| ClassHandle::new(i))
                .collect();

            let class =
                link::link_class(class, superclass, &interfaces, &virtuals, &instance_fields, &static_fields)
                    .map_err(PrepareError::Link)?;

            linked.insert(def.class_type, class);
            progressed = true;
        }

        if !progressed {
            if next_pending.is_empty() {
                break;
            }
            return Err(PrepareError::Link(LinkError::ClassCircularity));
        }
        pending = next_pending;
    }

    Ok(linked)
}

fn declared_method(image: &DecodedImage, method: &MethodDef) -> Result<DeclaredMethod, FormatError> {
    Ok(DeclaredMethod {
        name: method.name.clone(),
        descriptor: method_descriptor(image, method)?,
        access_flags: method.access_flags,
        is_static: method.access_flags.contains(AccessFlags::STATIC),
    })
}

fn declared_field(image: &DecodedImage, field: &FieldDef) -> Result<DeclaredField, FormatError> {
    Ok(DeclaredField {
        name: field.name.clone(),
        descriptor: image.type_descriptor(field.type_desc)?.to_string(),
        access_flags: field.access_flags,
    })
}

fn method_descriptor(image: &DecodedImage, method: &MethodDef) -> Result<String, FormatError> {
    let mut out = String::from("(");
    for &p in &method.param_types {
        out.push_str(image.type_descriptor(p)?);
    }
    out.push(')');
    out.push_str(image.type_descriptor(method.return_type)?);
    Ok(out)
}

fn proto_descriptor(image: &DecodedImage, proto_id: ProtoId) -> Result<String, FormatError> {
    let proto = image.proto(proto_id)?;
    let mut out = String::from("(");
    for &p in &proto.param_types {
        out.push_str(image.type_descriptor(p)?);
    }
    out.push(')');
    out.push_str(image.type_descriptor(proto.return_type)?);
    Ok(out)
}

fn register_type_for(descriptor: &str, ty: TypeId) -> RegisterType {
    match descriptor.as_bytes().first() {
        Some(b'L') | Some(b'[') => RegisterType::Reference(ty),
        Some(b'J') => RegisterType::Long,
        Some(b'D') => RegisterType::Double,
        Some(b'F') => RegisterType::Float,
        _ => RegisterType::Integer,
    }
}

/// Builds the method's static shape for the verifier: the receiver (if
/// any) followed by the declared parameter types, one [`RegisterType`]
/// entry per register slot — a wide parameter contributes two identical
/// entries, mirroring how a wide value occupies a register pair.
fn build_method_shape(
    image: &DecodedImage,
    def: &ClassDef,
    method: &MethodDef,
    owning_class: ClassHandle,
) -> Result<MethodShape, FormatError> {
    let code = method
        .code
        .as_ref()
        .expect("caller only calls build_method_shape on methods with code");
    let is_static = method.access_flags.contains(AccessFlags::STATIC);

    let mut argument_types = Vec::new();
    if !is_static {
        argument_types.push(RegisterType::Reference(def.class_type));
    }
    for &param in &method.param_types {
        let descriptor = image.type_descriptor(param)?;
        let ty = register_type_for(descriptor, param);
        let wide = ty.is_wide();
        argument_types.push(ty.clone());
        if wide {
            argument_types.push(ty);
        }
    }

    Ok(MethodShape {
        register_count: code.registers_size as usize,
        ins_count: code.ins_size as usize,
        argument_types,
        owning_class,
        try_ranges: try_ranges_from_code(code),
    })
}

fn try_ranges_from_code(code: &CodeItem) -> Vec<TryRange> {
    code.tries
        .iter()
        .map(|t| TryRange {
            start: t.start_addr,
            end: t.end_addr,
            handlers: t.handlers.iter().map(|h| h.handler_addr).collect(),
        })
        .collect()
}

fn resolve_field(image: &DecodedImage, linked: &HashMap<TypeId, Class>, id: FieldId) -> Option<ResolvedField> {
    let entry = image.field_ids.get(id.raw() as usize)?;
    let class = linked.get(&entry.class_type)?;
    let name = image.strings.get(entry.name).ok()?;
    class
        .instance_fields
        .iter()
        .chain(class.static_fields.iter())
        .find(|f| f.name == name)
        .map(|f| ResolvedField {
            offset: f.offset as u16,
            volatile: f.access_flags.contains(AccessFlags::VOLATILE),
        })
}

fn resolve_method(image: &DecodedImage, linked: &HashMap<TypeId, Class>, id: MethodId) -> Option<ResolvedMethod> {
    let entry = image.method_ids.get(id.raw() as usize)?;
    let class = linked.get(&entry.class_type)?;
    let name = image.strings.get(entry.name).ok()?;
    let descriptor = proto_descriptor(image, entry.proto).ok()?;
    let vtable_index = class
        .vtable
        .iter()
        .position(|slot| slot.name == name && slot.descriptor == descriptor)? as u16;
    let is_root_object_init = class.superclass.is_none() && name == "<init>";
    Some(ResolvedMethod {
        vtable_index,
        is_root_object_init,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dexprep_image::classdata::{MethodIdEntry, ProtoShape};
    use dexprep_image::format::{ImageHeader, StringPool};
    use dexprep_types::{ClassDefIdx, StringId};

    fn minimal_static_method_image() -> DecodedImage {
        let strings = StringPool::from_strings(vec!["LMain;".to_string(), "V".to_string(), "run".to_string()]);

        let mut insns = Vec::new();
        encode_one(&Instruction::Return { reg: None, width: None }, &mut insns);

        let method = MethodDef {
            method_id: MethodId::new(0),
            name: "run".to_string(),
            proto: ProtoId::new(0),
            param_types: Vec::new(),
            return_type: TypeId::new(1),
            access_flags: AccessFlags::PUBLIC | AccessFlags::STATIC,
            code: Some(CodeItem {
                registers_size: 1,
                ins_size: 0,
                outs_size: 0,
                insns,
                tries: Vec::new(),
            }),
        };

        let class = ClassDef {
            idx: ClassDefIdx::new(0),
            class_type: TypeId::new(0),
            access_flags: AccessFlags::PUBLIC,
            superclass_type: None,
            interfaces: Vec::new(),
            static_fields: Vec::new(),
            instance_fields: Vec::new(),
            direct_methods: vec![method],
            virtual_methods: Vec::new(),
        };

        DecodedImage {
            header: ImageHeader {
                version: 1,
                checksum: 0,
                signature: [0u8; 20],
                string_ids_off: 0,
                string_ids_size: 0,
                type_ids_off: 0,
                type_ids_size: 0,
                proto_ids_off: 0,
                proto_ids_size: 0,
                field_ids_off: 0,
                field_ids_size: 0,
                method_ids_off: 0,
                method_ids_size: 0,
                class_defs_off: 0,
                class_defs_size: 0,
            },
            strings,
            type_ids: vec![StringId::new(0), StringId::new(1)],
            protos: vec![ProtoShape {
                return_type: TypeId::new(1),
                param_types: Vec::new(),
            }],
            field_ids: Vec::new(),
            method_ids: vec![MethodIdEntry {
                class_type: TypeId::new(0),
                proto: ProtoId::new(0),
                name: StringId::new(2),
            }],
            classes: vec![class],
        }
    }

    #[test]
    fn prepare_image_links_verifies_and_rewrites_a_static_method() {
        let image = minimal_static_method_image();
        let bytes = classdata::encode_image(&image);
        let config = PrepareConfig::default();
        let prepared = prepare_image(&bytes, &config).expect("prepare succeeds");
        let re_decoded = classdata::decode_image(&prepared.bytes).expect("decode succeeds");
        assert_eq!(re_decoded.classes.len(), 1);
        assert_eq!(
            re_decoded.classes[0].direct_methods[0].code.as_ref().unwrap().insns.len(),
            1
        );
    }

    #[test]
    fn generate_register_maps_emits_opt_chunks() {
        let image = minimal_static_method_image();
        let bytes = classdata::encode_image(&image);
        let mut config = PrepareConfig::default();
        config.generate_register_maps = true;
        let prepared = prepare_image(&bytes, &config).expect("prepare succeeds");
        assert!(!prepared.opt_chunks.is_empty());
        assert!(prepared
            .opt_chunks
            .iter()
            .all(|c| c.chunk_type == regmap::REGISTER_MAP_CHUNK_TYPE));
    }

    #[test]
    fn skipping_verification_still_rewrites() {
        let image = minimal_static_method_image();
        let bytes = classdata::encode_image(&image);
        let mut config = PrepareConfig::default();
        config.verify_enabled = false;
        let prepared = prepare_image(&bytes, &config).expect("prepare succeeds");
        assert!(prepared.opt_chunks.is_empty());
    }
}
