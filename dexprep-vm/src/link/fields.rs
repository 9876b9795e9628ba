//! Field-offset computation: reference fields first, then 8-byte-aligned
//! wide fields, then remaining narrow fields.

use dexprep_image::format::AccessFlags;

const REFERENCE_SLOT_SIZE: u32 = 4;
const WIDE_SLOT_SIZE: u32 = 8;
const NARROW_SLOT_SIZE: u32 = 4;

/// Category of a field's storage requirement, derived from its type
/// descriptor's first character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCategory {
    Reference,
    Wide,
    Narrow,
}

impl FieldCategory {
    pub fn of_descriptor(descriptor: &str) -> Self {
        match descriptor.as_bytes().first() {
            Some(b'L') | Some(b'[') => FieldCategory::Reference,
            Some(b'J') | Some(b'D') => FieldCategory::Wide,
            _ => FieldCategory::Narrow,
        }
    }
}

/// An as-yet-unlinked field declaration.
#[derive(Debug, Clone)]
pub struct DeclaredField {
    pub name: String,
    pub descriptor: String,
    pub access_flags: AccessFlags,
}

/// A field after layout, carrying its assigned byte offset (instance
/// fields) or slot index (static fields).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedField {
    pub name: String,
    pub descriptor: String,
    pub access_flags: AccessFlags,
    pub offset: u32,
    pub category: FieldCategory,
}

/// The outcome of laying out one class's fields: the linked field lists
/// plus the GC-facing reference-offset bitmap and total instance size.
#[derive(Debug, Clone, Default)]
pub struct FieldLayout {
    pub instance_fields: Vec<LinkedField>,
    pub static_fields: Vec<LinkedField>,
    pub reference_offsets: Vec<u32>,
    pub instance_size: u32,
}

/// Lays out `declared_instance_fields` on top of `superclass_layout`'s
/// instance size, and `declared_static_fields` from zero (statics have no
/// superclass contribution). Reference fields are placed first, then
/// wide fields, moving a narrow field into the alignment gap before a
/// wide run when the instance size is not already 8-aligned, then the
/// remaining narrow fields.
pub fn compute_layout(
    superclass_layout: Option<&FieldLayout>,
    declared_instance_fields: &[DeclaredField],
    declared_static_fields: &[DeclaredField],
) -> FieldLayout {
    let base_offset = superclass_layout.map(|l| l.instance_size).unwrap_or(0);
    let mut reference_offsets = superclass_layout.map(|l| l.reference_offsets.clone()).unwrap_or_default();

    let mut refs = Vec::new();
    let mut wides = Vec::new();
    let mut narrows = Vec::new();
    for field in declared_instance_fields {
        match FieldCategory::of_descriptor(&field.descriptor) {
            FieldCategory::Reference => refs.push(field),
            FieldCategory::Wide => wides.push(field),
            FieldCategory::Narrow => narrows.push(field),
        }
    }

    let mut instance_fields = Vec::new();
    let mut offset = base_offset;

    for field in refs {
        reference_offsets.push(offset);
        instance_fields.push(linked(field, offset, FieldCategory::Reference));
        offset += REFERENCE_SLOT_SIZE;
    }

    if !wides.is_empty() && offset % WIDE_SLOT_SIZE != 0 {
        if let Some(field) = narrows.pop() {
            instance_fields.push(linked(field, offset, FieldCategory::Narrow));
            offset += NARROW_SLOT_SIZE;
        } else {
            offset += NARROW_SLOT_SIZE;
        }
    }

    for field in wides {
        instance_fields.push(linked(field, offset, FieldCategory::Wide));
        offset += WIDE_SLOT_SIZE;
    }

    for field in narrows {
        instance_fields.push(linked(field, offset, FieldCategory::Narrow));
        offset += NARROW_SLOT_SIZE;
    }

    let mut static_offset = 0;
    let static_fields = declared_static_fields
        .iter()
        .map(|field| {
            let category = FieldCategory::of_descriptor(&field.descriptor);
            let size = match category {
                FieldCategory::Wide => WIDE_SLOT_SIZE,
                _ => NARROW_SLOT_SIZE,
            };
            let f = linked(field, static_offset, category);
            static_offset += size;
            f
        })
        .collect();

    FieldLayout {
        instance_fields,
        static_fields,
        reference_offsets,
        instance_size: offset,
    }
}

/// Moves the distinguished `referent` field of `java.lang.ref.Reference`
/// to the end of the reference-field run so ordinary GC traversal skips
/// it; the caller is responsible for recognizing the Reference class
/// itself before calling this.
pub fn move_referent_to_end(layout: &mut FieldLayout) {
    if let Some(pos) = layout.instance_fields.iter().position(|f| f.name == "referent") {
        let referent = layout.instance_fields.remove(pos);
        let last_ref_pos = layout
            .instance_fields
            .iter()
            .rposition(|f| f.category == FieldCategory::Reference)
            .map(|i| i + 1)
            .unwrap_or(0);
        layout.instance_fields.insert(last_ref_pos, referent);
    }
}

fn linked(field: &DeclaredField, offset: u32, category: FieldCategory) -> LinkedField {
    LinkedField {
        name: field.name.clone(),
        descriptor: field.descriptor.clone(),
        access_flags: field.access_flags,
        offset,
        category,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, descriptor: &str) -> DeclaredField {
        DeclaredField {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            access_flags: AccessFlags::PRIVATE,
        }
    }

    #[test]
    fn reference_fields_are_placed_before_primitives() {
        let fields = vec![field("i", "I"), field("obj", "Ljava/lang/Object;")];
        let layout = compute_layout(None, &fields, &[]);
        let obj_field = layout.instance_fields.iter().find(|f| f.name == "obj").unwrap();
        assert_eq!(obj_field.offset, 0);
    }

    #[test]
    fn wide_fields_are_eight_byte_aligned() {
        let fields = vec![field("b", "B"), field("w", "J")];
        let layout = compute_layout(None, &fields, &[]);
        let wide = layout.instance_fields.iter().find(|f| f.name == "w").unwrap();
        assert_eq!(wide.offset % 8, 0);
    }

    #[test]
    fn narrow_field_fills_alignment_gap_before_wide() {
        let fields = vec![field("b", "B"), field("c", "C"), field("w", "J")];
        let layout = compute_layout(None, &fields, &[]);
        assert_eq!(layout.instance_fields.len(), 3);
        let wide = layout.instance_fields.iter().find(|f| f.name == "w").unwrap();
        assert_eq!(wide.offset % 8, 0);
    }

    #[test]
    fn instance_layout_continues_from_superclass_size() {
        let sup_layout = FieldLayout {
            instance_size: 8,
            ..Default::default()
        };
        let fields = vec![field("obj", "Ljava/lang/Object;")];
        let layout = compute_layout(Some(&sup_layout), &fields, &[]);
        assert_eq!(layout.instance_fields[0].offset, 8);
    }

    #[test]
    fn referent_moves_to_end_of_reference_run() {
        let mut layout = FieldLayout {
            instance_fields: vec![
                LinkedField {
                    name: "referent".to_string(),
                    descriptor: "Ljava/lang/Object;".to_string(),
                    access_flags: AccessFlags::PRIVATE,
                    offset: 0,
                    category: FieldCategory::Reference,
                },
                LinkedField {
                    name: "queue".to_string(),
                    descriptor: "Ljava/lang/ref/ReferenceQueue;".to_string(),
                    access_flags: AccessFlags::PRIVATE,
                    offset: 4,
                    category: FieldCategory::Reference,
                },
            ],
            ..Default::default()
        };
        move_referent_to_end(&mut layout);
        assert_eq!(layout.instance_fields[1].name, "referent");
    }
}
