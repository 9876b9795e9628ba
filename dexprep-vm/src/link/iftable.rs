//! Interface table construction with miranda-method synthesis.

use dexprep_image::format::AccessFlags;

use super::{vtable::VtableSlot, Class, DeclaredMethod, LinkError};

/// One interface this class implements, with the vtable slot holding
/// each of that interface's methods (in the interface's own method
/// order).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfTableEntry {
    pub interface_name: String,
    pub method_vtable_indices: Vec<usize>,
}

/// Builds the deduplicated, superclass-first interface table, appending
/// miranda methods to `vtable` (and recording them in `declared_virtuals`
/// so the caller's finalizer-override scan still sees the full method
/// set) whenever no public, non-abstract vtable entry satisfies an
/// interface method.
pub fn build_iftable(
    superclass: Option<&Class>,
    interfaces: &[&Class],
    vtable: &mut Vec<VtableSlot>,
    declared_virtuals: &mut Vec<DeclaredMethod>,
) -> Result<Vec<IfTableEntry>, LinkError> {
    let mut table: Vec<IfTableEntry> = superclass.map(|s| s.iftable.clone()).unwrap_or_default();
    let already_present: Vec<String> = table.iter().map(|e| e.interface_name.clone()).collect();

    for iface in interfaces {
        if already_present.contains(&iface.name) {
            continue;
        }
        let mut indices = Vec::with_capacity(iface.vtable.len());
        for iface_method in &iface.vtable {
            let existing = vtable
                .iter()
                .rposition(|slot| slot.name == iface_method.name && slot.descriptor == iface_method.descriptor);
            let slot_idx = match existing {
                Some(idx) => {
                    let slot = &vtable[idx];
                    if slot.is_abstract || !slot.access_flags.contains(AccessFlags::PUBLIC) {
                        return Err(LinkError::IncompatibleClassChange);
                    }
                    idx
                }
                None => {
                    let miranda = VtableSlot {
                        name: iface_method.name.clone(),
                        descriptor: iface_method.descriptor.clone(),
                        access_flags: AccessFlags::PUBLIC | AccessFlags::ABSTRACT,
                        is_abstract: true,
                    };
                    vtable.push(miranda);
                    declared_virtuals.push(DeclaredMethod {
                        name: iface_method.name.clone(),
                        descriptor: iface_method.descriptor.clone(),
                        access_flags: AccessFlags::PUBLIC | AccessFlags::ABSTRACT | AccessFlags::MIRANDA,
                        is_static: false,
                    });
                    vtable.len() - 1
                }
            };
            indices.push(slot_idx);
        }
        table.push(IfTableEntry {
            interface_name: iface.name.clone(),
            method_vtable_indices: indices,
        });
        // Transitively implemented interfaces beyond the directly listed
        // one (e.g. a superinterface) are already flattened into `iface`'s
        // own iftable by the time it was linked; fold those in too.
        for transitive in &iface.iftable {
            if !table.iter().any(|e| e.interface_name == transitive.interface_name) {
                table.push(transitive.clone());
            }
        }
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::vtable::build_vtable;

    fn iface_method(name: &str) -> DeclaredMethod {
        DeclaredMethod {
            name: name.to_string(),
            descriptor: "()V".to_string(),
            access_flags: AccessFlags::PUBLIC | AccessFlags::ABSTRACT,
            is_static: false,
        }
    }

    fn make_interface(name: &str, methods: &[&str]) -> Class {
        let mut class = Class::new_root(name.to_string());
        class.access_flags = AccessFlags::PUBLIC | AccessFlags::INTERFACE;
        let declared: Vec<_> = methods.iter().map(|m| iface_method(m)).collect();
        let (vtable, _) = build_vtable(None, &declared).unwrap();
        class.vtable = vtable;
        class
    }

    #[test]
    fn unimplemented_interface_method_gets_a_miranda_slot() {
        let iface = make_interface("Runnable", &["run"]);
        let mut vtable = Vec::new();
        let mut declared = Vec::new();
        let table = build_iftable(None, &[&iface], &mut vtable, &mut declared).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(vtable.len(), 1);
        assert!(vtable[0].is_abstract);
        assert!(declared.iter().any(|m| m.access_flags.contains(AccessFlags::MIRANDA)));
    }

    #[test]
    fn implemented_interface_method_reuses_existing_slot() {
        let iface = make_interface("Runnable", &["run"]);
        let mut vtable = vec![VtableSlot {
            name: "run".to_string(),
            descriptor: "()V".to_string(),
            access_flags: AccessFlags::PUBLIC,
            is_abstract: false,
        }];
        let mut declared = Vec::new();
        let table = build_iftable(None, &[&iface], &mut vtable, &mut declared).unwrap();
        assert_eq!(table[0].method_vtable_indices, vec![0]);
        assert_eq!(vtable.len(), 1);
    }

    #[test]
    fn non_public_match_is_rejected() {
        let iface = make_interface("Runnable", &["run"]);
        let mut vtable = vec![VtableSlot {
            name: "run".to_string(),
            descriptor: "()V".to_string(),
            access_flags: AccessFlags::PRIVATE,
            is_abstract: false,
        }];
        let mut declared = Vec::new();
        let err = build_iftable(None, &[&iface], &mut vtable, &mut declared).unwrap_err();
        assert_eq!(err, LinkError::IncompatibleClassChange);
    }

    #[test]
    fn already_present_interface_is_not_duplicated() {
        let iface = make_interface("Runnable", &["run"]);
        let mut sup = Class::new_root("Sup".to_string());
        let mut vtable = Vec::new();
        let mut declared = Vec::new();
        sup.iftable = build_iftable(None, &[&iface], &mut vtable, &mut declared).unwrap();
        let mut vtable2 = vtable.clone();
        let mut declared2 = declared.clone();
        let table = build_iftable(Some(&sup), &[&iface], &mut vtable2, &mut declared2).unwrap();
        assert_eq!(table.len(), 1);
    }
}
