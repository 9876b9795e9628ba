//! Virtual method table construction.

use dexprep_image::format::AccessFlags;

use super::{DeclaredMethod, LinkError};

/// One vtable entry: the method's signature and whether it's an override
/// of an inherited slot (vs. a freshly appended one).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VtableSlot {
    pub name: String,
    pub descriptor: String,
    pub access_flags: AccessFlags,
    pub is_abstract: bool,
}

impl VtableSlot {
    fn matches(&self, other: &DeclaredMethod) -> bool {
        self.name == other.name && self.descriptor == other.descriptor
    }

    fn from_declared(m: &DeclaredMethod) -> Self {
        VtableSlot {
            name: m.name.clone(),
            descriptor: m.descriptor.clone(),
            access_flags: m.access_flags,
            is_abstract: m.access_flags.contains(AccessFlags::ABSTRACT),
        }
    }
}

/// Builds this class's vtable from its superclass's (if any) plus its own
/// declared virtual methods, searching from the end of the superclass
/// vtable for an override per declared method.
///
/// Returns the built vtable and the full set of virtual methods declared
/// by this class (used by the caller to detect a `finalize()` override
/// and to feed the interface-table builder).
pub fn build_vtable(
    superclass: Option<&super::Class>,
    declared_virtuals: &[DeclaredMethod],
) -> Result<(Vec<VtableSlot>, Vec<DeclaredMethod>), LinkError> {
    let mut vtable: Vec<VtableSlot> = superclass.map(|s| s.vtable.clone()).unwrap_or_default();

    for declared in declared_virtuals {
        if declared.is_static {
            continue;
        }
        let override_slot = vtable.iter().rposition(|slot| slot.matches(declared));
        match override_slot {
            Some(idx) => {
                if vtable[idx].access_flags.contains(AccessFlags::FINAL) {
                    return Err(LinkError::FinalOverride);
                }
                if vtable[idx].access_flags.is_package_private() && !declared.access_flags.is_package_private() {
                    tracing::warn!(
                        method = %declared.name,
                        "overriding a package-private method across an access-flag change; \
                         preserved for legacy javac output compatibility"
                    );
                }
                vtable[idx] = VtableSlot::from_declared(declared);
            }
            None => vtable.push(VtableSlot::from_declared(declared)),
        }
    }

    Ok((vtable, declared_virtuals.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Class;

    fn method(name: &str, flags: AccessFlags) -> DeclaredMethod {
        DeclaredMethod {
            name: name.to_string(),
            descriptor: "()V".to_string(),
            access_flags: flags,
            is_static: false,
        }
    }

    #[test]
    fn root_class_gets_declaration_order_vtable() {
        let declared = vec![method("a", AccessFlags::PUBLIC), method("b", AccessFlags::PUBLIC)];
        let (vtable, _) = build_vtable(None, &declared).unwrap();
        assert_eq!(vtable[0].name, "a");
        assert_eq!(vtable[1].name, "b");
    }

    #[test]
    fn override_reuses_superclass_slot() {
        let mut sup = Class::new_root("Sup".to_string());
        let (sup_vtable, _) = build_vtable(None, &[method("run", AccessFlags::PUBLIC)]).unwrap();
        sup.vtable = sup_vtable;
        let (vtable, _) = build_vtable(Some(&sup), &[method("run", AccessFlags::PUBLIC)]).unwrap();
        assert_eq!(vtable.len(), 1);
    }

    #[test]
    fn overriding_a_final_method_fails() {
        let mut sup = Class::new_root("Sup".to_string());
        let (sup_vtable, _) = build_vtable(None, &[method("run", AccessFlags::PUBLIC | AccessFlags::FINAL)]).unwrap();
        sup.vtable = sup_vtable;
        let err = build_vtable(Some(&sup), &[method("run", AccessFlags::PUBLIC)]).unwrap_err();
        assert_eq!(err, LinkError::FinalOverride);
    }

    #[test]
    fn unmatched_declared_method_is_appended() {
        let mut sup = Class::new_root("Sup".to_string());
        let (sup_vtable, _) = build_vtable(None, &[method("a", AccessFlags::PUBLIC)]).unwrap();
        sup.vtable = sup_vtable;
        let (vtable, _) = build_vtable(Some(&sup), &[method("b", AccessFlags::PUBLIC)]).unwrap();
        assert_eq!(vtable.len(), 2);
        assert_eq!(vtable[1].name, "b");
    }
}
