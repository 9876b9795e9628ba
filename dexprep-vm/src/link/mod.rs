//! The class linker: resolves superclass/interface references,
//! builds the vtable and interface table (with miranda synthesis),
//! computes field layout, and inherits finalizability/reference-kind
//! flags. Each stage of linking gets its own small focused module, with
//! this module owning the `Class` record and orchestrating the stages
//! in order.

mod fields;
mod iftable;
mod vtable;

pub use fields::{DeclaredField, FieldLayout, LinkedField};
pub use iftable::IfTableEntry;
pub use vtable::VtableSlot;

use dexprep_image::format::AccessFlags;
use dexprep_types::{ClassHandle, TypeId};

/// The class-linking state machine: monotonic except for the terminal
/// `Error` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassState {
    Idx,
    Loaded,
    Resolved,
    Verified,
    Initializing,
    Initialized,
    Error,
}

/// Which distinguished `java.lang.ref.Reference` subkind a class is, if
/// any, inherited down the superclass chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Soft,
    Weak,
    Phantom,
    Finalizer,
}

/// A loaded class as the linker sees it: resolved supertype links, the
/// built vtable/iftable, computed field layout, and the flags the linker
/// derives along the way.
#[derive(Debug, Clone)]
pub struct Class {
    pub name: String,
    pub access_flags: AccessFlags,
    pub state: ClassState,
    pub superclass_type: Option<TypeId>,
    pub superclass: Option<ClassHandle>,
    pub interface_types: Vec<TypeId>,
    pub interfaces: Vec<ClassHandle>,
    pub vtable: Vec<VtableSlot>,
    pub iftable: Vec<IfTableEntry>,
    pub instance_fields: Vec<LinkedField>,
    pub static_fields: Vec<LinkedField>,
    pub layout: FieldLayout,
    pub finalizable: bool,
    pub reference_kind: Option<ReferenceKind>,
    /// Set once a recorded verify error must be replayed on every future
    /// initialization attempt of this class.
    pub sticky_error: Option<String>,
}

impl Class {
    /// Builds an unlinked, root-superclass-less placeholder for tests and
    /// for `java/lang/Object` itself.
    pub fn new_root(name: String) -> Self {
        Class {
            name,
            access_flags: AccessFlags::PUBLIC,
            state: ClassState::Idx,
            superclass_type: None,
            superclass: None,
            interface_types: Vec::new(),
            interfaces: Vec::new(),
            vtable: Vec::new(),
            iftable: Vec::new(),
            instance_fields: Vec::new(),
            static_fields: Vec::new(),
            layout: FieldLayout::default(),
            finalizable: false,
            reference_kind: None,
            sticky_error: None,
        }
    }

    /// True once this class (or an ancestor, tracked by propagation
    /// during [`link`]) is known to finalize or belong to the reference
    /// family.
    pub fn needs_gc_special_handling(&self) -> bool {
        self.finalizable || self.reference_kind.is_some()
    }
}

/// Failure of any linker obligation.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
#[non_exhaustive]
pub enum LinkError {
    #[display("no definition found for referenced class")]
    NoClassDef,
    #[display("class circularity detected in the supertype graph")]
    ClassCircularity,
    #[display("illegal access to a superclass or interface")]
    IllegalAccess,
    #[display("incompatible class change")]
    IncompatibleClassChange,
    #[display("linkage error: {reason}")]
    Linkage { reason: String },
    #[display("malformed class definition: {reason}")]
    ClassFormat { reason: String },
    #[display("verify error recorded during linking: {reason}")]
    Verify { reason: String },
    #[display("a final method was overridden")]
    FinalOverride,
    #[display("a final class was subclassed")]
    FinalSuperclass,
}

impl std::error::Error for LinkError {}

/// Input describing one declared method, independent of the eventual
/// vtable slot it's assigned.
#[derive(Debug, Clone)]
pub struct DeclaredMethod {
    pub name: String,
    pub descriptor: String,
    pub access_flags: AccessFlags,
    pub is_static: bool,
}

/// Links one class against its already-linked superclass and interfaces:
/// builds the vtable and interface table, computes field layout, and
/// inherits the finalizable/reference-kind flags. Superclass/interface
/// resolution and cross-loader validation happen before/after this call,
/// since they need the broader class table rather than just the
/// immediate parents.
pub fn link_class(
    mut class: Class,
    superclass: Option<&Class>,
    interfaces: &[&Class],
    declared_virtuals: &[DeclaredMethod],
    declared_instance_fields: &[DeclaredField],
    declared_static_fields: &[DeclaredField],
) -> Result<Class, LinkError> {
    if let Some(sup) = superclass {
        if sup.access_flags.contains(AccessFlags::FINAL) {
            return Err(LinkError::FinalSuperclass);
        }
        if sup.access_flags.contains(AccessFlags::INTERFACE) {
            return Err(LinkError::IncompatibleClassChange);
        }
    }
    for iface in interfaces {
        if !iface.access_flags.contains(AccessFlags::INTERFACE) {
            return Err(LinkError::IncompatibleClassChange);
        }
    }

    let (built_vtable, mut virtuals) = vtable::build_vtable(superclass, declared_virtuals)?;
    class.vtable = built_vtable;

    let iftable = iftable::build_iftable(superclass, interfaces, &mut class.vtable, &mut virtuals)?;
    class.iftable = iftable;

    let layout = fields::compute_layout(
        superclass.map(|s| &s.layout),
        declared_instance_fields,
        declared_static_fields,
    );
    class.instance_fields = layout.instance_fields.clone();
    class.static_fields = layout.static_fields.clone();
    class.layout = layout;

    class.finalizable = superclass.map(|s| s.finalizable).unwrap_or(false)
        || virtuals.iter().any(|m| m.name == "finalize" && m.descriptor == "()V" && !m.is_static);
    class.reference_kind = superclass.and_then(|s| s.reference_kind);

    class.state = ClassState::Resolved;
    Ok(class)
}

/// Checks that a reference type named in an override's or
/// interface-implementation's signature resolves to the same class
/// object through both defining loaders. `resolve_a`/`resolve_b` stand in
/// for the two loader-scoped resolution functions; this crate doesn't
/// model class loaders as first-class objects; callers pass closures
/// backed by whatever loader table they maintain.
pub fn validate_cross_loader_descriptor(
    descriptor_type_name: &str,
    resolve_a: impl Fn(&str) -> Option<ClassHandle>,
    resolve_b: impl Fn(&str) -> Option<ClassHandle>,
) -> Result<(), LinkError> {
    match (resolve_a(descriptor_type_name), resolve_b(descriptor_type_name)) {
        (Some(a), Some(b)) if a == b => Ok(()),
        (Some(_), Some(_)) => Err(LinkError::Linkage {
            reason: format!("{descriptor_type_name} resolves to different classes across loaders"),
        }),
        _ => Err(LinkError::NoClassDef),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method(name: &str, descriptor: &str) -> DeclaredMethod {
        DeclaredMethod {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            access_flags: AccessFlags::PUBLIC,
            is_static: false,
        }
    }

    #[test]
    fn linking_root_class_fills_vtable_in_declaration_order() {
        let class = Class::new_root("Root".to_string());
        let declared = vec![method("a", "()V"), method("b", "()V")];
        let linked = link_class(class, None, &[], &declared, &[], &[]).unwrap();
        assert_eq!(linked.vtable.len(), 2);
        assert_eq!(linked.state, ClassState::Resolved);
    }

    #[test]
    fn final_superclass_is_rejected() {
        let mut sup = Class::new_root("Sup".to_string());
        sup.access_flags = AccessFlags::PUBLIC | AccessFlags::FINAL;
        let class = Class::new_root("Sub".to_string());
        let err = link_class(class, Some(&sup), &[], &[], &[], &[]).unwrap_err();
        assert_eq!(err, LinkError::FinalSuperclass);
    }

    #[test]
    fn non_interface_in_interface_list_is_rejected() {
        let class = Class::new_root("Impl".to_string());
        let not_iface = Class::new_root("NotIface".to_string());
        let err = link_class(class, None, &[&not_iface], &[], &[], &[]).unwrap_err();
        assert_eq!(err, LinkError::IncompatibleClassChange);
    }

    #[test]
    fn finalizer_override_marks_class_finalizable() {
        let class = Class::new_root("Finalizes".to_string());
        let declared = vec![method("finalize", "()V")];
        let linked = link_class(class, None, &[], &declared, &[], &[]).unwrap();
        assert!(linked.finalizable);
    }

    #[test]
    fn finalizable_inherits_down_the_superclass_chain() {
        let mut sup = Class::new_root("Sup".to_string());
        sup.finalizable = true;
        let class = Class::new_root("Sub".to_string());
        let linked = link_class(class, Some(&sup), &[], &[], &[], &[]).unwrap();
        assert!(linked.finalizable);
    }

    #[test]
    fn cross_loader_descriptor_mismatch_is_a_linkage_error() {
        let a = ClassHandle::new(1);
        let b = ClassHandle::new(2);
        let err = validate_cross_loader_descriptor("Foo", |_| Some(a), |_| Some(b)).unwrap_err();
        assert_eq!(
            err,
            LinkError::Linkage {
                reason: "Foo resolves to different classes across loaders".to_string()
            }
        );
    }

    #[test]
    fn cross_loader_descriptor_match_succeeds() {
        let a = ClassHandle::new(1);
        assert!(validate_cross_loader_descriptor("Foo", |_| Some(a), |_| Some(a)).is_ok());
    }
}
