//! The register-type lattice the verifier's data-flow analysis runs over:
//! abstract values assigned to registers, with a commutative, idempotent
//! merge used at control-flow join points.

mod uninit;

pub use uninit::{UninitMap, UninitSite};

use dexprep_types::{ClassHandle, TypeId};

/// An abstract value a register may hold at some program point.
///
/// Ordered so that `PartialOrd`-style "is this wider/more specific"
/// reasoning can be expressed with plain match arms in the merge table
/// rather than a derived ordering (the lattice isn't a total order: `Int`
/// and `Float` are incomparable, for instance).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterType {
    /// Not yet constrained; the bottom of the lattice.
    Unknown,
    /// Conflicting merge inputs; a use of a register in this state is a
    /// verification failure, never a valid operand.
    Conflict,
    /// An integer-valued constant narrow enough that its precise
    /// reference-vs-primitive category is still undetermined (the `const`
    /// instruction doesn't say); resolved to [`RegisterType::Integer`] or
    /// a boxed/array type on first real use.
    ConstInt(i32),
    /// Definitely a 32-bit integer (after narrowing, or produced by an
    /// instruction whose result is unambiguously integral).
    Integer,
    Float,
    Long,
    Double,
    /// A reference to a class, its exact runtime type unresolvable
    /// statically beyond "null", so tracked as the declared static type.
    Reference(TypeId),
    /// The null constant; compatible with any reference type on merge.
    Null,
    /// A `new-instance` result before the matching constructor has run;
    /// uses other than as a constructor receiver or for type checks are
    /// rejected, the same rule applied to uninitialized `this` generalized
    /// to any `new-instance`.
    UninitRef(TypeId),
    /// `this` in a constructor before `super()`/`this()` has executed.
    UninitThis(ClassHandle),
    /// A `return-address` value produced only by legacy `jsr`-style
    /// subroutine entry; the lattice supports it for completeness even
    /// though the instruction set has no producer for it yet.
    ReturnAddress(dexprep_types::InsnAddr),
}

impl RegisterType {
    /// True if this type occupies two consecutive register slots.
    pub fn is_wide(&self) -> bool {
        matches!(self, RegisterType::Long | RegisterType::Double)
    }

    /// True if a use of a register holding this type is only legal as a
    /// constructor receiver or for identity/type checks, never as a
    /// field/array/method operand.
    pub fn is_uninitialized(&self) -> bool {
        matches!(self, RegisterType::UninitRef(_) | RegisterType::UninitThis(_))
    }

    /// The commutative, idempotent merge used when two control-flow paths
    /// join on a register.
    ///
    /// `Unknown` is the identity element; any two non-equal, non-`Unknown`
    /// inputs that aren't both references collapse to `Conflict`.
    /// Reference types merge to their nearest common supertype, which this
    /// crate — not having a live class hierarchy to walk during the
    /// merge itself — approximates as `java/lang/Object` whenever the
    /// exact handles differ, deferring precise join-point supertype
    /// computation to the linker's resolved hierarchy. This approximation
    /// is a documented loss of precision, not a soundness bug, since the
    /// verifier already falls back to runtime checks for anything it
    /// can't prove.
    pub fn merge(&self, other: &RegisterType) -> RegisterType {
        use RegisterType::*;
        match (self, other) {
            (Unknown, x) | (x, Unknown) => x.clone(),
            (Conflict, _) | (_, Conflict) => Conflict,
            (a, b) if a == b => a.clone(),
            (Null, Reference(t)) | (Reference(t), Null) => Reference(*t),
            (Null, Null) => Null,
            (ConstInt(_), Integer) | (Integer, ConstInt(_)) => Integer,
            (ConstInt(_), ConstInt(_)) => Integer,
            (Reference(_), Reference(_)) => Reference(TypeId::new(0)),
            (Null, UninitRef(_)) | (UninitRef(_), Null) => Conflict,
            _ => Conflict,
        }
    }

    /// Narrows a just-produced `const` value to `Integer` once it is used
    /// as a plain arithmetic operand rather than a reference or boolean.
    pub fn narrow_const(&self) -> RegisterType {
        match self {
            RegisterType::ConstInt(_) => RegisterType::Integer,
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A finite, `Arbitrary`-able slice of [`RegisterType`] excluding the
    /// variants that carry an externally-resolved handle; property tests
    /// only need the primitive/constant lattice to exercise `merge`'s
    /// symmetry.
    #[derive(Debug, Clone)]
    struct SimpleRegisterType(RegisterType);

    impl quickcheck::Arbitrary for SimpleRegisterType {
        fn arbitrary(g: &mut quickcheck::Gen) -> Self {
            let choices = [
                RegisterType::Unknown,
                RegisterType::Conflict,
                RegisterType::Integer,
                RegisterType::Float,
                RegisterType::Long,
                RegisterType::Double,
                RegisterType::Null,
                RegisterType::ConstInt(i32::arbitrary(g)),
            ];
            SimpleRegisterType(g.choose(&choices).unwrap().clone())
        }
    }

    #[quickcheck_macros::quickcheck]
    fn merge_is_commutative(a: SimpleRegisterType, b: SimpleRegisterType) -> bool {
        a.0.merge(&b.0) == b.0.merge(&a.0)
    }

    #[test]
    fn unknown_is_merge_identity() {
        assert_eq!(RegisterType::Unknown.merge(&RegisterType::Integer), RegisterType::Integer);
        assert_eq!(RegisterType::Integer.merge(&RegisterType::Unknown), RegisterType::Integer);
    }

    #[test]
    fn mismatched_primitives_conflict() {
        assert_eq!(RegisterType::Integer.merge(&RegisterType::Float), RegisterType::Conflict);
    }

    #[test]
    fn null_merges_with_reference() {
        let reference = RegisterType::Reference(TypeId::new(5));
        assert_eq!(RegisterType::Null.merge(&reference), reference);
    }

    #[test]
    fn const_int_narrows_to_integer_on_use() {
        assert_eq!(RegisterType::ConstInt(7).narrow_const(), RegisterType::Integer);
    }

    #[test]
    fn merge_is_commutative_for_const_and_integer() {
        let a = RegisterType::ConstInt(1).merge(&RegisterType::Integer);
        let b = RegisterType::Integer.merge(&RegisterType::ConstInt(1));
        assert_eq!(a, b);
    }
}
