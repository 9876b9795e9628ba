//! Pool indices and stable handles.
//!
//! Indices (`StringId`, `TypeId`, `ProtoId`, `FieldId`, `MethodId`) name an
//! entry in the inbound image's constant pools and are only meaningful
//! relative to one image. Handles (`ClassHandle`) are stable indices into
//! the in-memory loaded-classes table and outlive the image they were
//! parsed from; see the "reference-as-integer encoding" design note for why
//! the two are kept as distinct types instead of one tagged integer.

use core::fmt;

macro_rules! pool_index {
    ($name:ident, doc = $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Sentinel meaning "no index" (`NO_INDEX` in the inbound format).
            pub const NONE: Self = Self(u32::MAX);

            /// Wraps a raw pool index.
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            /// Raw pool index.
            pub const fn raw(self) -> u32 {
                self.0
            }

            /// True if this is the `NONE` sentinel.
            pub const fn is_none(self) -> bool {
                self.0 == u32::MAX
            }
        }

        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_none() {
                    write!(f, "{}#none", stringify!($name))
                } else {
                    write!(f, "{}#{}", stringify!($name), self.0)
                }
            }
        }
    };
}

pool_index!(StringId, doc = "Index into the shared string pool.");
pool_index!(TypeId, doc = "Index into the type-descriptor pool.");
pool_index!(ProtoId, doc = "Index into the method-prototype pool.");
pool_index!(FieldId, doc = "Index into the field-reference pool.");
pool_index!(MethodId, doc = "Index into the method-reference pool.");
pool_index!(ClassDefIdx, doc = "Index into the class-definitions table.");

/// A stable index into the process-wide loaded-classes table.
///
/// Unlike the pool ids above, a `ClassHandle` is valid for the lifetime of
/// the table, not just one image; resolving a [`TypeId`] against the
/// loaded-classes table is how the linker turns one into the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct ClassHandle(u32);

impl ClassHandle {
    /// The distinguished handle for `java.lang.Object`-equivalent root class.
    pub const ROOT: Self = Self(0);

    /// Wraps a raw table index.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw table index.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ClassHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

/// A stable slot index into a method's [`UninitMap`](../../dexprep_vm/verify/uninit/struct.UninitMap.html).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct UninitSlot(u16);

impl UninitSlot {
    /// The distinguished slot for an `<init>` method's uninitialized `this`.
    pub const THIS: Self = Self(0);

    /// Wraps a raw slot index.
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Raw slot index.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for UninitSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uninit#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_sentinel_round_trips() {
        assert!(TypeId::NONE.is_none());
        assert!(!TypeId::new(0).is_none());
        assert_eq!(TypeId::new(7).raw(), 7);
    }

    #[test]
    fn class_handle_root_is_zero() {
        assert_eq!(ClassHandle::ROOT.index(), 0);
    }

    #[quickcheck_macros::quickcheck]
    fn type_id_raw_round_trips(raw: u32) -> bool {
        TypeId::new(raw).raw() == raw && TypeId::new(raw).is_none() == (raw == u32::MAX)
    }

    #[quickcheck_macros::quickcheck]
    fn class_handle_index_round_trips(raw: u32) -> bool {
        ClassHandle::new(raw).index() == raw as usize
    }
}
