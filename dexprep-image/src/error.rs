//! Structural errors raised while parsing or validating the inbound image.

use alloc::string::String;
use dexprep_types::{ClassDefIdx, FieldId, MethodId, TypeId};

/// A structural violation of the image, member, or descriptor format.
///
/// This is the format-level `ClassFormatError`, scoped to the
/// parsing/validation boundary; linkage and verification failures live in
/// `dexprep_vm`.
#[derive(Clone, PartialEq, Eq, derive_more::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum FormatError {
    /// The header's magic bytes didn't match.
    #[display("bad magic bytes")]
    BadMagic,
    /// The header declared a version this pipeline doesn't support.
    #[display("unsupported image version")]
    UnsupportedVersion,
    /// The image ended before a length-prefixed region did.
    #[display("truncated image")]
    Truncated,
    /// A pool index pointed outside its pool.
    #[display("pool index {index} out of bounds (pool has {len} entries)")]
    PoolIndexOutOfBounds { index: u32, len: u32 },
    /// A class definition referenced a class index twice.
    #[display("duplicate class definition for {idx:?}")]
    DuplicateClassDef { idx: ClassDefIdx },
    /// A member name failed the name validator.
    #[display("invalid member name: {reason}")]
    InvalidMemberName { reason: String },
    /// A type descriptor failed the descriptor validator.
    #[display("invalid type descriptor: {reason}")]
    InvalidDescriptor { reason: String },
    /// A field reference's declaring-class/name/type triple was malformed.
    #[display("malformed field reference {field:?}")]
    MalformedFieldRef { field: FieldId },
    /// A method reference's declaring-class/name/prototype triple was malformed.
    #[display("malformed method reference {method:?}")]
    MalformedMethodRef { method: MethodId },
    /// A try range or catch-handler table was inconsistent (e.g. overlap,
    /// out-of-range address, zero-length range).
    #[display("malformed try/catch table: {reason}")]
    MalformedTryCatch { reason: String },
    /// A class's superclass/interface type index could not even be decoded
    /// as a descriptor, before any linking is attempted.
    #[display("malformed inheritance reference for {ty:?}")]
    MalformedInheritanceRef { ty: TypeId },
    /// The image checksum did not match its declared contents.
    #[display("image checksum mismatch")]
    ChecksumMismatch,
    /// A string pool entry's length prefix or MUTF-8 bytes didn't decode.
    #[display("malformed string pool entry at index {index}")]
    InvalidStringPoolEntry { index: u32 },
}

impl core::fmt::Debug for FormatError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        <Self as core::fmt::Display>::fmt(self, f)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FormatError {}
