//! The error-kind codes carried as an operand of a synthetic
//! `throw-verification-error` instruction (see the rewriter's deferred-failure
//! path), plus the "reference kind" qualifying what the bad reference was.

use core::fmt;

/// The class of verification/linkage failure a deferred error represents.
///
/// This is the closed, `#[repr(u8)]` encoding written into a rewritten
/// instruction's operand; the open, context-carrying error types used by
/// the rest of the pipeline (`dexprep_vm::link::LinkError`,
/// `dexprep_vm::verify::VerifyError`) each map onto exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
#[non_exhaustive]
pub enum PanicReason {
    /// Structural violation of class/member/descriptor format.
    ClassFormatError = 0x01,
    /// Cycle in the superclass chain.
    ClassCircularity = 0x02,
    /// Referenced class cannot be located, or had an earlier hard failure.
    NoClassDef = 0x03,
    /// Access check failure between classes, fields, or methods.
    IllegalAccess = 0x04,
    /// static/instance mismatch, interface/class mismatch, or final override.
    IncompatibleClassChange = 0x05,
    /// Field resolution failed though the containing class resolved.
    NoSuchField = 0x06,
    /// Method resolution failed though the containing class resolved.
    NoSuchMethod = 0x07,
    /// A register-type data-flow constraint was violated.
    VerifyError = 0x08,
    /// Cross-loader descriptor-equivalence failure, or malformed inheritance.
    LinkageError = 0x09,
    /// `new-instance` of an abstract class or interface.
    Instantiation = 0x0a,
    /// An internal invariant was violated; abort-worthy in debug builds.
    InternalError = 0x0b,
}

impl fmt::Display for PanicReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PanicReason::ClassFormatError => "class format error",
            PanicReason::ClassCircularity => "class circularity",
            PanicReason::NoClassDef => "no class definition found",
            PanicReason::IllegalAccess => "illegal access",
            PanicReason::IncompatibleClassChange => "incompatible class change",
            PanicReason::NoSuchField => "no such field",
            PanicReason::NoSuchMethod => "no such method",
            PanicReason::VerifyError => "verify error",
            PanicReason::LinkageError => "linkage error",
            PanicReason::Instantiation => "instantiation error",
            PanicReason::InternalError => "internal error",
        };
        f.write_str(s)
    }
}

/// What kind of reference a deferred [`PanicReason`] refers to, so the
/// runtime can format a useful message without re-resolving anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum RefKind {
    /// The bad reference was a class.
    Class = 0,
    /// The bad reference was a field.
    Field = 1,
    /// The bad reference was a method.
    Method = 2,
}
