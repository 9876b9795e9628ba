//! Classification shared between the instruction set and the rewriter:
//! which bucket a quickening substitution belongs to, since the commit
//! order (volatile, then correctness, then performance) is a property of
//! the instruction set's contract, not an implementation detail of the
//! pass that applies it.

use core::fmt;

/// A process-wide index into the "inline table" of whitelisted methods the
/// rewriter may replace an `invoke-*` with `execute-inline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct InlineIndex(u16);

impl InlineIndex {
    /// Wraps a raw inline-table slot.
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Raw inline-table slot.
    pub const fn raw(self) -> u16 {
        self.0
    }
}

/// Which bucket a quickening substitution belongs to; substitutions are
/// tried in this order and the first applicable one wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SubstitutionClass {
    /// Must apply regardless of memory model (volatile wide access,
    /// object-init, constructor return barrier).
    Essential,
    /// Must apply only on architectures with relaxed memory ordering
    /// (narrow volatile field access).
    SmpEssential,
    /// Pure performance win, safe to skip entirely (`*-quick`,
    /// `execute-inline`).
    NonEssential,
}

impl fmt::Display for SubstitutionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubstitutionClass::Essential => "essential",
            SubstitutionClass::SmpEssential => "smp-essential",
            SubstitutionClass::NonEssential => "non-essential",
        };
        f.write_str(s)
    }
}
