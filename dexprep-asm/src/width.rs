//! Register-width categories used throughout the verifier.

use core::fmt;

/// Width category of a value occupying one or two register slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Width {
    /// 32-bit non-reference primitive (boolean, byte, short, char, int, float).
    Cat1NonRef,
    /// 32-bit object/array reference.
    Cat1Ref,
    /// 64-bit primitive occupying two adjacent registers (long, double).
    Cat2,
}

impl Width {
    /// Number of register slots this width occupies.
    pub const fn slots(self) -> u16 {
        match self {
            Width::Cat1NonRef | Width::Cat1Ref => 1,
            Width::Cat2 => 2,
        }
    }
}

impl fmt::Display for Width {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Width::Cat1NonRef => "cat1-non-ref",
            Width::Cat1Ref => "cat1-ref",
            Width::Cat2 => "cat2",
        };
        f.write_str(s)
    }
}
