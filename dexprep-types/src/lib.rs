#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]

//! Atomic types shared by every crate in the class-preparation pipeline:
//! pool indices, stable handles into the loaded-classes table, a MUTF-8
//! codec, and a bounds-checked byte cursor for reading the image format.

extern crate alloc;

mod ids;
pub mod mutf8;
pub mod cursor;

pub use ids::*;

/// Index of an instruction within a method's code unit array (16-bit units).
pub type InsnAddr = u32;

/// A register number within a method's register file.
pub type RegisterId = u16;
