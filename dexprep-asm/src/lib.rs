#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]

//! Instruction set definitions for the class-preparation pipeline.
//!
//! This crate only describes the *type constraints* opcodes impose (what
//! the verifier needs) and the specialized/quickened forms the rewriter
//! produces; it is not an interpreter and does not define run-time
//! semantics.

extern crate alloc;

mod instruction;
pub mod decode;
pub mod panic_reason;
pub mod quick;
mod width;

pub use instruction::{ArrayWidth, FieldRef, Instruction, InvokeKind, MethodRef};
pub use panic_reason::PanicReason;
pub use width::Width;
