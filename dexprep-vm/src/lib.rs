//! The class-preparation pipeline: class linking, per-method bytecode
//! verification, instruction rewriting/quickening, and the cache-container
//! protocol that ties a prepared image to the sources it was built from.
//!
//! Control flow: container open, DEX swap (external), [`link`] per class,
//! [`verify`] per method, [`rewrite`] per method, register-map build,
//! container close.

pub mod cache;
pub mod context;
pub mod error;
pub mod lattice;
pub mod link;
pub mod pipeline;
pub mod regline;
pub mod regmap;
pub mod regtable;
pub mod rewrite;
pub mod verify;

pub use error::PrepareError;
