#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]

//! The inbound image format, the member-name/descriptor validators the DEX
//! structural sanity pass consults, and the versioned cache-container wire
//! protocol that ties a prepared image to the sources it was built from.

extern crate alloc;

pub mod classdata;
pub mod container;
pub mod error;
pub mod format;
pub mod validate;

pub use error::FormatError;
