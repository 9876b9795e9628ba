//! The umbrella error type returned by the pipeline's top-level entry
//! points, with `From` impls collecting each component's error.

use crate::link::LinkError;
use crate::verify::VerifyError;
use dexprep_image::FormatError;

/// Any failure of the class-preparation pipeline.
#[derive(Debug, derive_more::Display, derive_more::From)]
#[non_exhaustive]
pub enum PrepareError {
    /// The inbound image was structurally invalid.
    #[display("format error: {_0}")]
    Format(FormatError),
    /// Class linking failed.
    #[display("link error: {_0}")]
    Link(LinkError),
    /// Method verification failed.
    #[display("verify error: {_0}")]
    Verify(VerifyError),
    /// An I/O failure while reading or writing the cache container.
    #[display("I/O error: {_0}")]
    Io(std::io::Error),
    /// An internal invariant was violated. `debug_assert!`-checked in debug
    /// builds; recorded here rather than unwound past in release builds.
    #[display("internal error: {_0}")]
    #[from(ignore)]
    InternalError(String),
}

impl std::error::Error for PrepareError {}
