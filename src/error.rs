//!
//! Error types surfaced at the crate boundary
//!
use thiserror::Error;

/// Everything that can go wrong while scoring a read against a template.
///
/// Numerical underflow inside a single matrix column is absorbed by
/// per-column rescaling and is never an error; only structural inconsistency
/// (the forward and backward passes fail to meet) surfaces as
/// [`Error::AlphaBetaMismatch`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A template or read character outside {A, C, G, T}.
    #[error("invalid base {0:?} in sequence")]
    InvalidBase(char),

    /// A read pulse width of zero.
    #[error("invalid pulse width at read position {0}")]
    InvalidPulseWidth(usize),

    /// An encoded read outcome fell outside the observation alphabet.
    #[error("read outcome {0} out of range")]
    ReadEncoding(u8),

    /// The requested chemistry model is not registered.
    #[error("unknown chemistry model {0:?}")]
    ChemistryNotFound(String),

    /// The forward and backward matrices carry no joint mass: a zero-mass
    /// column, disconnected bands, or a read the template cannot explain.
    #[error("alpha and beta matrices disagree on the read likelihood")]
    AlphaBetaMismatch,

    /// A batch of mutations contains two edits touching the same positions.
    #[error("overlapping mutations in batch near template position {0}")]
    TemplateOverlap(usize),
}

pub type Result<T> = std::result::Result<T, Error>;
