//!
//! cchmm: pair-HMM consensus scoring
//!
//! Scores how well a candidate template sequence explains a noisy
//! single-molecule read, and efficiently rescores the template under
//! single-base virtual mutations without refilling the full
//! dynamic-programming tableau.
//!
//! # Overview
//!
//! ```text
//! alpha(i, t) = P(emits read[0:i] and sits at template position t)
//! beta(i, t)  = P(emits read[i:n] | starting from template position t)
//! ```
//!
//! An [`Evaluator`] owns the forward and backward matrices for one
//! (read, template) pair. `ll()` reads the total likelihood off the filled
//! matrices; `ll_of(mutation)` prices a candidate single-base edit by
//! recomputing only a few columns around the edit and joining them back to
//! the untouched remainder; `apply_mutation` commits an edit and refills.
//!
//! Per-chemistry emission and transition tables live in [`models`] and are
//! looked up by name through [`model::create`].
//!
pub mod base;
pub mod error;
pub mod evaluator;
pub mod matrix;
pub mod model;
pub mod models;
pub mod mutation;
pub mod read;
pub mod recursor;
pub mod template;

pub use crate::error::{Error, Result};
pub use crate::evaluator::Evaluator;
pub use crate::matrix::ScaledMatrix;
pub use crate::model::{Chemistry, MomentType, MoveType};
pub use crate::mutation::{Mutation, MutationType};
pub use crate::read::{Read, Snr};
pub use crate::template::{Template, TemplatePosition};
