//!
//! Chemistry models and the model registry
//!
//! A chemistry model fixes the numerical semantics of the recursion for one
//! instrument chemistry: context-indexed emission PMFs over the encoded read
//! outcomes, SNR-dependent move probabilities per context, and the read
//! encoding itself. Models are immutable once built for a given SNR and are
//! shared by reference across evaluators.
//!
use std::sync::Arc;

use fnv::FnvHashMap;
use lazy_static::lazy_static;

use crate::error::{Error, Result};
use crate::read::{Read, Snr};
use crate::template::{build_positions, TemplatePosition};

/// How the HMM advances at a template position.
///
/// Match consumes one template and one read base; branch re-emits the base
/// just incorporated; stick emits a base that does not match the next
/// template base; deletion consumes template only and emits nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveType {
    Match = 0,
    Branch = 1,
    Stick = 2,
    Deletion = 3,
}

/// Which moment of the per-emission log-likelihood to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MomentType {
    First = 0,
    Second = 1,
}

///
/// One chemistry, instantiated for a read's SNR.
///
pub trait Chemistry: Send + Sync {
    /// Registered model name.
    fn name(&self) -> &'static str;

    /// Move probabilities `[match, branch, stick, deletion]` for a context
    /// row. The four sum to one.
    fn context_probs(&self, ctx: usize) -> [f64; 4];

    /// Encode a read into outcome codes, validating bases and pulse widths.
    fn encode_read(&self, read: &Read) -> Result<Vec<u8>>;

    /// Probability of observing `outcome` under `mv` in context
    /// (prev, curr), counter-weighted for the recursion. Deletions carry no
    /// emission and must not be queried.
    fn emission_pr(&self, mv: MoveType, outcome: u8, prev: u8, curr: u8) -> f64;

    /// Cached `E[log p]` / `E[(log p)^2]` of the raw (unweighted) emission
    /// PMF for (context, move).
    fn expected_emission_ll(&self, mv: MoveType, prev: u8, curr: u8, moment: MomentType) -> f64;

    /// Log-factor that removes the per-emission counter weight from a final
    /// score: added once per emitted read base.
    fn undo_counter_weights(&self, n_emissions: usize) -> f64;

    /// Turn a template string into per-position move probabilities.
    ///
    /// Position `i` carries the probabilities of the context
    /// `(base[i], base[i+1])`; the final position is absorbing with
    /// `match = 1`.
    fn populate(&self, tpl: &str) -> Result<Vec<TemplatePosition>> {
        let bases = crate::base::encode_seq(tpl)?;
        Ok(build_positions(self, &bases))
    }
}

/// Constructor registered per model name.
pub type ModelCtor = fn(&Snr) -> Arc<dyn Chemistry>;

lazy_static! {
    static ref MODELS: FnvHashMap<&'static str, ModelCtor> = {
        let mut m = FnvHashMap::default();
        m.insert(
            crate::models::s_p1_c1v2::NAME,
            crate::models::s_p1_c1v2::create as ModelCtor,
        );
        m
    };
}

/// Instantiate a registered chemistry for the given SNR.
pub fn create(name: &str, snr: &Snr) -> Result<Arc<dyn Chemistry>> {
    MODELS
        .get(name)
        .map(|ctor| ctor(snr))
        .ok_or_else(|| Error::ChemistryNotFound(name.to_owned()))
}

/// Names of all registered chemistries.
pub fn registered() -> Vec<&'static str> {
    MODELS.keys().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_exact_match() {
        let snr = [8.0; 4];
        assert!(create("S/P1-C1.2", &snr).is_ok());
        match create("S/P1-C1", &snr) {
            Err(Error::ChemistryNotFound(name)) => assert_eq!(name, "S/P1-C1"),
            _ => panic!("lookup should fail on a prefix"),
        }
    }

    #[test]
    fn registry_is_populated() {
        assert!(registered().contains(&"S/P1-C1.2"));
    }
}
