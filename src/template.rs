//!
//! Templates and the virtual-mutation overlay
//!
//! A template is the hidden side of the pair-HMM: per position, the base and
//! the four move probabilities that govern leaving that position. Position
//! `i` is parameterized by the dinucleotide context `(base[i], base[i+1])`;
//! the last position is absorbing.
//!
//! Scoring a candidate edit must not disturb the template the matrices were
//! filled against, so an edit can be installed as a *virtual* overlay: reads
//! through the template see the edited view, while the backing positions
//! stay untouched and [`Template::reset`] restores them exactly. Committing
//! an edit rewrites the backing store instead.
//!
use std::ops::Index;
use std::sync::Arc;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::base::{context, encode_seq, BASES};
use crate::error::{Error, Result};
use crate::model::{Chemistry, MomentType, MoveType};
use crate::mutation::{Mutation, MutationType};

///
/// One template position: its base and the probabilities of the four moves
/// out of it. The four probabilities sum to one; the final position of a
/// template carries `(1, 0, 0, 0)`.
///
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemplatePosition {
    /// ASCII base.
    pub base: u8,
    /// Base code 0..=3.
    pub idx: u8,
    pub p_match: f64,
    pub p_branch: f64,
    pub p_stick: f64,
    pub p_del: f64,
}

/// Build the position vector for encoded bases.
pub(crate) fn build_positions<C: Chemistry + ?Sized>(
    chem: &C,
    bases: &[u8],
) -> Vec<TemplatePosition> {
    let mut positions = Vec::with_capacity(bases.len());
    for (b, next) in bases.iter().copied().tuple_windows() {
        let p = chem.context_probs(context(b, next));
        positions.push(TemplatePosition {
            base: BASES[b as usize],
            idx: b,
            p_match: p[0],
            p_branch: p[1],
            p_stick: p[2],
            p_del: p[3],
        });
    }
    if let Some(&b) = bases.last() {
        positions.push(TemplatePosition {
            base: BASES[b as usize],
            idx: b,
            p_match: 1.0,
            p_branch: 0.0,
            p_stick: 0.0,
            p_del: 0.0,
        });
    }
    positions
}

// The virtual view of a mutated template: positions below `start` read
// through to the backing store, positions in the window come from the
// recomputed block, and the tail reads through shifted by the length change.
#[derive(Debug, Clone)]
struct Overlay {
    start: usize,
    window: Vec<TemplatePosition>,
    len_diff: isize,
    virt_len: usize,
}

///
/// A template with at most one virtual mutation in effect.
///
pub struct Template {
    chem: Arc<dyn Chemistry>,
    bases: Vec<u8>,
    positions: Vec<TemplatePosition>,
    overlay: Option<Overlay>,
}

impl Template {
    pub fn new(chem: Arc<dyn Chemistry>, tpl: &str) -> Result<Template> {
        let bases = encode_seq(tpl)?;
        let positions = build_positions(&*chem, &bases);
        Ok(Template {
            chem,
            bases,
            positions,
            overlay: None,
        })
    }

    /// Current (overlay-aware) length.
    pub fn len(&self) -> usize {
        match &self.overlay {
            Some(ov) => ov.virt_len,
            None => self.positions.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The base edited in by `mutation` at virtual index `i`, reading
    /// through to the backing bases elsewhere.
    fn virtual_base(&self, mutation: &Mutation, i: usize) -> u8 {
        let s = mutation.start();
        match mutation.kind {
            MutationType::Substitution => {
                if i == s {
                    mutation.base.unwrap()
                } else {
                    self.bases[i]
                }
            }
            MutationType::Insertion => {
                if i < s {
                    self.bases[i]
                } else if i == s {
                    mutation.base.unwrap()
                } else {
                    self.bases[i - 1]
                }
            }
            MutationType::Deletion => {
                if i < s {
                    self.bases[i]
                } else {
                    self.bases[i + 1]
                }
            }
        }
    }

    ///
    /// Install `mutation` as the virtual view of this template.
    ///
    /// Only the edited position and its left neighbour change their move
    /// probabilities (their contexts are the only ones touched), so the
    /// overlay recomputes just that window and shifts the tail.
    ///
    /// At most one virtual mutation may be in effect; [`Template::reset`]
    /// restores the unmutated view bit-for-bit.
    ///
    pub fn mutate(&mut self, mutation: &Mutation) {
        assert!(self.overlay.is_none(), "virtual mutation already in effect");
        let len = self.positions.len();
        assert!(mutation.start() <= mutation.end() && mutation.end() <= len);

        let virt_len = (len as isize + mutation.len_diff()) as usize;
        let start = mutation.start().saturating_sub(1);
        let end = match mutation.kind {
            MutationType::Substitution | MutationType::Insertion => mutation.start() + 1,
            MutationType::Deletion => mutation.start(),
        }
        .min(virt_len);

        let mut window = Vec::with_capacity(end.saturating_sub(start));
        for i in start..end {
            let b = self.virtual_base(mutation, i);
            window.push(if i + 1 == virt_len {
                TemplatePosition {
                    base: BASES[b as usize],
                    idx: b,
                    p_match: 1.0,
                    p_branch: 0.0,
                    p_stick: 0.0,
                    p_del: 0.0,
                }
            } else {
                let next = self.virtual_base(mutation, i + 1);
                let p = self.chem.context_probs(context(b, next));
                TemplatePosition {
                    base: BASES[b as usize],
                    idx: b,
                    p_match: p[0],
                    p_branch: p[1],
                    p_stick: p[2],
                    p_del: p[3],
                }
            });
        }

        self.overlay = Some(Overlay {
            start,
            window,
            len_diff: mutation.len_diff(),
            virt_len,
        });
    }

    /// Drop the virtual view.
    pub fn reset(&mut self) {
        self.overlay = None;
    }

    /// Commit one mutation to the backing store.
    pub fn apply_mutation(&mut self, mutation: &Mutation) {
        assert!(self.overlay.is_none(), "cannot commit under a virtual view");
        let s = mutation.start();
        assert!(mutation.end() <= self.bases.len());
        match mutation.kind {
            MutationType::Substitution => self.bases[s] = mutation.base.unwrap(),
            MutationType::Insertion => self.bases.insert(s, mutation.base.unwrap()),
            MutationType::Deletion => {
                self.bases.remove(s);
            }
        }
        self.positions = build_positions(&*self.chem, &self.bases);
    }

    ///
    /// Commit a batch, highest position first so earlier commits cannot
    /// shift the coordinates of later ones. Overlapping edits are rejected
    /// before anything is committed.
    ///
    pub fn apply_mutations(&mut self, mutations: &[Mutation]) -> Result<()> {
        let mut muts: Vec<Mutation> = mutations.to_vec();
        muts.sort_by(|a, b| b.start.cmp(&a.start).then(b.end.cmp(&a.end)));
        for pair in muts.windows(2) {
            if pair[0].overlaps(&pair[1]) {
                return Err(Error::TemplateOverlap(pair[1].start()));
            }
        }
        for m in &muts {
            let s = m.start();
            assert!(m.end() <= self.bases.len());
            match m.kind {
                MutationType::Substitution => self.bases[s] = m.base.unwrap(),
                MutationType::Insertion => self.bases.insert(s, m.base.unwrap()),
                MutationType::Deletion => {
                    self.bases.remove(s);
                }
            }
        }
        self.positions = build_positions(&*self.chem, &self.bases);
        Ok(())
    }

    ///
    /// Mean and variance of the read log-likelihood expected under the
    /// model over template positions `[start, end)`, from the cached
    /// emission moments and the per-position move probabilities. The final
    /// position of the interval has no real outgoing move and is excluded.
    ///
    pub fn normal_parameters(&self, start: usize, end: usize) -> (f64, f64) {
        let end = end.min(self.len());
        let mut mean = 0.0;
        let mut var = 0.0;
        for i in start..end.saturating_sub(1) {
            let (m, v) = self.site_normal_parameters(i);
            mean += m;
            var += v;
        }
        (mean, var)
    }

    fn site_normal_parameters(&self, i: usize) -> (f64, f64) {
        let pos = &self[i];
        let prev = if i == 0 { 0 } else { self[i - 1].idx };
        let curr = pos.idx;

        let moment = |mv, m| self.chem.expected_emission_ll(mv, prev, curr, m);
        let e_m = moment(MoveType::Match, MomentType::First);
        let e_b = moment(MoveType::Branch, MomentType::First);
        let e_s = moment(MoveType::Stick, MomentType::First);
        let e2_m = moment(MoveType::Match, MomentType::Second);
        let e2_b = moment(MoveType::Branch, MomentType::Second);
        let e2_s = moment(MoveType::Stick, MomentType::Second);

        let (l_m, l_b, l_s, l_d) = (
            pos.p_match.ln(),
            pos.p_branch.ln(),
            pos.p_stick.ln(),
            pos.p_del.ln(),
        );

        // per-site log-likelihood is log(move prob) + log(emission prob);
        // deletions emit nothing
        let mean = pos.p_match * (l_m + e_m)
            + pos.p_branch * (l_b + e_b)
            + pos.p_stick * (l_s + e_s)
            + pos.p_del * l_d;
        let second = pos.p_match * (l_m * l_m + 2.0 * l_m * e_m + e2_m)
            + pos.p_branch * (l_b * l_b + 2.0 * l_b * e_b + e2_b)
            + pos.p_stick * (l_s * l_s + 2.0 * l_s * e_s + e2_s)
            + pos.p_del * (l_d * l_d);
        (mean, second - mean * mean)
    }

    /// The committed (overlay-free) base codes.
    pub fn bases(&self) -> &[u8] {
        &self.bases
    }
}

impl Index<usize> for Template {
    type Output = TemplatePosition;

    fn index(&self, i: usize) -> &TemplatePosition {
        match &self.overlay {
            None => &self.positions[i],
            Some(ov) => {
                if i < ov.start {
                    &self.positions[i]
                } else if i < ov.start + ov.window.len() {
                    &ov.window[i - ov.start]
                } else {
                    &self.positions[(i as isize - ov.len_diff) as usize]
                }
            }
        }
    }
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let seq: String = (0..self.len()).map(|i| self[i].base as char).collect();
        f.debug_struct("Template")
            .field("seq", &seq)
            .field("virtual", &self.overlay.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::create;
    use approx::assert_abs_diff_eq;

    const SNR: [f64; 4] = [8.0, 8.0, 8.0, 8.0];

    fn template(seq: &str) -> Template {
        let chem = create("S/P1-C1.2", &SNR).unwrap();
        Template::new(chem, seq).unwrap()
    }

    fn positions_of(tpl: &Template) -> Vec<TemplatePosition> {
        (0..tpl.len()).map(|i| tpl[i]).collect()
    }

    #[test]
    fn populate_round_trip() {
        let tpl = template("ACGTACGT");
        assert_eq!(tpl.len(), 8);
        let last = tpl[7];
        assert_eq!(
            (last.p_match, last.p_branch, last.p_stick, last.p_del),
            (1.0, 0.0, 0.0, 0.0)
        );
        for i in 0..8 {
            let p = tpl[i];
            assert_abs_diff_eq!(
                p.p_match + p.p_branch + p.p_stick + p.p_del,
                1.0,
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn empty_template_populates_empty() {
        let chem = create("S/P1-C1.2", &SNR).unwrap();
        assert_eq!(chem.populate("").unwrap().len(), 0);
    }

    #[test]
    fn mutate_reset_round_trip() {
        let mut tpl = template("ACGTACGT");
        let before = positions_of(&tpl);
        for m in [
            Mutation::substitution(4, 1),
            Mutation::insertion(4, 3),
            Mutation::deletion(4),
            Mutation::substitution(0, 2),
            Mutation::insertion(8, 0),
            Mutation::deletion(7),
        ] {
            tpl.mutate(&m);
            tpl.reset();
            assert_eq!(positions_of(&tpl), before);
        }
    }

    // the overlay view must agree elementwise with a template rebuilt from
    // the edited sequence
    #[test]
    fn overlay_matches_rebuilt_template() {
        let seq = "ACGTACGTGG";
        let len = seq.len() as u32;
        let mut muts = Vec::new();
        for s in 0..len {
            for b in 0..4 {
                muts.push(Mutation::substitution(s, b));
                muts.push(Mutation::insertion(s, b));
            }
            muts.push(Mutation::deletion(s));
        }
        for b in 0..4 {
            muts.push(Mutation::insertion(len, b));
        }

        for m in &muts {
            let mut tpl = template(seq);
            tpl.mutate(m);
            let virt = positions_of(&tpl);

            let mut committed = template(seq);
            committed.apply_mutation(m);
            let rebuilt = positions_of(&committed);

            assert_eq!(virt, rebuilt, "mutation {:?}", m);
            tpl.reset();
        }
    }

    #[test]
    fn batch_commits_descending() {
        let mut tpl = template("ACGTACGT");
        // positions picked so ascending application would shift coordinates
        let muts = vec![Mutation::deletion(2), Mutation::substitution(6, 0)];
        tpl.apply_mutations(&muts).unwrap();
        let seq: String = (0..tpl.len()).map(|i| tpl[i].base as char).collect();
        assert_eq!(seq, "ACTACAT");
    }

    #[test]
    fn batch_rejects_overlap() {
        let mut tpl = template("ACGTACGT");
        let muts = vec![Mutation::deletion(4), Mutation::substitution(4, 1)];
        assert!(matches!(
            tpl.apply_mutations(&muts),
            Err(Error::TemplateOverlap(_))
        ));
    }

    #[test]
    fn normal_parameters_are_finite_and_negative() {
        let tpl = template("ACGTACGT");
        let (mean, var) = tpl.normal_parameters(0, tpl.len());
        assert!(mean.is_finite() && mean < 0.0);
        assert!(var.is_finite() && var > 0.0);
    }
}
