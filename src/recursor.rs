//!
//! Banded forward/backward recursion and incremental extension
//!
//! # The recursion
//!
//! `alpha(i, j)` is the (scaled) probability of having emitted the first `i`
//! read bases with `j` template bases consumed; `beta(i, j)` the probability
//! of emitting the rest of the read from there. Standing at column `j`, the
//! next template base is `base[j]` and the moves are governed by the context
//! `(base[j-1], base[j])`, which is stored on template position `j - 1`:
//!
//! ```text
//! alpha(i, j) =
//!     alpha(i-1, j-1) * match(j-1)  * Em(MATCH,  x[i-1]; b[j-2], b[j-1])
//!   + alpha(i-1, j)   * branch(j-1) * Em(BRANCH, x[i-1]; b[j-1], b[j-1])
//!   + alpha(i-1, j)   * stick(j-1)  * Em(STICK,  x[i-1]; b[j-1], b[j])
//!   + alpha(i,   j-1) * del(j-2)
//! ```
//!
//! The move from the start state into the first template position carries
//! probability one and uses the homopolymer context of the first base; the
//! final position is absorbing, so column `L` only drains into its terminal
//! row.
//!
//! # Banding
//!
//! Each column is computed over a row band seeded from the previous column's
//! band and extended while scores stay within `score_diff` nats of the
//! column maximum. A guide matrix (the already-filled opposite-direction
//! matrix) can force a column band wider so the two passes stay connected.
//!
//! # Extension
//!
//! `extend_alpha` / `extend_beta` recompute a handful of columns against the
//! template's *virtual* (mutated) view, seeded from the neighbouring column
//! of the full matrix; `link_alpha_beta` then joins the extension to the
//! untouched far side across one explicit match/deletion move. This prices a
//! candidate mutation in time proportional to the band around the edit.
//!
use std::sync::Arc;

use log::debug;

use crate::error::{Error, Result};
use crate::matrix::ScaledMatrix;
use crate::model::{Chemistry, MoveType};
use crate::read::Read;
use crate::template::Template;

/// Columns reserved for the extension buffer; no single-base edit needs more.
pub const EXTEND_BUFFER_COLUMNS: usize = 8;

///
/// The pair-HMM over one (read, template) pair.
///
pub struct Recursor {
    chem: Arc<dyn Chemistry>,
    pub(crate) tpl: Template,
    read: Read,
    emissions: Vec<u8>,
    score_diff: f64,
}

impl Recursor {
    pub fn new(
        chem: Arc<dyn Chemistry>,
        tpl: Template,
        read: Read,
        emissions: Vec<u8>,
        score_diff: f64,
    ) -> Recursor {
        assert!(score_diff >= 0.0);
        assert_eq!(emissions.len(), read.len());
        Recursor {
            chem,
            tpl,
            read,
            emissions,
            score_diff,
        }
    }

    pub fn read(&self) -> &Read {
        &self.read
    }

    pub fn read_len(&self) -> usize {
        self.emissions.len()
    }

    pub fn undo_counter_weights(&self) -> f64 {
        self.chem.undo_counter_weights(self.emissions.len())
    }

    #[inline]
    fn emit(&self, mv: MoveType, em: u8, prev: u8, curr: u8) -> f64 {
        self.chem.emission_pr(mv, em, prev, curr)
    }

    ///
    /// Fill the forward matrix column by column, banding rows against
    /// `score_diff` and never narrower than the guide's band at the same
    /// column.
    ///
    pub fn fill_alpha(&self, guide: Option<&ScaledMatrix>, alpha: &mut ScaledMatrix) {
        let n = self.emissions.len();
        let l = self.tpl.len();
        debug_assert_eq!(alpha.rows(), n + 1);
        debug_assert_eq!(alpha.columns(), l + 1);

        let thresh_factor = (-self.score_diff).exp();

        alpha.start_column(0);
        alpha.set(0, 0, 1.0);
        alpha.finish_column(0, 0, 1);

        let mut hint_begin = 0;
        let mut hint_end = 1;

        for j in 1..=l {
            let curr = self.tpl[j - 1];
            let prev = if j > 1 { Some(self.tpl[j - 2]) } else { None };
            let next_idx = if j < l { Some(self.tpl[j].idx) } else { None };

            let mut begin_row = hint_begin;
            let mut required_end = (hint_end + 1).min(n + 1);
            if let Some(g) = guide {
                if !g.is_column_empty(j) {
                    let (gb, ge) = g.used_row_range(j);
                    begin_row = begin_row.min(gb);
                    required_end = required_end.max(ge.min(n + 1));
                }
            }

            alpha.start_column(j);
            let mut max_score = 0.0f64;
            let mut threshold = 0.0f64;
            let mut score = 0.0f64;
            let mut i = begin_row;
            while i <= n && (i < required_end || score >= threshold) {
                score = 0.0;
                if i > 0 {
                    let em = self.emissions[i - 1];
                    score += match prev {
                        Some(p) => {
                            alpha.get(i - 1, j - 1)
                                * p.p_match
                                * self.emit(MoveType::Match, em, p.idx, curr.idx)
                        }
                        // out of the start state: transition probability one
                        None => {
                            alpha.get(i - 1, 0)
                                * self.emit(MoveType::Match, em, curr.idx, curr.idx)
                        }
                    };
                    score += alpha.get(i - 1, j)
                        * curr.p_branch
                        * self.emit(MoveType::Branch, em, curr.idx, curr.idx);
                    if let Some(nx) = next_idx {
                        score += alpha.get(i - 1, j)
                            * curr.p_stick
                            * self.emit(MoveType::Stick, em, curr.idx, nx);
                    }
                }
                if let Some(p) = prev {
                    score += alpha.get(i, j - 1) * p.p_del;
                }
                alpha.set(i, j, score);
                if score > max_score {
                    max_score = score;
                    threshold = max_score * thresh_factor;
                }
                i += 1;
            }
            let end_row = i;
            alpha.finish_column(j, begin_row, end_row);

            if !alpha.is_column_empty(j) {
                // the column max is one after the rescale; carry only rows
                // within the banding threshold into the next column's hint
                let mut b = begin_row;
                while b < end_row && alpha.get(b, j) < thresh_factor {
                    b += 1;
                }
                let mut e = end_row;
                while e > b && alpha.get(e - 1, j) < thresh_factor {
                    e -= 1;
                }
                hint_begin = b;
                hint_end = e;
            }
        }
    }

    ///
    /// Fill the backward matrix from column `L` down to 0, time-reversing
    /// the same moves and banding rules.
    ///
    pub fn fill_beta(&self, guide: Option<&ScaledMatrix>, beta: &mut ScaledMatrix) {
        let n = self.emissions.len();
        let l = self.tpl.len();
        debug_assert_eq!(beta.rows(), n + 1);
        debug_assert_eq!(beta.columns(), l + 1);

        let thresh_factor = (-self.score_diff).exp();

        beta.start_column(l);
        beta.set(n, l, 1.0);
        beta.finish_column(l, n, n + 1);

        let mut hint_begin = n;
        let mut hint_end = n + 1;

        for j in (0..l).rev() {
            // the base a match out of column j consumes, and the position
            // whose context governs all moves out of column j
            let curr = self.tpl[j];
            let pos = if j > 0 { Some(self.tpl[j - 1]) } else { None };

            let mut end_row = hint_end;
            let mut required_begin = hint_begin.saturating_sub(1);
            if let Some(g) = guide {
                if !g.is_column_empty(j) {
                    let (gb, ge) = g.used_row_range(j);
                    required_begin = required_begin.min(gb);
                    end_row = end_row.max(ge);
                }
            }
            let end_row = end_row.min(n + 1);

            beta.start_column(j);
            let mut max_score = 0.0f64;
            let mut threshold = 0.0f64;
            let mut score = 0.0f64;
            let mut row = end_row;
            while row > 0 && (row > required_begin || score >= threshold) {
                row -= 1;
                score = 0.0;
                if row < n {
                    let em = self.emissions[row];
                    match pos {
                        Some(p) => {
                            score += p.p_match
                                * self.emit(MoveType::Match, em, p.idx, curr.idx)
                                * beta.get(row + 1, j + 1);
                            score += p.p_branch
                                * self.emit(MoveType::Branch, em, p.idx, p.idx)
                                * beta.get(row + 1, j);
                            score += p.p_stick
                                * self.emit(MoveType::Stick, em, p.idx, curr.idx)
                                * beta.get(row + 1, j);
                        }
                        None => {
                            score += self.emit(MoveType::Match, em, curr.idx, curr.idx)
                                * beta.get(row + 1, j + 1);
                        }
                    }
                }
                if let Some(p) = pos {
                    score += p.p_del * beta.get(row, j + 1);
                }
                beta.set(row, j, score);
                if score > max_score {
                    max_score = score;
                    threshold = max_score * thresh_factor;
                }
            }
            let begin_row = row;
            beta.finish_column(j, begin_row, end_row);

            if !beta.is_column_empty(j) {
                let mut e = end_row;
                while e > begin_row && beta.get(e - 1, j) < thresh_factor {
                    e -= 1;
                }
                let mut b = begin_row;
                while b < e && beta.get(b, j) < thresh_factor {
                    b += 1;
                }
                hint_begin = b;
                hint_end = e;
            }
        }
    }

    ///
    /// Fill alpha unguided, then beta guided by alpha. Zero mass at either
    /// terminal corner means the passes never met.
    ///
    pub fn fill_alpha_beta(&self, alpha: &mut ScaledMatrix, beta: &mut ScaledMatrix) -> Result<()> {
        let n = self.emissions.len();
        let l = self.tpl.len();
        self.fill_alpha(None, alpha);
        self.fill_beta(Some(alpha), beta);
        if alpha.get(n, l) <= 0.0 || beta.get(0, 0) <= 0.0 {
            return Err(Error::AlphaBetaMismatch);
        }
        debug!(
            "filled {}x{} alpha/beta, log scales {:.3}/{:.3}",
            n + 1,
            l + 1,
            alpha.log_prod_scales(0..l + 1),
            beta.log_prod_scales(0..l + 1),
        );
        Ok(())
    }

    ///
    /// Recompute `ext_len` forward columns for virtual template columns
    /// `start_col..start_col + ext_len`, seeded from `alpha`'s column
    /// `start_col - 1`. The buffer holds what alpha's columns would hold if
    /// the pending mutation were committed.
    ///
    pub fn extend_alpha(
        &self,
        alpha: &ScaledMatrix,
        start_col: usize,
        buf: &mut ScaledMatrix,
        ext_len: usize,
    ) {
        let n = self.emissions.len();
        let l = self.tpl.len();
        assert!(ext_len <= EXTEND_BUFFER_COLUMNS);
        assert!(start_col >= 2, "extension cannot start at the pinned edge");
        debug_assert!(start_col + ext_len <= l + 2);

        for k in 0..ext_len {
            let j = start_col + k;
            let curr = self.tpl[j - 1];
            let prev = self.tpl[j - 2];
            let next_idx = if j < l { Some(self.tpl[j].idx) } else { None };

            // band around the guide columns, widened by one row for the
            // shifted coordinate frame of the virtual template
            let c0 = (j - 1).min(alpha.columns() - 1);
            let c1 = j.min(alpha.columns() - 1);
            let (b0, e0) = alpha.used_row_range(c0);
            let (b1, e1) = alpha.used_row_range(c1);
            let lo = b0.min(b1).saturating_sub(1);
            let mut hi = (e0.max(e1) + 1).min(n + 1);
            if j >= l {
                // the last virtual column must reach the terminal row
                hi = n + 1;
            }

            buf.start_column(k);
            for i in lo..hi {
                let mut score = 0.0;
                if i > 0 {
                    let em = self.emissions[i - 1];
                    let diag = if k == 0 {
                        alpha.get(i - 1, j - 1)
                    } else {
                        buf.get(i - 1, k - 1)
                    };
                    score +=
                        diag * prev.p_match * self.emit(MoveType::Match, em, prev.idx, curr.idx);
                    score += buf.get(i - 1, k)
                        * curr.p_branch
                        * self.emit(MoveType::Branch, em, curr.idx, curr.idx);
                    if let Some(nx) = next_idx {
                        score += buf.get(i - 1, k)
                            * curr.p_stick
                            * self.emit(MoveType::Stick, em, curr.idx, nx);
                    }
                }
                let left = if k == 0 {
                    alpha.get(i, j - 1)
                } else {
                    buf.get(i, k - 1)
                };
                score += left * prev.p_del;
                buf.set(i, k, score);
            }
            buf.finish_column(k, lo, hi);
        }
    }

    ///
    /// Recompute the leading `1 + last_col + len_diff` backward columns for
    /// the virtual template, seeded from `beta`'s column `last_col + 1`.
    /// Returns the number of buffer columns written.
    ///
    pub fn extend_beta(
        &self,
        beta: &ScaledMatrix,
        last_col: usize,
        buf: &mut ScaledMatrix,
        len_diff: isize,
    ) -> usize {
        let n = self.emissions.len();
        let ext_len = (1 + last_col as isize + len_diff) as usize;
        assert!(ext_len <= EXTEND_BUFFER_COLUMNS);
        debug_assert!(last_col + 1 < beta.columns());
        debug_assert!(ext_len <= self.tpl.len());

        for k in (0..ext_len).rev() {
            let curr = self.tpl[k];
            let pos = if k > 0 { Some(self.tpl[k - 1]) } else { None };

            let c0 = k.min(beta.columns() - 1);
            let c1 = (k + 1).min(beta.columns() - 1);
            let (b0, e0) = beta.used_row_range(c0);
            let (b1, e1) = beta.used_row_range(c1);
            let mut lo = b0.min(b1).saturating_sub(1);
            let hi = e0.max(e1).min(n + 1);
            if k == 0 {
                // the first column must reach the start corner
                lo = 0;
            }

            buf.start_column(k);
            for i in (lo..hi).rev() {
                let mut score = 0.0;
                let deep = k + 1 == ext_len;
                if i < n {
                    let em = self.emissions[i];
                    let diag = if deep {
                        beta.get(i + 1, last_col + 1)
                    } else {
                        buf.get(i + 1, k + 1)
                    };
                    match pos {
                        Some(p) => {
                            score +=
                                p.p_match * self.emit(MoveType::Match, em, p.idx, curr.idx) * diag;
                            score += p.p_branch
                                * self.emit(MoveType::Branch, em, p.idx, p.idx)
                                * buf.get(i + 1, k);
                            score += p.p_stick
                                * self.emit(MoveType::Stick, em, p.idx, curr.idx)
                                * buf.get(i + 1, k);
                        }
                        None => {
                            score += self.emit(MoveType::Match, em, curr.idx, curr.idx) * diag;
                        }
                    }
                }
                if let Some(p) = pos {
                    let right = if deep {
                        beta.get(i, last_col + 1)
                    } else {
                        buf.get(i, k + 1)
                    };
                    score += p.p_del * right;
                }
                buf.set(i, k, score);
            }
            buf.finish_column(k, lo, hi);
        }
        ext_len
    }

    ///
    /// Join the extension buffer's last column (virtual template coordinate
    /// `abs_col - 1`) to `beta` at `beta_link_col` across one match or
    /// deletion move, and return the joined log mass including both
    /// matrices' scale sums.
    ///
    /// `beta_link_col` on the real template and `abs_col` on the virtual one
    /// pin the same read-position cut, which is what makes the join valid.
    ///
    pub fn link_alpha_beta(
        &self,
        buf: &ScaledMatrix,
        ext_len: usize,
        beta: &ScaledMatrix,
        beta_link_col: usize,
        abs_col: usize,
    ) -> f64 {
        let n = self.emissions.len();
        debug_assert!(abs_col >= 2 && abs_col <= self.tpl.len());
        let prev = self.tpl[abs_col - 2];
        let curr = self.tpl[abs_col - 1];

        let (lo, hi) = buf.used_row_range(ext_len - 1);
        let mut v = 0.0;
        for i in lo..hi {
            let a = buf.get(i, ext_len - 1);
            if a == 0.0 {
                continue;
            }
            if i < n {
                let em = self.emissions[i];
                v += a
                    * prev.p_match
                    * self.emit(MoveType::Match, em, prev.idx, curr.idx)
                    * beta.get(i + 1, beta_link_col);
            }
            v += a * prev.p_del * beta.get(i, beta_link_col);
        }
        v.ln()
            + buf.log_prod_scales(0..ext_len)
            + beta.log_prod_scales(beta_link_col..beta.columns())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::create;
    use approx::assert_abs_diff_eq;

    const SNR: [f64; 4] = [8.0, 8.0, 8.0, 8.0];

    fn recursor(tpl: &str, read_seq: &str, pw: u32, score_diff: f64) -> Recursor {
        let chem = create("S/P1-C1.2", &SNR).unwrap();
        let template = Template::new(Arc::clone(&chem), tpl).unwrap();
        let read = Read::uniform(read_seq, pw, SNR, tpl.len());
        let emissions = chem.encode_read(&read).unwrap();
        Recursor::new(chem, template, read, emissions, score_diff)
    }

    fn matrices(r: &Recursor) -> (ScaledMatrix, ScaledMatrix) {
        let (n, l) = (r.read_len(), r.tpl.len());
        (ScaledMatrix::new(n + 1, l + 1), ScaledMatrix::new(n + 1, l + 1))
    }

    #[test]
    fn forward_and_backward_agree_on_total_mass() {
        for (tpl, read) in [
            ("ACGT", "ACGT"),
            ("ACGTACGT", "ACGTACGT"),
            ("ACGTACGT", "ACGTCGT"),
            ("ACGTACGT", "ACGGTACGT"),
            ("AAAAAA", "AAAAA"),
        ] {
            let r = recursor(tpl, read, 3, 12.5);
            let (mut alpha, mut beta) = matrices(&r);
            r.fill_alpha_beta(&mut alpha, &mut beta).unwrap();

            let (n, l) = (r.read_len(), r.tpl.len());
            let from_alpha = alpha.get(n, l).ln() + alpha.log_prod_scales(0..l + 1);
            let from_beta = beta.get(0, 0).ln() + beta.log_prod_scales(0..l + 1);
            assert_abs_diff_eq!(from_alpha, from_beta, epsilon = 1e-6);
        }
    }

    #[test]
    fn columns_are_normalized_to_unit_max() {
        let r = recursor("ACGTACGT", "ACGTACGT", 3, 12.5);
        let (mut alpha, mut beta) = matrices(&r);
        r.fill_alpha_beta(&mut alpha, &mut beta).unwrap();

        for m in [&alpha, &beta] {
            for j in 0..m.columns() {
                let (lo, hi) = m.used_row_range(j);
                assert!(lo < hi);
                let mut max = 0.0f64;
                for i in lo..hi {
                    let v = m.get(i, j);
                    assert!((0.0..=1.0).contains(&v));
                    max = max.max(v);
                }
                assert_abs_diff_eq!(max, 1.0);
            }
        }
    }

    #[test]
    fn unexplainable_read_is_a_mismatch() {
        // an empty template cannot emit anything
        let r = recursor("", "ACGT", 1, 12.5);
        let (mut alpha, mut beta) = matrices(&r);
        assert_eq!(
            r.fill_alpha_beta(&mut alpha, &mut beta),
            Err(Error::AlphaBetaMismatch)
        );
    }

    #[test]
    fn zero_score_diff_keeps_the_diagonal_alive() {
        let r = recursor("ACGTACGT", "ACGTACGT", 3, 0.0);
        let (mut alpha, mut beta) = matrices(&r);
        r.fill_alpha_beta(&mut alpha, &mut beta).unwrap();
        let (n, l) = (r.read_len(), r.tpl.len());
        assert!(alpha.get(n, l) > 0.0);
        assert!(beta.get(0, 0) > 0.0);
    }
}
