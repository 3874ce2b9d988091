//!
//! The evaluator: one (read, template) pair, ready for rescoring
//!
//! Construction fills the forward and backward matrices once; afterwards any
//! single-base template edit can be priced by recomputing only a few columns
//! around the edit and joining them to the untouched remainder. Edits under
//! test are installed as a virtual overlay and always rolled back before the
//! call returns; committed edits rewrite the template and refill.
//!
use std::sync::Arc;

use log::warn;

use crate::error::{Error, Result};
use crate::matrix::ScaledMatrix;
use crate::model;
use crate::mutation::{Mutation, MutationType};
use crate::read::Read;
use crate::recursor::{Recursor, EXTEND_BUFFER_COLUMNS};
use crate::template::Template;

///
/// Scores one read against one template and its single-base edits.
///
pub struct Evaluator {
    recursor: Recursor,
    alpha: ScaledMatrix,
    beta: ScaledMatrix,
    extend_buffer: ScaledMatrix,
}

impl Evaluator {
    ///
    /// Build the model for the read's SNR, populate the template, encode the
    /// read and fill both matrices eagerly.
    ///
    pub fn new(model_name: &str, tpl: &str, read: Read, score_diff: f64) -> Result<Evaluator> {
        let chem = model::create(model_name, &read.snr)?;
        let template = Template::new(Arc::clone(&chem), tpl)?;
        let emissions = chem.encode_read(&read)?;
        let recursor = Recursor::new(chem, template, read, emissions, score_diff);

        let n = recursor.read_len();
        let l = recursor.tpl.len();
        let mut alpha = ScaledMatrix::new(n + 1, l + 1);
        let mut beta = ScaledMatrix::new(n + 1, l + 1);
        let extend_buffer = ScaledMatrix::new(n + 1, EXTEND_BUFFER_COLUMNS);
        recursor.fill_alpha_beta(&mut alpha, &mut beta)?;

        let eval = Evaluator {
            recursor,
            alpha,
            beta,
            extend_buffer,
        };
        if !eval.ll().is_finite() {
            return Err(Error::AlphaBetaMismatch);
        }
        Ok(eval)
    }

    /// Log-likelihood of the read given the current template.
    pub fn ll(&self) -> f64 {
        self.beta.get(0, 0).ln()
            + self.beta.log_prod_scales(0..self.beta.columns())
            + self.recursor.undo_counter_weights()
    }

    ///
    /// Log-likelihood of the read given the template with `mutation`
    /// applied, without disturbing the template or the filled matrices.
    ///
    /// Away from the template edges only a couple of columns are recomputed
    /// and joined back; an edit within three columns of either edge falls
    /// back to extending the touched matrix across that edge, and an edit
    /// close to both edges refills a scratch forward matrix outright.
    ///
    pub fn ll_of(&mut self, mutation: &Mutation) -> f64 {
        self.recursor.tpl.mutate(mutation);
        let score = self.score_virtual(mutation);
        self.recursor.tpl.reset();
        score + self.recursor.undo_counter_weights()
    }

    fn score_virtual(&mut self, mutation: &Mutation) -> f64 {
        let n = self.recursor.read_len();
        let beta_link_col = 1 + mutation.end();
        let abs_col = (1 + mutation.end() as isize + mutation.len_diff()) as usize;

        let at_begin = mutation.start() < 3;
        let at_end = mutation.end() + 3 > self.beta.columns();

        if !at_begin && !at_end {
            let ext_len = 2;
            let start_col = match mutation.kind {
                MutationType::Deletion => mutation.start() - 1,
                _ => mutation.start(),
            };
            self.recursor
                .extend_alpha(&self.alpha, start_col, &mut self.extend_buffer, ext_len);
            self.recursor.link_alpha_beta(
                &self.extend_buffer,
                ext_len,
                &self.beta,
                beta_link_col,
                abs_col,
            ) + self.alpha.log_prod_scales(0..start_col)
        } else if !at_begin && at_end {
            // run the forward extension to the end of the virtual template
            let start_col = mutation.start() - 1;
            let ext_len = self.recursor.tpl.len() - start_col + 1;
            self.recursor
                .extend_alpha(&self.alpha, start_col, &mut self.extend_buffer, ext_len);
            self.extend_buffer.get(n, ext_len - 1).ln()
                + self.alpha.log_prod_scales(0..start_col)
                + self.extend_buffer.log_prod_scales(0..ext_len)
        } else if at_begin && !at_end {
            // run the backward extension to the front of the virtual template
            let last_col = mutation.end();
            let ext_len = self.recursor.extend_beta(
                &self.beta,
                last_col,
                &mut self.extend_buffer,
                mutation.len_diff(),
            );
            self.extend_buffer.get(0, 0).ln()
                + self
                    .beta
                    .log_prod_scales(last_col + 1..self.beta.columns())
                + self.extend_buffer.log_prod_scales(0..ext_len)
        } else {
            // the extension algebra is undefined against both edges at
            // once; price the whole virtual template from scratch
            warn!(
                "mutation {:?} touches both template edges, refilling",
                mutation
            );
            let l = self.recursor.tpl.len();
            let mut scratch = ScaledMatrix::new(n + 1, l + 1);
            self.recursor.fill_alpha(None, &mut scratch);
            scratch.get(n, l).ln() + scratch.log_prod_scales(0..l + 1)
        }
    }

    /// Commit one mutation and refill.
    pub fn apply_mutation(&mut self, mutation: &Mutation) -> Result<()> {
        self.recursor.tpl.apply_mutation(mutation);
        self.recalculate()
    }

    /// Commit a batch (highest template position first) and refill.
    pub fn apply_mutations(&mut self, mutations: &[Mutation]) -> Result<()> {
        self.recursor.tpl.apply_mutations(mutations)?;
        self.recalculate()
    }

    fn recalculate(&mut self) -> Result<()> {
        let n = self.recursor.read_len();
        let l = self.recursor.tpl.len();
        self.alpha.reset(n + 1, l + 1);
        self.beta.reset(n + 1, l + 1);
        self.extend_buffer.reset(n + 1, EXTEND_BUFFER_COLUMNS);
        self.recursor
            .fill_alpha_beta(&mut self.alpha, &mut self.beta)?;
        if !self.ll().is_finite() {
            return Err(Error::AlphaBetaMismatch);
        }
        Ok(())
    }

    /// Mean and variance of the log-likelihood expected under the model
    /// over the template window the read maps to.
    pub fn normal_parameters(&self) -> (f64, f64) {
        let read = self.recursor.read();
        self.recursor
            .tpl
            .normal_parameters(read.template_start as usize, read.template_end as usize)
    }

    /// How many standard deviations the observed likelihood sits from its
    /// expectation.
    pub fn z_score(&self) -> f64 {
        let (mean, var) = self.normal_parameters();
        (self.ll() - mean) / var.sqrt()
    }

    /// Current template length.
    pub fn template_len(&self) -> usize {
        self.recursor.tpl.len()
    }

    /// Current template sequence.
    pub fn template_seq(&self) -> String {
        (0..self.recursor.tpl.len())
            .map(|i| self.recursor.tpl[i].base as char)
            .collect()
    }
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("read_len", &self.recursor.read_len())
            .field("template_len", &self.recursor.tpl.len())
            .field("ll", &self.ll())
            .finish()
    }
}
