//!
//! Column-scaled dynamic-programming matrix
//!
//! Probabilities along a template column shrink geometrically with read
//! length, so raw forward/backward values underflow doubles long before
//! template lengths of interest. Instead of computing in log space (which
//! would put a `ln`/`exp` on every cell), each column is kept in linear space
//! and renormalized so its maximum entry is one; the factor taken out is
//! accumulated per column as a log scale. The logical value of a cell is
//!
//! ```text
//! value(i, j) = get(i, j) * exp(log_scale(j))
//! ```
//!
//! Each column also records the half-open row band that was actually
//! computed; everything outside the band is exactly zero.
//!
use std::ops::Range;

///
/// A rectangular matrix of non-negative reals with per-column log scaling
/// factors and per-column used row bands.
///
/// Writes go column-at-a-time: [`ScaledMatrix::start_column`] clears the
/// column, cells are filled with [`ScaledMatrix::set`], and
/// [`ScaledMatrix::finish_column`] records the band and performs the
/// rescale. Reading a cell outside any band yields zero.
///
#[derive(Debug, Clone)]
pub struct ScaledMatrix {
    rows: usize,
    cols: usize,
    // column-major cells
    values: Vec<f64>,
    log_scales: Vec<f64>,
    ranges: Vec<(usize, usize)>,
}

impl ScaledMatrix {
    pub fn new(rows: usize, cols: usize) -> ScaledMatrix {
        ScaledMatrix {
            rows,
            cols,
            values: vec![0.0; rows * cols],
            log_scales: vec![0.0; cols],
            ranges: vec![(0, 0); cols],
        }
    }

    /// Resize to `rows x cols`, zero all cells and clear scales and bands.
    /// Keeps existing allocations whenever they are large enough.
    pub fn reset(&mut self, rows: usize, cols: usize) {
        self.rows = rows;
        self.cols = cols;
        self.values.clear();
        self.values.resize(rows * cols, 0.0);
        self.log_scales.clear();
        self.log_scales.resize(cols, 0.0);
        self.ranges.clear();
        self.ranges.resize(cols, (0, 0));
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[j * self.rows + i]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, v: f64) {
        self.values[j * self.rows + i] = v;
    }

    /// Zero column `j` and forget its band and scale, ready for refilling.
    pub fn start_column(&mut self, j: usize) {
        let lo = j * self.rows;
        self.values[lo..lo + self.rows].fill(0.0);
        self.log_scales[j] = 0.0;
        self.ranges[j] = (0, 0);
    }

    /// Record the computed band `[begin, end)` of column `j` and rescale the
    /// column so its maximum entry is one, accumulating the factor into the
    /// column's log scale. A column with no mass keeps scale zero and an
    /// empty band.
    pub fn finish_column(&mut self, j: usize, begin: usize, end: usize) {
        debug_assert!(begin <= end && end <= self.rows);
        let col = j * self.rows;
        let mut max = 0.0f64;
        for i in begin..end {
            max = max.max(self.values[col + i]);
        }
        if max > 0.0 {
            for i in begin..end {
                self.values[col + i] /= max;
            }
            self.log_scales[j] = max.ln();
            self.ranges[j] = (begin, end);
        } else {
            self.log_scales[j] = 0.0;
            self.ranges[j] = (begin, begin);
        }
    }

    pub fn log_scale(&self, j: usize) -> f64 {
        self.log_scales[j]
    }

    /// Sum of the log scales over a column range.
    pub fn log_prod_scales(&self, cols: Range<usize>) -> f64 {
        self.log_scales[cols].iter().sum()
    }

    /// The half-open row band of potentially non-zero entries in column `j`.
    pub fn used_row_range(&self, j: usize) -> (usize, usize) {
        self.ranges[j]
    }

    pub fn is_column_empty(&self, j: usize) -> bool {
        let (lo, hi) = self.ranges[j];
        lo >= hi
    }
}
