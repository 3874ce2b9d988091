//!
//! Read records
//!
//! A read is the immutable observation side of the pair-HMM: a base call
//! sequence with per-base pulse widths and inter-pulse durations, a
//! per-channel SNR, and the window of the template the read is mapped to.
//!
use serde::{Deserialize, Serialize};

/// Per-channel signal-to-noise ratio, indexed by base code (A, C, G, T).
pub type Snr = [f64; 4];

///
/// One mapped read.
///
/// `pulse_width` and `ipd` run parallel to `seq`. The template window
/// `[template_start, template_end)` is in template coordinates and is only
/// consulted for expected-likelihood queries, never by the recursion itself.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Read {
    pub seq: String,
    pub pulse_width: Vec<u32>,
    pub ipd: Vec<u32>,
    pub snr: Snr,
    pub template_start: u32,
    pub template_end: u32,
}

impl Read {
    pub fn new(
        seq: impl Into<String>,
        pulse_width: Vec<u32>,
        ipd: Vec<u32>,
        snr: Snr,
        template_start: u32,
        template_end: u32,
    ) -> Read {
        let seq = seq.into();
        assert_eq!(seq.len(), pulse_width.len());
        Read {
            seq,
            pulse_width,
            ipd,
            snr,
            template_start,
            template_end,
        }
    }

    /// A read with uniform pulse widths spanning the whole template window.
    pub fn uniform(seq: impl Into<String>, pulse_width: u32, snr: Snr, template_len: usize) -> Read {
        let seq = seq.into();
        let n = seq.len();
        Read {
            seq,
            pulse_width: vec![pulse_width; n],
            ipd: vec![0; n],
            snr,
            template_start: 0,
            template_end: template_len as u32,
        }
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }
}
