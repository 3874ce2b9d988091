//!
//! End-to-end tests of the evaluator
//!
#[macro_use]
extern crate approx;

use cchmm::{Error, Evaluator, Mutation, MutationType, Read, Snr};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;

const MODEL: &str = "S/P1-C1.2";
const SNR: Snr = [8.0, 8.0, 8.0, 8.0];
const SCORE_DIFF: f64 = 12.5;

fn evaluator(tpl: &str, read_seq: &str, pw: u32) -> Evaluator {
    let read = Read::uniform(read_seq, pw, SNR, tpl.len());
    Evaluator::new(MODEL, tpl, read, SCORE_DIFF).unwrap()
}

/// The template sequence with `m` committed, for building reference
/// evaluators.
fn apply_to_seq(seq: &str, m: &Mutation) -> String {
    let mut bases: Vec<char> = seq.chars().collect();
    let s = m.start as usize;
    let letter = |b: Option<u8>| b"ACGT"[b.unwrap() as usize] as char;
    match m.kind {
        MutationType::Substitution => bases[s] = letter(m.base),
        MutationType::Insertion => bases.insert(s, letter(m.base)),
        MutationType::Deletion => {
            bases.remove(s);
        }
    }
    bases.into_iter().collect()
}

#[test]
fn perfect_read_scores_finite() {
    let eval = evaluator("ACGT", "ACGT", 1);
    let ll = eval.ll();
    assert!(ll.is_finite());
    assert!(ll < 0.0);
    assert!(eval.z_score().is_finite());
}

#[test]
fn z_score_of_typical_read_is_moderate() {
    // pulse widths at the top encoding class are where this chemistry puts
    // most of its emission mass, so such a read should look unremarkable
    let eval = evaluator("ACGT", "ACGT", 3);
    let z = eval.z_score();
    assert!((-3.0..=3.0).contains(&z), "z = {}", z);

    let (mean, var) = eval.normal_parameters();
    assert!(mean.is_finite() && var > 0.0);
}

#[test]
fn substitution_away_from_read_scores_worse() {
    let mut eval = evaluator("ACGTACGT", "ACGTACGT", 1);
    let ll = eval.ll();
    let worse = eval.ll_of(&Mutation::substitution(4, 1));
    assert!(worse < ll, "mutated {} vs {}", worse, ll);
    // the virtual edit must leave the evaluator untouched
    assert_eq!(eval.template_seq(), "ACGTACGT");
    assert_abs_diff_eq!(eval.ll(), ll);
}

#[test]
fn virtual_deletion_matches_committed_deletion() {
    let mut eval = evaluator("ACGTACGT", "ACGTACGT", 1);
    let m = Mutation::deletion(4);
    let virt = eval.ll_of(&m);

    eval.apply_mutation(&m).unwrap();
    assert_eq!(eval.template_seq(), "ACGTCGT");
    assert_abs_diff_eq!(virt, eval.ll(), epsilon = 1e-6);

    // a freshly built evaluator on the committed template agrees
    let fresh = evaluator("ACGTCGT", "ACGTACGT", 1);
    assert_abs_diff_eq!(eval.ll(), fresh.ll(), epsilon = 1e-6);
}

#[test]
fn pulse_width_classes_keep_ll_finite() {
    let read = Read::new(
        "AAAAAA",
        vec![1, 2, 3, 1, 1, 1],
        vec![0; 6],
        SNR,
        0,
        6,
    );
    let eval = Evaluator::new(MODEL, "AAAAAA", read, SCORE_DIFF).unwrap();
    assert!(eval.ll().is_finite());
}

#[test]
fn invalid_template_base_is_rejected() {
    let read = Read::uniform("ACGT", 1, SNR, 5);
    let err = Evaluator::new(MODEL, "ACNGT", read, SCORE_DIFF).unwrap_err();
    assert_eq!(err, Error::InvalidBase('N'));
}

#[test]
fn invalid_read_inputs_are_rejected() {
    let bad_base = Read::uniform("ACNT", 1, SNR, 4);
    assert_eq!(
        Evaluator::new(MODEL, "ACGT", bad_base, SCORE_DIFF).unwrap_err(),
        Error::InvalidBase('N')
    );
    let zero_pw = Read::new("ACGT", vec![1, 1, 0, 1], vec![0; 4], SNR, 0, 4);
    assert_eq!(
        Evaluator::new(MODEL, "ACGT", zero_pw, SCORE_DIFF).unwrap_err(),
        Error::InvalidPulseWidth(2)
    );
}

#[test]
fn unknown_chemistry_is_rejected() {
    let read = Read::uniform("ACGT", 1, SNR, 4);
    assert!(matches!(
        Evaluator::new("S/P2-C2/5.0", "ACGT", read, SCORE_DIFF),
        Err(Error::ChemistryNotFound(_))
    ));
}

#[test]
fn empty_template_is_rejected() {
    let read = Read::uniform("ACGT", 1, SNR, 0);
    assert!(Evaluator::new(MODEL, "", read, SCORE_DIFF).is_err());
}

#[test]
fn zero_score_diff_still_scores() {
    let read = Read::uniform("ACGTACGT", 1, SNR, 8);
    let eval = Evaluator::new(MODEL, "ACGTACGT", read, 0.0).unwrap();
    assert!(eval.ll().is_finite());
}

#[test]
fn tiny_template_falls_back_to_refill() {
    // with two columns every mutation is against both edges at once
    let mut eval = evaluator("AC", "AC", 1);
    for m in [Mutation::substitution(1, 2), Mutation::insertion(1, 3)] {
        let virt = eval.ll_of(&m);
        let fresh = evaluator(&apply_to_seq("AC", &m), "AC", 1);
        assert_abs_diff_eq!(virt, fresh.ll(), epsilon = 1e-6);
    }

    // deleting the only real move leaves a one-position absorbing template
    // that cannot emit a two-base read: the refill reports no mass, and a
    // fresh evaluator on the same template refuses to build
    let gone = eval.ll_of(&Mutation::deletion(0));
    assert!(!gone.is_finite());
    let read = Read::uniform("AC", 1, SNR, 1);
    assert!(Evaluator::new(MODEL, "C", read, SCORE_DIFF).is_err());
}

#[test]
fn edge_mutations_use_the_one_sided_extensions() {
    let tpl = "ACGTACGTAC";
    let l = tpl.len() as u32;
    let mut eval = evaluator(tpl, tpl, 1);
    // start < 3 forces the backward extension, end + 3 > L + 1 the forward
    let edge_muts = [
        Mutation::substitution(0, 2),
        Mutation::insertion(0, 3),
        Mutation::deletion(0),
        Mutation::substitution(2, 1),
        Mutation::substitution(l - 1, 0),
        Mutation::insertion(l, 1),
        Mutation::deletion(l - 1),
    ];
    for m in edge_muts {
        let virt = eval.ll_of(&m);
        let fresh = evaluator(&apply_to_seq(tpl, &m), tpl, 1);
        assert_abs_diff_eq!(virt, fresh.ll(), epsilon = 1e-6);
        assert_eq!(eval.template_seq(), tpl);
    }
}

#[test]
fn committed_mutation_matches_fresh_evaluator() {
    let mut eval = evaluator("ACGTACGT", "ACGTACGT", 1);
    eval.apply_mutation(&Mutation::substitution(4, 1)).unwrap();
    let fresh = evaluator("ACGTCCGT", "ACGTACGT", 1);
    assert_abs_diff_eq!(eval.ll(), fresh.ll(), epsilon = 1e-6);
}

#[test]
fn batch_commit_is_descending_and_checked() {
    let mut eval = evaluator("ACGTACGT", "ACGTACGT", 1);
    eval.apply_mutations(&[Mutation::deletion(2), Mutation::substitution(6, 0)])
        .unwrap();
    assert_eq!(eval.template_seq(), "ACTACAT");

    let mut eval = evaluator("ACGTACGT", "ACGTACGT", 1);
    assert!(matches!(
        eval.apply_mutations(&[Mutation::deletion(4), Mutation::substitution(4, 1)]),
        Err(Error::TemplateOverlap(_))
    ));
    // the failed batch must not have touched the template
    assert_eq!(eval.template_seq(), "ACGTACGT");
}

// sweep every single-base edit over a random template and check the
// incremental score against a freshly built evaluator on the committed
// template
#[test]
fn incremental_rescoring_agrees_with_refilling_everywhere() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(0xcc);
    let tpl: String = (0..20)
        .map(|_| b"ACGT"[rng.gen_range(0..4)] as char)
        .collect();
    let l = tpl.len() as u32;
    let mut eval = evaluator(&tpl, &tpl, 3);

    let mut muts = Vec::new();
    for s in 0..l {
        for b in 0..4u8 {
            muts.push(Mutation::substitution(s, b));
            muts.push(Mutation::insertion(s, b));
        }
        muts.push(Mutation::deletion(s));
    }
    for b in 0..4u8 {
        muts.push(Mutation::insertion(l, b));
    }

    for m in &muts {
        let virt = eval.ll_of(m);
        assert!(virt.is_finite(), "non-finite score for {:?}", m);
        let fresh = evaluator(&apply_to_seq(&tpl, m), &tpl, 3);
        assert_abs_diff_eq!(virt, fresh.ll(), epsilon = 1e-6);
        assert_eq!(eval.template_seq(), tpl, "virtual edit leaked: {:?}", m);
    }
}
