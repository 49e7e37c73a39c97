//! Shared helpers: exhaustive enumeration over segmentations for
//! comparing the engine against brute force on tiny inputs.

use semicrf::{DataSequence, FeatureGenerator, Segment, Segmentation, SegmentCrf};

/// Every segmentation of `0..len` with labels below `num_labels`.
pub fn all_segmentations(len: usize, num_labels: usize) -> Vec<Segmentation> {
    let mut out = Vec::new();
    let mut prefix = Vec::new();
    rec(len, num_labels, 0, &mut prefix, &mut out);
    out
}

fn rec(
    len: usize,
    num_labels: usize,
    start: usize,
    prefix: &mut Vec<Segment>,
    out: &mut Vec<Segmentation>,
) {
    if start == len {
        out.push(Segmentation::from_segments(len, prefix.clone()).unwrap());
        return;
    }
    for end in start + 1..=len {
        for label in 0..num_labels {
            prefix.push(Segment::new(start, end, label));
            rec(len, num_labels, end, prefix, out);
            prefix.pop();
        }
    }
}

pub fn log_sum_exp(a: f64, b: f64) -> f64 {
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

/// Score every segmentation of `seq` under `model`, returning
/// `(log_z, best_score, best_segmentation)`.
pub fn brute_force<F: FeatureGenerator>(
    model: &SegmentCrf<F>,
    seq: &DataSequence,
    num_labels: usize,
) -> (f64, f64, Segmentation) {
    let mut probe = seq.clone();
    let mut log_z = f64::NEG_INFINITY;
    let mut best_score = f64::NEG_INFINITY;
    let mut best = None;
    for cand in all_segmentations(seq.len(), num_labels) {
        probe.set_segmentation(cand.clone()).unwrap();
        let score = model.score(&probe).unwrap();
        log_z = log_sum_exp(log_z, score);
        if score > best_score {
            best_score = score;
            best = Some(cand);
        }
    }
    (log_z, best_score, best.unwrap())
}
