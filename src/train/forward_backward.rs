//! Exact inference over segmentations.
//!
//! `SumProductScratch` runs the backward and forward recursions over a
//! prepared [`FeatureStore`] and, on request, a third sweep that accumulates
//! per-feature expectations in the log domain. Segments longer than the
//! boundary gap are handled by the open accumulators (`open_alpha`,
//! `open_beta`): once a segment outgrows the gap, only boundary-open
//! features remain in scope and the per-length recursion collapses to a
//! single chained term.
//!
//! All buffers live in the scratch and are reused across sequences; one
//! scratch serves one worker thread.

use ndarray::{Array1, Array2};

use crate::dataset::Segmentation;
use crate::error::{Error, Result};
use crate::math::{log_mat_vec, log_sum_exp, log_sum_exp_assign, log_sum_exp_total, LOG0};
use crate::store::{FeatureStore, RangeMass, ScanFeature};

pub(crate) struct SumProductScratch {
    n: usize,
    k: usize,
    m: usize,
    nf: usize,
    // alpha[j]: prefix mass of positions 0..j-1, indexed by last label
    alpha: Vec<Array1<f64>>,
    // alpha_m[j]: alpha[j] pushed through the transition into position j
    alpha_m: Vec<Array1<f64>>,
    alpha_m_done: Vec<bool>,
    open_alpha: Vec<Array1<f64>>,
    // beta[i]: suffix mass of positions i+1.., indexed by label ending at i
    beta: Vec<Array1<f64>>,
    open_beta: Vec<Array1<f64>>,
    // start-open marginal terms per anchor length, this start and previous
    exact_e_terms: Vec<Array1<f64>>,
    prev_exact_e_terms: Vec<Array1<f64>>,
    mi: Array2<f64>,
    ri: Array1<f64>,
    tmp: Array1<f64>,
    delta: Array1<f64>,
    open_delta: Array1<f64>,
    rbeta: Array1<f64>,
    exact_s_term: Array1<f64>,
    exact_e_term: Array1<f64>,
    term_se: Array1<f64>,
    a_m_d_r: Array1<f64>,
    open_ri: RangeMass,
    i_open_r: RangeMass,
    /// Unnormalized log-domain feature expectations, filled by the sweep.
    pub exp_f: Vec<f64>,
}

impl SumProductScratch {
    pub fn new() -> Self {
        Self {
            n: 0,
            k: 0,
            m: 0,
            nf: 0,
            alpha: Vec::new(),
            alpha_m: Vec::new(),
            alpha_m_done: Vec::new(),
            open_alpha: Vec::new(),
            beta: Vec::new(),
            open_beta: Vec::new(),
            exact_e_terms: Vec::new(),
            prev_exact_e_terms: Vec::new(),
            mi: Array2::zeros((0, 0)),
            ri: Array1::zeros(0),
            tmp: Array1::zeros(0),
            delta: Array1::zeros(0),
            open_delta: Array1::zeros(0),
            rbeta: Array1::zeros(0),
            exact_s_term: Array1::zeros(0),
            exact_e_term: Array1::zeros(0),
            term_se: Array1::zeros(0),
            a_m_d_r: Array1::zeros(0),
            open_ri: RangeMass::new(0),
            i_open_r: RangeMass::new(0),
            exp_f: Vec::new(),
        }
    }

    fn ensure(&mut self, store: &FeatureStore) {
        let n = store.len();
        let k = store.num_labels();
        let m = store.max_boundary_gap();
        if k != self.k || m != self.m || n > self.n {
            self.n = n.max(2 * self.n);
            self.k = k;
            self.m = m;
            let slots = self.n + 1;
            self.alpha = (0..slots).map(|_| Array1::zeros(k)).collect();
            self.alpha_m = (0..slots).map(|_| Array1::zeros(k)).collect();
            self.alpha_m_done = vec![false; slots];
            self.open_alpha = (0..slots).map(|_| Array1::zeros(k)).collect();
            self.beta = (0..slots).map(|_| Array1::zeros(k)).collect();
            self.open_beta = (0..slots).map(|_| Array1::zeros(k)).collect();
            self.exact_e_terms = (0..=m).map(|_| Array1::zeros(k)).collect();
            self.prev_exact_e_terms = (0..=m).map(|_| Array1::zeros(k)).collect();
            self.mi = Array2::zeros((k, k));
            self.ri = Array1::zeros(k);
            self.tmp = Array1::zeros(k);
            self.delta = Array1::zeros(k);
            self.open_delta = Array1::zeros(k);
            self.rbeta = Array1::zeros(k);
            self.exact_s_term = Array1::zeros(k);
            self.exact_e_term = Array1::zeros(k);
            self.term_se = Array1::zeros(k);
            self.a_m_d_r = Array1::zeros(k);
            self.open_ri = RangeMass::new(k);
            self.i_open_r = RangeMass::new(k);
        }
        self.nf = store.num_features();
        self.exp_f.resize(self.nf, LOG0);
    }

    /// Run both recursions and return the log partition function over all
    /// segmentations of the store's sequence. With `with_expectations`,
    /// also fill [`exp_f`](Self::exp_f) with unnormalized log expectations
    /// of every feature under the model distribution.
    pub fn sum_product(&mut self, store: &FeatureStore, with_expectations: bool) -> Result<f64> {
        self.ensure(store);
        self.backward(store);
        self.forward(store);
        let log_z = log_sum_exp_total(&self.alpha[store.len()]);
        if !log_z.is_finite() {
            return Err(Error::Numerical(format!(
                "log partition function is {} over a length-{} sequence",
                log_z,
                store.len()
            )));
        }
        if with_expectations {
            self.expectation_sweep(store);
        }
        Ok(log_z)
    }

    fn backward(&mut self, store: &FeatureStore) {
        let n = store.len();
        let m = store.max_boundary_gap();
        self.beta[n - 1].fill(0.0);
        for i in (0..n.saturating_sub(1)).rev() {
            self.beta[i].fill(LOG0);
            self.open_ri.reset(i as isize + 1, i as isize);
            // segments [i+1, ip] within the gap
            for ip in (i + 1)..=(i + m).min(n - 1) {
                store.increment_right(Some(&mut self.ri), &mut self.open_ri, false);
                self.tmp.assign(&self.ri);
                self.tmp += &self.beta[ip];
                log_sum_exp_assign(&mut self.beta[i], &self.tmp);
            }
            if i + m <= n - 1 {
                // ri holds the full window [i+1, i+m]; keep only the part
                // that survives growing the segment past the gap
                store.remove_exact_start_features(&mut self.ri, i as isize + 1, (i + m) as isize);
                self.open_beta[i].assign(&self.ri);
            }
            if i + m + 1 <= n - 1 {
                store.delta_r_lshift(
                    i as isize + 1,
                    (i + m + 1) as isize,
                    &mut self.delta,
                    Some(&mut self.open_delta),
                );
                self.tmp.assign(&self.delta);
                self.tmp += &self.open_beta[i + 1];
                log_sum_exp_assign(&mut self.beta[i], &self.tmp);
                self.open_beta[i] += &self.beta[i + m];
                self.tmp.assign(&self.open_delta);
                self.tmp += &self.open_beta[i + 1];
                log_sum_exp_assign(&mut self.open_beta[i], &self.tmp);
            }
            store.get_log_mi(i + 1, &mut self.mi);
            log_mat_vec(&self.mi, &self.beta[i], false, &mut self.tmp);
            self.beta[i].assign(&self.tmp);
        }
    }

    fn forward(&mut self, store: &FeatureStore) {
        let n = store.len();
        let m = store.max_boundary_gap();
        self.alpha[0].fill(0.0);
        for done in self.alpha_m_done.iter_mut() {
            *done = false;
        }
        for i in 0..n {
            self.alpha[i + 1].fill(LOG0);
            self.open_ri.reset(i as isize + 1, i as isize);
            // segments [ip, i] within the gap
            for ip in ((i + 1).saturating_sub(m)..=i).rev() {
                store.decrement_left(Some(&mut self.ri), &mut self.open_ri, false);
                if ip >= 1 {
                    if !self.alpha_m_done[ip] {
                        store.get_log_mi(ip, &mut self.mi);
                        log_mat_vec(&self.mi, &self.alpha[ip], true, &mut self.alpha_m[ip]);
                        self.alpha_m_done[ip] = true;
                    }
                    self.tmp.assign(&self.alpha_m[ip]);
                    self.tmp += &self.ri;
                } else {
                    self.tmp.assign(&self.ri);
                }
                log_sum_exp_assign(&mut self.alpha[i + 1], &self.tmp);
            }
            if i + 1 >= m {
                store.remove_exact_end_features(&mut self.ri, (i + 1 - m) as isize, i as isize);
                self.open_alpha[i].assign(&self.ri);
            }
            if i >= m {
                store.delta_r_rshift(
                    (i - m) as isize,
                    i as isize,
                    &mut self.delta,
                    &mut self.open_delta,
                );
                self.tmp.assign(&self.delta);
                self.tmp += &self.open_alpha[i - 1];
                log_sum_exp_assign(&mut self.alpha[i + 1], &self.tmp);
                self.open_alpha[i] += &self.alpha_m[i - m + 1];
                self.tmp.assign(&self.open_delta);
                self.tmp += &self.open_alpha[i - 1];
                log_sum_exp_assign(&mut self.open_alpha[i], &self.tmp);
            }
        }
    }

    /// One pass over the sorted feature scan. Each openness class reads a
    /// different marginal: exact features take the plain alpha-R-beta
    /// product, open boundaries substitute the matching open accumulator
    /// or a term chained over earlier starts.
    fn expectation_sweep(&mut self, store: &FeatureStore) {
        let n = store.len();
        let m = store.max_boundary_gap();
        for v in self.exp_f.iter_mut() {
            *v = LOG0;
        }
        for t in self
            .exact_e_terms
            .iter_mut()
            .chain(self.prev_exact_e_terms.iter_mut())
        {
            t.fill(LOG0);
        }
        let mut scan = store.scan_sorted().peekable();
        for s in 0..n {
            store.delta_r_lshift(
                s as isize,
                (s + m) as isize,
                &mut self.delta,
                Some(&mut self.open_delta),
            );
            if s > 0 {
                self.a_m_d_r += &self.open_delta;
                self.tmp.assign(&self.delta);
                self.tmp += &self.alpha_m[s];
                log_sum_exp_assign(&mut self.a_m_d_r, &self.tmp);
            } else {
                self.a_m_d_r.assign(&self.delta);
            }
            store.get_log_mi(s, &mut self.mi);
            std::mem::swap(&mut self.exact_e_terms, &mut self.prev_exact_e_terms);
            let e_hi = n.min(s + m);
            if s + m < n {
                // seed for starts that fell past the gap, end fixed at s+m
                self.exact_e_term.assign(&self.open_alpha[s + m - 1]);
                self.exact_e_term += &self.beta[s + m];
                store.delta_r_rshift(
                    s as isize,
                    (s + m) as isize,
                    &mut self.delta,
                    &mut self.open_delta,
                );
                self.exact_e_term += &self.delta;
                self.exact_e_terms[m].assign(&self.exact_e_term);
                store.delta_r_lshift(
                    s as isize,
                    (s + m) as isize,
                    &mut self.delta,
                    Some(&mut self.open_delta),
                );
                self.exact_s_term.assign(&self.delta);
                self.exact_s_term += &self.open_beta[s];
                self.term_se.assign(&self.a_m_d_r);
                self.term_se += &self.open_beta[s];
            } else {
                self.exact_s_term.fill(LOG0);
                self.term_se.fill(LOG0);
            }
            self.i_open_r.init_window(store, s as isize, e_hi as isize, false);
            for e in (s..e_hi).rev() {
                let l = e - s;
                store.decrement_right(Some(&mut self.ri), &mut self.i_open_r);
                self.rbeta.assign(&self.ri);
                self.rbeta += &self.beta[e];
                self.exact_e_term.assign(&self.rbeta);
                if s > 0 {
                    self.exact_e_term += &self.alpha_m[s];
                    log_sum_exp_assign(&mut self.exact_e_term, &self.prev_exact_e_terms[l + 1]);
                }
                self.exact_e_terms[l].assign(&self.exact_e_term);
                log_sum_exp_assign(&mut self.exact_s_term, &self.rbeta);
                log_sum_exp_assign(&mut self.term_se, &self.exact_e_term);
                while scan.peek().map_or(false, |f| f.start == s && f.end == e) {
                    let Some(f) = scan.next() else { break };
                    let y = f.label;
                    let mut val = f.value.ln();
                    match (f.start_open, f.end_open) {
                        (false, false) => {
                            val += self.ri[y] + self.beta[e][y];
                            if s > 0 {
                                val += self.alpha_m[s][y];
                            }
                        }
                        (false, true) => {
                            val += self.exact_s_term[y];
                            if s > 0 {
                                val += match f.prev_label {
                                    Some(yp) => self.alpha[s][yp] + self.mi[[yp, y]],
                                    None => self.alpha_m[s][y],
                                };
                            }
                        }
                        (true, false) => val += self.exact_e_term[y],
                        (true, true) => val += self.term_se[y],
                    }
                    self.exp_f[f.index] = log_sum_exp(self.exp_f[f.index], val);
                }
            }
        }
        debug_assert!(scan.peek().is_none(), "sorted scan not fully consumed");
    }
}

/// Accumulate each feature's value into `out` whenever the feature fires
/// on `gold`.
pub(crate) fn observed_counts(store: &FeatureStore, gold: &Segmentation, out: &mut [f64]) {
    for f in store.scan_sorted() {
        if feature_holds(&f, gold) {
            out[f.index] += f.value;
        }
    }
}

/// Whether a stored feature fires on a segmentation. Exact boundaries must
/// coincide with the owning segment's; open boundaries only need the anchor
/// contained in it.
fn feature_holds(f: &ScanFeature, gold: &Segmentation) -> bool {
    if gold.segment_index_at(f.start) != gold.segment_index_at(f.end) {
        return false;
    }
    let idx = gold.segment_index_at(f.start);
    let seg = gold.segment(idx);
    if seg.label != f.label {
        return false;
    }
    if !f.start_open && seg.start != f.start {
        return false;
    }
    if !f.end_open && seg.end != f.end + 1 {
        return false;
    }
    match f.prev_label {
        None => true,
        Some(yp) => idx > 0 && gold.segment(idx - 1).label == yp,
    }
}

/// Log potential of one complete segmentation under the store's weights.
pub(crate) fn segmentation_score(store: &FeatureStore, seg: &Segmentation) -> f64 {
    let k = store.num_labels();
    let mut ri = Array1::zeros(k);
    let mut mi = Array2::zeros((k, k));
    let mut total = 0.0;
    let mut prev = None;
    for sg in seg.iter() {
        store.get_exact_r(sg.start as isize, sg.end as isize - 1, &mut ri);
        total += ri[sg.label];
        if let Some(yp) = prev {
            store.get_log_mi(sg.start, &mut mi);
            total += mi[[yp, sg.label]];
        }
        prev = Some(sg.label);
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Corpus, DataSequence, Segment};
    use crate::feature::{FeatureGenerator, WindowFeatureGen};
    use crate::math::exp_clip;

    fn fixture() -> (DataSequence, WindowFeatureGen, Vec<f64>) {
        let mut corpus = Corpus::new();
        corpus
            .append_labeled(
                vec![
                    vec!["a".into()],
                    vec!["b".into()],
                    vec!["c".into()],
                    vec!["a".into()],
                    vec!["b".into()],
                ],
                &["X", "X", "Y", "Y", "X"],
            )
            .unwrap();
        let fgen = WindowFeatureGen::fit(&corpus, 3);
        let lambda: Vec<f64> = (0..fgen.num_features())
            .map(|i| ((i * 37 + 11) % 23) as f64 / 23.0 - 0.5)
            .collect();
        (corpus.sequences()[0].clone(), fgen, lambda)
    }

    fn all_segmentations(n: usize, k: usize) -> Vec<Segmentation> {
        fn rec(
            n: usize,
            k: usize,
            start: usize,
            cur: &mut Vec<Segment>,
            out: &mut Vec<Segmentation>,
        ) {
            if start == n {
                out.push(Segmentation::from_segments(n, cur.clone()).unwrap());
                return;
            }
            for end in start + 1..=n {
                for y in 0..k {
                    cur.push(Segment::new(start, end, y));
                    rec(n, k, end, cur, out);
                    cur.pop();
                }
            }
        }
        let mut out = Vec::new();
        rec(n, k, 0, &mut Vec::new(), &mut out);
        out
    }

    #[test]
    fn log_partition_matches_enumeration() {
        let (seq, fgen, lambda) = fixture();
        let mut store = FeatureStore::new();
        store.init(&seq, &fgen, &lambda, 2).unwrap();
        let mut scratch = SumProductScratch::new();
        let log_z = scratch.sum_product(&store, false).unwrap();
        let brute: f64 = all_segmentations(seq.len(), 2)
            .iter()
            .map(|seg| segmentation_score(&store, seg).exp())
            .sum();
        assert!(
            (log_z - brute.ln()).abs() < 1e-8,
            "log_z {} vs enumerated {}",
            log_z,
            brute.ln()
        );
    }

    #[test]
    fn expectations_match_enumeration() {
        let (seq, fgen, lambda) = fixture();
        let mut store = FeatureStore::new();
        store.init(&seq, &fgen, &lambda, 2).unwrap();
        let mut scratch = SumProductScratch::new();
        let log_z = scratch.sum_product(&store, true).unwrap();

        let mut brute = vec![0.0; fgen.num_features()];
        let mut counts = vec![0.0; fgen.num_features()];
        for seg in all_segmentations(seq.len(), 2) {
            let w = (segmentation_score(&store, &seg) - log_z).exp();
            counts.iter_mut().for_each(|c| *c = 0.0);
            observed_counts(&store, &seg, &mut counts);
            for (b, c) in brute.iter_mut().zip(counts.iter()) {
                *b += w * c;
            }
        }
        for fi in 0..fgen.num_features() {
            let got = exp_clip(scratch.exp_f[fi] - log_z);
            assert!(
                (got - brute[fi]).abs() < 1e-8,
                "feature {} ({}): expected {} got {}",
                fi,
                fgen.feature_name(fi),
                brute[fi],
                got
            );
        }
    }

    #[test]
    fn observed_counts_respect_openness() {
        let gold = Segmentation::from_segments(
            5,
            vec![
                Segment::new(0, 2, 0),
                Segment::new(2, 4, 1),
                Segment::new(4, 5, 0),
            ],
        )
        .unwrap();
        let fire = |f: &ScanFeature| feature_holds(f, &gold);
        let base = ScanFeature {
            index: 0,
            label: 0,
            prev_label: None,
            value: 1.0,
            start: 1,
            start_open: true,
            end: 1,
            end_open: true,
        };
        // both-open anchor inside the first segment
        assert!(fire(&base));
        // exact start must coincide with the segment start
        assert!(!fire(&ScanFeature {
            start_open: false,
            ..base
        }));
        // exact anchor spanning the whole first segment
        assert!(fire(&ScanFeature {
            start: 0,
            start_open: false,
            end_open: false,
            ..base
        }));
        // anchor crossing a segment boundary never fires
        assert!(!fire(&ScanFeature {
            end: 2,
            ..base
        }));
        // transition into the second segment
        let edge = ScanFeature {
            index: 1,
            label: 1,
            prev_label: Some(0),
            value: 1.0,
            start: 2,
            start_open: false,
            end: 2,
            end_open: true,
        };
        assert!(fire(&edge));
        assert!(!fire(&ScanFeature {
            prev_label: Some(1),
            ..edge
        }));
    }

    #[test]
    fn nan_weights_are_reported() {
        let (seq, fgen, mut lambda) = fixture();
        lambda[0] = f64::NAN;
        let mut store = FeatureStore::new();
        store.init(&seq, &fgen, &lambda, 2).unwrap();
        let mut scratch = SumProductScratch::new();
        let err = scratch.sum_product(&store, false).unwrap_err();
        assert!(matches!(err, Error::Numerical(_)));
    }

    #[test]
    fn single_position_sequence() {
        let mut corpus = Corpus::new();
        corpus
            .append_labeled(vec![vec!["a".into()]], &["X"])
            .unwrap();
        // a second label so K > 1
        corpus
            .append_labeled(vec![vec!["b".into()]], &["Y"])
            .unwrap();
        let fgen = WindowFeatureGen::fit(&corpus, 2);
        let lambda = vec![0.25; fgen.num_features()];
        let mut store = FeatureStore::new();
        store
            .init(&corpus.sequences()[0], &fgen, &lambda, 2)
            .unwrap();
        let mut scratch = SumProductScratch::new();
        let log_z = scratch.sum_product(&store, true).unwrap();
        let brute: f64 = all_segmentations(1, 2)
            .iter()
            .map(|seg| segmentation_score(&store, seg).exp())
            .sum();
        assert!((log_z - brute.ln()).abs() < 1e-10);
    }
}
