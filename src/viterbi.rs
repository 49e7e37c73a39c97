//! Beam search over segmentations.
//!
//! The decoder keeps, per position and label, a beam of the best partial
//! segmentations ending there. Segment lengths up to the boundary gap are
//! enumerated directly; longer segments are represented by a parallel set
//! of "open" beams that extend one position at a time carrying only the
//! boundary-open feature mass, and close back into the main beam when the
//! segment ends.
//!
//! With loss augmentation enabled, candidate potentials are shifted by a
//! per-boundary Hamming-style loss against the sequence's gold
//! segmentation, which turns the search into the margin trainer's
//! most-violating-segmentation oracle.

use std::rc::Rc;

use ndarray::{Array1, Array2};

use crate::dataset::{DataSequence, Label, Segment, Segmentation};
use crate::error::{Error, Result};
use crate::feature::FeatureGenerator;
use crate::store::{FeatureStore, RangeMass};

/// One scored partial segmentation. `prev` always points at a closed
/// solution (the last solution of the preceding segment) or `None` when
/// the segment starting at position 0 is the first one.
#[derive(Debug)]
struct Soln {
    label: Label,
    pos: usize,
    score: f64,
    prev: Option<Rc<Soln>>,
    open: bool,
}

/// A fixed-capacity beam of solutions sorted by score descending.
#[derive(Debug, Default)]
struct Entry {
    cap: usize,
    solns: Vec<Rc<Soln>>,
}

impl Entry {
    fn reset(&mut self, cap: usize) {
        self.cap = cap;
        self.solns.clear();
    }

    fn is_empty(&self) -> bool {
        self.solns.is_empty()
    }

    fn insert(&mut self, soln: Soln) {
        let at = self
            .solns
            .iter()
            .position(|s| soln.score >= s.score)
            .unwrap_or(self.solns.len());
        if at < self.cap {
            self.solns.insert(at, Rc::new(soln));
            self.solns.truncate(self.cap);
        }
    }

    fn seed(&mut self, label: Label, pos: usize, score: f64, open: bool) {
        self.insert(Soln {
            label,
            pos,
            score,
            prev: None,
            open,
        });
    }

    /// Merge every solution of `prev` extended by `this_score`. Links
    /// through open solutions collapse to their closed predecessor, so
    /// back-pointer chains only ever contain closed solutions.
    fn extend(&mut self, prev: &Entry, label: Label, pos: usize, this_score: f64, open: bool) {
        for p in &prev.solns {
            let link = if p.open {
                p.prev.clone()
            } else {
                Some(Rc::clone(p))
            };
            self.insert(Soln {
                label,
                pos,
                score: p.score + this_score,
                prev: link,
                open,
            });
        }
    }
}

/// Per-position beams, one entry per label.
#[derive(Debug, Default)]
struct BeamContext {
    entries: Vec<Entry>,
}

impl BeamContext {
    fn reset(&mut self, num_labels: usize, cap: usize) {
        if self.entries.len() != num_labels {
            self.entries.resize_with(num_labels, Entry::default);
        }
        for e in &mut self.entries {
            e.reset(cap);
        }
    }
}

/// Reusable beam decoder. One instance serves one thread; the feature
/// store and beams are recycled between sequences.
pub(crate) struct SegmentDecoder {
    beam: usize,
    markov: bool,
    len: usize,
    store: FeatureStore,
    context: Vec<BeamContext>,
    open_context: Vec<BeamContext>,
    ri: Array1<f64>,
    delta: Array1<f64>,
    open_delta: Array1<f64>,
    mi: Array2<f64>,
    open_ri: RangeMass,
    final_soln: Entry,
}

impl SegmentDecoder {
    /// `markov` restricts segments to single positions, reducing the model
    /// to an ordinary chain CRF over the same feature space.
    pub fn new(beam: usize, markov: bool) -> Self {
        Self {
            beam: beam.max(1),
            markov,
            len: 0,
            store: FeatureStore::new(),
            context: Vec::new(),
            open_context: Vec::new(),
            ri: Array1::zeros(0),
            delta: Array1::zeros(0),
            open_delta: Array1::zeros(0),
            mi: Array2::zeros((0, 0)),
            open_ri: RangeMass::new(0),
            final_soln: Entry::default(),
        }
    }

    pub fn store(&self) -> &FeatureStore {
        &self.store
    }

    /// Run the search over one sequence. Results are read back through
    /// [`best`](Self::best) and [`nth`](Self::nth).
    pub fn search<G: FeatureGenerator + ?Sized>(
        &mut self,
        seq: &DataSequence,
        fgen: &G,
        lambda: &[f64],
        num_labels: usize,
        loss_augmented: bool,
    ) -> Result<()> {
        self.store.init(seq, fgen, lambda, num_labels)?;
        let n = seq.len();
        let m = self.store.max_boundary_gap();
        let k = num_labels;
        self.len = n;
        if self.ri.len() != k {
            self.ri = Array1::zeros(k);
            self.delta = Array1::zeros(k);
            self.open_delta = Array1::zeros(k);
            self.mi = Array2::zeros((k, k));
            self.open_ri = RangeMass::new(k);
        }
        if self.context.len() < n {
            self.context.resize_with(n, BeamContext::default);
            self.open_context.resize_with(n, BeamContext::default);
        }
        for i in 0..n {
            let cap = if i == 0 { 1 } else { self.beam };
            self.context[i].reset(k, cap);
            self.open_context[i].reset(k, cap);
        }
        self.open_ri.reset(1, 0);

        let max_ell = if self.markov { 1 } else { m };
        for i in 0..n {
            for ell in 1..=max_ell.min(i + 1) {
                let lo = (i + 1 - ell) as isize;
                if self.open_ri.end != i as isize || self.open_ri.start < lo {
                    self.open_ri.reset(i as isize + 1, i as isize);
                }
                while self.open_ri.start != lo {
                    self.store
                        .decrement_left(Some(&mut self.ri), &mut self.open_ri, false);
                    if loss_augmented {
                        self.adjust_score(seq.segmentation(), i);
                    }
                }
                if ell == i + 1 {
                    for y in 0..k {
                        self.context[i].entries[y].seed(y, i, self.ri[y], false);
                    }
                } else {
                    let ip = i - ell;
                    self.store.get_log_mi(ip + 1, &mut self.mi);
                    let (head, tail) = self.context.split_at_mut(i);
                    let cur = &mut tail[0];
                    for yp in 0..k {
                        let prev = &head[ip].entries[yp];
                        if prev.is_empty() {
                            continue;
                        }
                        for y in 0..k {
                            cur.entries[y].extend(prev, y, i, self.mi[[yp, y]] + self.ri[y], false);
                        }
                    }
                }
            }
            if !self.markov {
                self.finish_context(i, m, k);
            }
        }

        self.final_soln.reset(self.beam);
        for y in 0..k {
            let entry = &self.context[n - 1].entries[y];
            // wrapper solutions; the real chain hangs off `prev`
            self.final_soln.extend(entry, 0, 0, 0.0, false);
        }
        if self.final_soln.is_empty() {
            return Err(Error::Numerical(
                "beam search produced no complete segmentation".into(),
            ));
        }
        Ok(())
    }

    /// Bookkeeping for segments longer than the boundary gap: close open
    /// beams that end here, extend them by one position, and open new
    /// beams for segments whose exact window just slid out of reach.
    fn finish_context(&mut self, i: usize, m: usize, k: usize) {
        if i + 1 >= m {
            // ri holds the last full window [i-m+1, i]
            self.store
                .remove_exact_end_features(&mut self.ri, (i + 1 - m) as isize, i as isize);
            if i + 1 == m {
                for y in 0..k {
                    self.open_context[i].entries[y].seed(y, i, self.ri[y], true);
                }
            }
        }
        if i >= m {
            self.store.delta_r_rshift(
                (i - m) as isize,
                i as isize,
                &mut self.delta,
                &mut self.open_delta,
            );
            {
                let (head, tail) = self.open_context.split_at_mut(i);
                let prev_open = &head[i - 1];
                for y in 0..k {
                    // a long segment with label y closes at i
                    self.context[i].entries[y].extend(
                        &prev_open.entries[y],
                        y,
                        i,
                        self.delta[y],
                        false,
                    );
                    // or keeps growing
                    tail[0].entries[y].extend(&prev_open.entries[y], y, i, self.open_delta[y], true);
                }
            }
            // segments [i-m+1, ..] whose start just left the exact window
            self.store.get_log_mi(i - m + 1, &mut self.mi);
            for yp in 0..k {
                let prev = &self.context[i - m].entries[yp];
                if prev.is_empty() {
                    continue;
                }
                for y in 0..k {
                    self.open_context[i].entries[y].extend(
                        prev,
                        y,
                        i,
                        self.mi[[yp, y]] + self.ri[y],
                        true,
                    );
                }
            }
        }
    }

    /// Raise every candidate potential by its boundary loss against `gold`.
    /// A candidate segment starting at the window's left boundary pays one
    /// unit unless that boundary and label match gold, and one more when it
    /// overruns a gold segment start.
    fn adjust_score(&mut self, gold: &Segmentation, i: usize) {
        let start = self.open_ri.start as usize;
        let sg = gold.segment(gold.segment_index_at(start));
        self.ri += 1.0;
        if sg.start == start {
            self.ri[sg.label] -= 1.0;
        } else {
            self.ri += 1.0;
        }
        if start + 1 <= i {
            let next = gold.segment(gold.segment_index_at(start + 1));
            if next.start == start + 1 {
                self.ri += 1.0;
                self.open_ri.mass += 1.0;
            }
        }
    }

    /// Best segmentation and its (possibly loss-augmented) score.
    pub fn best(&self) -> Result<(f64, Segmentation)> {
        self.nth(0).ok_or_else(|| {
            Error::Numerical("beam search produced no complete segmentation".into())
        })
    }

    /// The `rank`-th best segmentation, if the beam kept that many.
    pub fn nth(&self, rank: usize) -> Option<(f64, Segmentation)> {
        let wrapper = self.final_soln.solns.get(rank)?;
        let score = wrapper.score;
        let mut node = Rc::clone(wrapper.prev.as_ref()?);
        let mut segs = Vec::new();
        loop {
            let prev = node.prev.clone();
            let start = prev.as_ref().map_or(0, |p| p.pos + 1);
            segs.push(Segment::new(start, node.pos + 1, node.label));
            match prev {
                Some(p) => node = p,
                None => break,
            }
        }
        segs.reverse();
        Segmentation::from_segments(self.len, segs)
            .ok()
            .map(|s| (score, s))
    }

    /// Number of complete segmentations the final beam retained.
    pub fn num_solutions(&self) -> usize {
        self.final_soln.solns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Corpus;
    use crate::feature::WindowFeatureGen;
    use crate::train::forward_backward::segmentation_score;

    fn fixture() -> (Corpus, WindowFeatureGen, Vec<f64>) {
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
            .map(|i| ((i * 53 + 7) % 29) as f64 / 29.0 - 0.5)
            .collect();
        (corpus, fgen, lambda)
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
    fn best_matches_enumeration() {
        let (corpus, fgen, lambda) = fixture();
        let seq = &corpus.sequences()[0];
        let mut decoder = SegmentDecoder::new(1, false);
        decoder.search(seq, &fgen, &lambda, 2, false).unwrap();
        let (score, seg) = decoder.best().unwrap();

        let mut best_brute = f64::NEG_INFINITY;
        let mut best_seg = None;
        for cand in all_segmentations(seq.len(), 2) {
            let s = segmentation_score(decoder.store(), &cand);
            if s > best_brute {
                best_brute = s;
                best_seg = Some(cand);
            }
        }
        assert!((score - best_brute).abs() < 1e-9, "{} vs {}", score, best_brute);
        assert_eq!(seg, best_seg.unwrap());
    }

    #[test]
    fn top_k_scores_are_sorted_and_exact() {
        let (corpus, fgen, lambda) = fixture();
        let seq = &corpus.sequences()[0];
        let mut decoder = SegmentDecoder::new(3, false);
        decoder.search(seq, &fgen, &lambda, 2, false).unwrap();
        assert!(decoder.num_solutions() >= 3);

        let mut brute: Vec<f64> = all_segmentations(seq.len(), 2)
            .iter()
            .map(|cand| segmentation_score(decoder.store(), cand))
            .collect();
        brute.sort_by(|a, b| b.partial_cmp(a).unwrap());
        let mut prev = f64::INFINITY;
        for rank in 0..3 {
            let (score, seg) = decoder.nth(rank).unwrap();
            assert!(score <= prev + 1e-12);
            assert!((score - brute[rank]).abs() < 1e-9);
            assert!(
                (segmentation_score(decoder.store(), &seg) - score).abs() < 1e-9,
                "reported score disagrees with rescoring"
            );
            prev = score;
        }
    }

    #[test]
    fn markov_mode_emits_unit_segments() {
        let (corpus, fgen, lambda) = fixture();
        let seq = &corpus.sequences()[0];
        let mut decoder = SegmentDecoder::new(1, true);
        decoder.search(seq, &fgen, &lambda, 2, false).unwrap();
        let (_, seg) = decoder.best().unwrap();
        assert_eq!(seg.len(), seq.len());
        assert!(seg.iter().all(|s| s.len() == 1));
    }

    #[test]
    fn loss_augmentation_penalizes_gold() {
        let (corpus, fgen, _) = fixture();
        let seq = &corpus.sequences()[0];
        // zero weights: every segmentation scores 0, so the augmented
        // search must surface one that disagrees with gold
        let lambda = vec![0.0; fgen.num_features()];
        let mut decoder = SegmentDecoder::new(1, false);
        decoder.search(seq, &fgen, &lambda, 2, true).unwrap();
        let (score, seg) = decoder.best().unwrap();
        assert!(score > 0.0);
        assert_ne!(&seg, seq.segmentation());
    }
}
