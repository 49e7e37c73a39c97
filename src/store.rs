//! Indexed store of segment features with boundary openness.
//!
//! Features are bucketed by openness class, anchor length and anchor start.
//! The store supports amortized incremental accumulation of per-label
//! feature mass over a sliding segment window: extending or shrinking a
//! boundary by one position touches only the features entering or leaving
//! scope. Accumulators hold additive log-potentials with identity 0.

use ndarray::{Array1, Array2};

use crate::dataset::{DataSequence, Label};
use crate::error::{Error, Result};
use crate::feature::{FeatureGenerator, SegmentFeature};

// Bucket layout: bit 0 = end open, bit 1 = start open.
const B_EXACT: usize = 0;
const B_END_OPEN: usize = 1;
const B_START_OPEN: usize = 2;
const B_BOTH_OPEN: usize = 3;
const NUM_BUCKETS: usize = 4;

#[derive(Debug, Clone, Copy)]
struct StoredFeature {
    index: usize,
    label: Label,
    value: f64,
}

/// Features sharing one (bucket, anchor length, anchor start) slot, with
/// their per-label weighted mass precomputed.
#[derive(Debug, Clone, Default)]
struct FeatureList {
    feats: Vec<StoredFeature>,
    mass: Vec<f64>,
}

impl FeatureList {
    fn clear(&mut self) {
        self.feats.clear();
        self.mass.fill(0.0);
    }

    fn push(&mut self, f: StoredFeature, lambda: &[f64], num_labels: usize) {
        if self.mass.len() < num_labels {
            self.mass.resize(num_labels, 0.0);
        }
        self.mass[f.label] += lambda[f.index] * f.value;
        self.feats.push(f);
    }

    fn recalc(&mut self, lambda: &[f64]) {
        self.mass.fill(0.0);
        for f in &self.feats {
            self.mass[f.label] += lambda[f.index] * f.value;
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct EdgeFeature {
    index: usize,
    label: Label,
    prev_label: Label,
    value: f64,
}

#[derive(Debug, Clone, Default)]
struct EdgeList {
    feats: Vec<EdgeFeature>,
}

/// Sliding segment window accumulator: the per-label mass of all features
/// whose scope survives further widening of the open boundary, together
/// with the current window `[start, end]` (inclusive internal indices).
#[derive(Debug, Clone)]
pub struct RangeMass {
    pub mass: Array1<f64>,
    pub start: isize,
    pub end: isize,
}

impl RangeMass {
    pub fn new(num_labels: usize) -> Self {
        Self {
            mass: Array1::zeros(num_labels),
            start: 0,
            end: -1,
        }
    }

    /// Reset to the window `[start, end]` with zero mass.
    pub fn reset(&mut self, start: isize, end: isize) {
        self.mass.fill(0.0);
        self.start = start;
        self.end = end;
    }

    /// Reset and walk the right boundary up to `end`, accumulating mass.
    pub fn init_window(&mut self, store: &FeatureStore, start: isize, end: isize, open_only: bool) {
        self.reset(start, (start - 1).min(end));
        let mut i = start;
        while i <= end {
            store.increment_right(None, self, open_only);
            i += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    EndExact,
    EndOpen,
    StartExact,
    StartOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Ge,
    Le,
}

#[derive(Debug, Clone, Copy)]
struct Cond {
    val: isize,
    op: Op,
    open_only: bool,
}

/// A feature as yielded by the store's sorted scan. `end` is the inclusive
/// anchor end.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScanFeature {
    pub index: usize,
    pub label: Label,
    pub prev_label: Option<Label>,
    pub value: f64,
    pub start: usize,
    pub start_open: bool,
    pub end: usize,
    pub end_open: bool,
}

/// The indexed feature store for one sequence.
#[derive(Debug, Clone, Default)]
pub struct FeatureStore {
    num_labels: usize,
    max_gap: usize,
    len: usize,
    cap: usize,
    num_features: usize,
    state: Vec<FeatureList>,
    edges: Vec<EdgeList>,
    edge_mass: Vec<Array2<f64>>,
    lambda: Vec<f64>,
}

impl FeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    pub fn max_boundary_gap(&self) -> usize {
        self.max_gap
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Scan the generator's features for `seq` into the buckets.
    pub fn init<G: FeatureGenerator + ?Sized>(
        &mut self,
        seq: &DataSequence,
        fgen: &G,
        lambda: &[f64],
        num_labels: usize,
    ) -> Result<()> {
        let n = seq.len();
        let m = fgen.max_boundary_gap();
        if n == 0 {
            return Err(Error::invalid_input("empty sequence"));
        }
        if num_labels == 0 {
            return Err(Error::invalid_input("num_labels must be at least 1"));
        }
        if m == 0 {
            return Err(Error::invalid_input("max_boundary_gap must be at least 1"));
        }
        if lambda.len() != fgen.num_features() {
            return Err(Error::invalid_input(format!(
                "weight vector has {} entries, generator declares {} features",
                lambda.len(),
                fgen.num_features()
            )));
        }
        self.num_labels = num_labels;
        self.num_features = fgen.num_features();
        self.lambda = lambda.to_vec();
        self.allocate(n, m);

        let mut err = None;
        let mut fired = false;
        fgen.emit(seq, &mut |f| {
            if err.is_none() {
                match self.insert(f) {
                    Ok(()) => fired = true,
                    Err(e) => err = Some(e),
                }
            }
        });
        if let Some(e) = err {
            return Err(e);
        }
        if !fired {
            return Err(Error::InvalidFeature(
                "generator emitted no features for sequence".into(),
            ));
        }
        self.refresh_edge_mass();
        Ok(())
    }

    /// Reapply a new weight vector without re-scanning features.
    pub fn set_weights(&mut self, lambda: &[f64]) -> Result<()> {
        if lambda.len() != self.num_features {
            return Err(Error::invalid_input(format!(
                "weight vector has {} entries, store indexed {} features",
                lambda.len(),
                self.num_features
            )));
        }
        self.lambda.clear();
        self.lambda.extend_from_slice(lambda);
        for bucket in 0..NUM_BUCKETS {
            for l in 0..self.max_gap {
                for s in 0..self.len {
                    let idx = self.slot(bucket, l, s);
                    self.state[idx].recalc(&self.lambda);
                }
            }
        }
        self.refresh_edge_mass();
        Ok(())
    }

    fn allocate(&mut self, n: usize, m: usize) {
        self.len = n;
        if m == self.max_gap && self.cap >= n {
            for list in &mut self.state {
                list.clear();
            }
            for list in &mut self.edges {
                list.feats.clear();
            }
            for mi in &mut self.edge_mass {
                mi.fill(0.0);
            }
            // reallocate edge mass matrices if label count changed
            if self
                .edge_mass
                .first()
                .map(|mi| mi.dim().0 != self.num_labels)
                .unwrap_or(false)
            {
                let k = self.num_labels;
                self.edge_mass = (0..self.cap).map(|_| Array2::zeros((k, k))).collect();
            }
            return;
        }
        self.max_gap = m;
        self.cap = 2 * n;
        let slots = NUM_BUCKETS * m * self.cap;
        self.state = (0..slots).map(|_| FeatureList::default()).collect();
        self.edges = (0..self.cap).map(|_| EdgeList::default()).collect();
        let k = self.num_labels;
        self.edge_mass = (0..self.cap).map(|_| Array2::zeros((k, k))).collect();
    }

    fn slot(&self, bucket: usize, len: usize, start: usize) -> usize {
        (bucket * self.max_gap + len) * self.cap + start
    }

    fn insert(&mut self, f: SegmentFeature) -> Result<()> {
        if f.index >= self.num_features {
            return Err(Error::InvalidFeature(format!(
                "feature index {} out of range (num_features {})",
                f.index, self.num_features
            )));
        }
        if f.label >= self.num_labels {
            return Err(Error::InvalidFeature(format!(
                "feature label {} out of range (num_labels {})",
                f.label, self.num_labels
            )));
        }
        if !f.value.is_finite() || f.value < 0.0 {
            return Err(Error::InvalidFeature(format!(
                "feature {} has non-finite or negative value {}",
                f.index, f.value
            )));
        }
        if f.end <= f.start || f.end > self.len {
            return Err(Error::InvalidFeature(format!(
                "feature {} anchor [{}, {}) out of sequence bounds 0..{}",
                f.index, f.start, f.end, self.len
            )));
        }
        if f.end - f.start > self.max_gap {
            return Err(Error::InvalidFeature(format!(
                "feature {} anchor span {} exceeds max_boundary_gap {}",
                f.index,
                f.end - f.start,
                self.max_gap
            )));
        }
        if let Some(yp) = f.prev_label {
            if yp >= self.num_labels {
                return Err(Error::InvalidFeature(format!(
                    "edge feature {} prev_label {} out of range",
                    f.index, yp
                )));
            }
            self.edges[f.start].feats.push(EdgeFeature {
                index: f.index,
                label: f.label,
                prev_label: yp,
                value: f.value,
            });
        } else {
            let bucket = match (f.start_open, f.end_open) {
                (false, false) => B_EXACT,
                (false, true) => B_END_OPEN,
                (true, false) => B_START_OPEN,
                (true, true) => B_BOTH_OPEN,
            };
            // internal anchor end is inclusive
            let len = f.end - 1 - f.start;
            let idx = self.slot(bucket, len, f.start);
            let stored = StoredFeature {
                index: f.index,
                label: f.label,
                value: f.value,
            };
            self.state[idx].push(stored, &self.lambda, self.num_labels);
        }
        Ok(())
    }

    fn refresh_edge_mass(&mut self) {
        for i in 0..self.len {
            let mi = &mut self.edge_mass[i];
            mi.fill(0.0);
            for f in &self.edges[i].feats {
                mi[[f.prev_label, f.label]] += self.lambda[f.index] * f.value;
            }
        }
    }

    fn fold(&self, bucket: usize, len: usize, start: usize, mat: &mut Array1<f64>, add: bool) {
        let list = &self.state[self.slot(bucket, len, start)];
        if list.feats.is_empty() {
            return;
        }
        for (y, v) in mat.iter_mut().zip(list.mass.iter()) {
            if add {
                *y += v;
            } else {
                *y -= v;
            }
        }
    }

    fn apply(&self, mat: &mut Array1<f64>, kind: Bound, index: isize, cond: Cond, add: bool) {
        let m = self.max_gap as isize;
        let n = self.len as isize;
        match kind {
            Bound::EndExact | Bound::EndOpen => {
                let open_end = kind == Bound::EndOpen;
                // open-start buckets swept over admissible anchor starts
                let t = B_START_OPEN + open_end as usize;
                let mut s_lo = (index - m + 1).max(0);
                let mut s_hi = (n - 1).min(index);
                match cond.op {
                    Op::Ge => s_lo = s_lo.max(cond.val),
                    Op::Le => s_hi = s_hi.min(cond.val),
                }
                let mut s = s_lo;
                while s <= s_hi {
                    if index - s >= 0 {
                        self.fold(t, (index - s) as usize, s as usize, mat, add);
                    }
                    s += 1;
                }
                if !cond.open_only {
                    // the exact-start anchor at the window's left boundary
                    let t = open_end as usize;
                    let sb = cond.val;
                    if index - sb < m && index - sb >= 0 && sb >= 0 && sb < n {
                        self.fold(t, (index - sb) as usize, sb as usize, mat, add);
                    }
                }
            }
            Bound::StartExact | Bound::StartOpen => {
                let open_start = kind == Bound::StartOpen;
                // open-end buckets swept over admissible anchor ends
                let t = B_END_OPEN + 2 * open_start as usize;
                let mut e_hi = (index + m - 1).min(n - 1);
                let mut e_lo = index;
                match cond.op {
                    Op::Ge => e_lo = cond.val,
                    Op::Le => e_hi = e_hi.min(cond.val),
                }
                let mut e = e_lo;
                while e <= e_hi {
                    if e - index >= 0 && index >= 0 {
                        self.fold(t, (e - index) as usize, index as usize, mat, add);
                    }
                    e += 1;
                }
                if !cond.open_only {
                    // the exact-end anchor at the window's right boundary
                    let t = 2 * open_start as usize;
                    let eb = cond.val;
                    if eb - index < m && eb - index >= 0 && index >= 0 && index < n {
                        self.fold(t, (eb - index) as usize, index as usize, mat, add);
                    }
                }
            }
        }
    }

    /// Widen the window's right boundary by one. `open` accumulates the
    /// end-open mass; `ri`, when given, receives the full mass of the exact
    /// window.
    pub fn increment_right(
        &self,
        ri: Option<&mut Array1<f64>>,
        open: &mut RangeMass,
        open_only: bool,
    ) {
        open.end += 1;
        assert!(
            open.end <= self.len as isize,
            "window right boundary {} walked past sequence length {}",
            open.end,
            self.len
        );
        let cond = Cond {
            val: open.start,
            op: Op::Ge,
            open_only,
        };
        self.apply(&mut open.mass, Bound::EndOpen, open.end, cond, true);
        if let Some(ri) = ri {
            ri.assign(&open.mass);
            self.apply(ri, Bound::EndExact, open.end, cond, true);
        }
    }

    /// Widen the window's left boundary by one (downward). `open`
    /// accumulates the start-open mass. With `end_open` set, exact-end
    /// features at the fixed right boundary are excluded from `open`.
    pub fn decrement_left(
        &self,
        ri: Option<&mut Array1<f64>>,
        open: &mut RangeMass,
        end_open: bool,
    ) {
        open.start -= 1;
        assert!(
            open.start >= 0,
            "window left boundary walked below position 0"
        );
        let cond = Cond {
            val: open.end,
            op: Op::Le,
            open_only: end_open,
        };
        self.apply(&mut open.mass, Bound::StartOpen, open.start, cond, true);
        if let Some(ri) = ri {
            ri.assign(&open.mass);
            self.apply(ri, Bound::StartExact, open.start, cond, true);
        }
    }

    /// Shrink the window's right boundary by one, removing the end-open
    /// mass that falls out of scope.
    pub fn decrement_right(&self, ri: Option<&mut Array1<f64>>, open: &mut RangeMass) {
        open.end -= 1;
        assert!(
            open.end >= open.start - 1,
            "window right boundary {} walked past left boundary {}",
            open.end,
            open.start
        );
        let cond = Cond {
            val: open.start,
            op: Op::Ge,
            open_only: false,
        };
        self.apply(&mut open.mass, Bound::EndOpen, open.end + 1, cond, false);
        if let Some(ri) = ri {
            ri.assign(&open.mass);
            self.apply(ri, Bound::EndExact, open.end, cond, true);
        }
    }

    /// Mass of features applicable to segments with start at or before
    /// `left` and end exactly `right`: `delta` gets the full increment,
    /// `open_delta` only the part that stays applicable as the end grows.
    pub fn delta_r_rshift(
        &self,
        left: isize,
        right: isize,
        delta: &mut Array1<f64>,
        open_delta: &mut Array1<f64>,
    ) {
        let cond = Cond {
            val: left,
            op: Op::Ge,
            open_only: true,
        };
        open_delta.fill(0.0);
        self.apply(open_delta, Bound::EndOpen, right, cond, true);
        delta.assign(open_delta);
        self.apply(delta, Bound::EndExact, right, cond, true);
    }

    /// Mass of features anchored at start exactly `left` with end at or
    /// before `right`. The dual of [`delta_r_rshift`](Self::delta_r_rshift).
    pub fn delta_r_lshift(
        &self,
        left: isize,
        right: isize,
        delta: &mut Array1<f64>,
        mut open_delta: Option<&mut Array1<f64>>,
    ) {
        let cond = Cond {
            val: right,
            op: Op::Le,
            open_only: true,
        };
        if let Some(open_delta) = open_delta.as_deref_mut() {
            open_delta.fill(0.0);
            self.apply(open_delta, Bound::StartOpen, left, cond, true);
            delta.assign(open_delta);
        } else {
            delta.fill(0.0);
        }
        self.apply(delta, Bound::StartExact, left, cond, true);
    }

    /// Subtract exact-end features of the window `[left, right]`.
    pub fn remove_exact_end_features(&self, ri: &mut Array1<f64>, left: isize, right: isize) {
        if right < 0 {
            return;
        }
        let cond = Cond {
            val: left,
            op: Op::Ge,
            open_only: false,
        };
        self.apply(ri, Bound::EndExact, right, cond, false);
    }

    /// Subtract exact-start features of the window `[left, right]`.
    pub fn remove_exact_start_features(&self, ri: &mut Array1<f64>, left: isize, right: isize) {
        let cond = Cond {
            val: right,
            op: Op::Le,
            open_only: false,
        };
        self.apply(ri, Bound::StartExact, left, cond, false);
    }

    /// Full per-label mass of the exact segment `[s, e]` (inclusive),
    /// recomputed from scratch. The oracle the incremental walks must agree
    /// with.
    pub fn get_exact_r(&self, s: isize, e: isize, ri: &mut Array1<f64>) {
        ri.fill(0.0);
        let cond = Cond {
            val: s,
            op: Op::Ge,
            open_only: false,
        };
        self.apply(ri, Bound::EndExact, e, cond, true);
        let mut i = e;
        while i >= s {
            self.apply(ri, Bound::EndOpen, i, cond, true);
            i -= 1;
        }
    }

    /// Log transition potentials into a segment starting at position `i`.
    pub fn get_log_mi(&self, i: usize, mi: &mut Array2<f64>) {
        assert!(i < self.len, "transition position {} out of range", i);
        mi.assign(&self.edge_mass[i]);
    }

    /// Scan all stored features sorted by anchor start ascending, then
    /// anchor end descending, state buckets before edge features.
    pub(crate) fn scan_sorted(&self) -> SortedScan<'_> {
        SortedScan {
            store: self,
            s: 0,
            len: self.max_gap.saturating_sub(1),
            bucket: 0,
            pos: 0,
        }
    }
}

pub(crate) struct SortedScan<'a> {
    store: &'a FeatureStore,
    s: usize,
    len: usize,
    // 0..4 are state buckets, 4 is the edge list (anchor length 0 only)
    bucket: usize,
    pos: usize,
}

impl<'a> Iterator for SortedScan<'a> {
    type Item = ScanFeature;

    fn next(&mut self) -> Option<ScanFeature> {
        let store = self.store;
        loop {
            if self.s >= store.len {
                return None;
            }
            if self.bucket < NUM_BUCKETS {
                let list = &store.state[store.slot(self.bucket, self.len, self.s)];
                if self.pos < list.feats.len() {
                    let f = list.feats[self.pos];
                    self.pos += 1;
                    return Some(ScanFeature {
                        index: f.index,
                        label: f.label,
                        prev_label: None,
                        value: f.value,
                        start: self.s,
                        start_open: self.bucket / 2 == 1,
                        end: self.s + self.len,
                        end_open: self.bucket & 1 == 1,
                    });
                }
            } else if self.len == 0 {
                let list = &store.edges[self.s];
                if self.pos < list.feats.len() {
                    let f = list.feats[self.pos];
                    self.pos += 1;
                    // edge features behave as exact-start, open-end
                    return Some(ScanFeature {
                        index: f.index,
                        label: f.label,
                        prev_label: Some(f.prev_label),
                        value: f.value,
                        start: self.s,
                        start_open: false,
                        end: self.s,
                        end_open: true,
                    });
                }
            }
            self.pos = 0;
            self.bucket += 1;
            if self.bucket > NUM_BUCKETS {
                self.bucket = 0;
                if self.len == 0 {
                    self.len = store.max_gap - 1;
                    self.s += 1;
                } else {
                    self.len -= 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Corpus, DataSequence};
    use crate::feature::WindowFeatureGen;

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
        // deterministic non-trivial weights
        let lambda: Vec<f64> = (0..fgen.num_features())
            .map(|i| ((i * 37 + 11) % 23) as f64 / 23.0 - 0.5)
            .collect();
        (corpus.sequences()[0].clone(), fgen, lambda)
    }

    fn init_store() -> (FeatureStore, usize, usize) {
        let (seq, fgen, lambda) = fixture();
        let mut store = FeatureStore::new();
        store.init(&seq, &fgen, &lambda, 2).unwrap();
        (store, seq.len(), 2)
    }

    fn max_abs_diff(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f64::max)
    }

    #[test]
    fn right_walk_matches_exact_recompute() {
        let (store, n, k) = init_store();
        let mut ri = Array1::zeros(k);
        let mut exact = Array1::zeros(k);
        for s in 0..n as isize {
            let mut open = RangeMass::new(k);
            open.reset(s, s - 1);
            let e_max = (n as isize - 1).min(s + store.max_boundary_gap() as isize - 1);
            for e in s..=e_max {
                store.increment_right(Some(&mut ri), &mut open, false);
                store.get_exact_r(s, e, &mut exact);
                assert!(
                    max_abs_diff(&ri, &exact) < 1e-10,
                    "window [{}, {}] diverged",
                    s,
                    e
                );
            }
        }
    }

    #[test]
    fn left_walk_matches_exact_recompute() {
        let (store, n, k) = init_store();
        let mut ri = Array1::zeros(k);
        let mut exact = Array1::zeros(k);
        for e in 0..n as isize {
            let mut open = RangeMass::new(k);
            open.reset(e + 1, e);
            let s_min = (e - store.max_boundary_gap() as isize + 1).max(0);
            let mut s = e;
            while s >= s_min {
                store.decrement_left(Some(&mut ri), &mut open, false);
                store.get_exact_r(s, e, &mut exact);
                assert!(
                    max_abs_diff(&ri, &exact) < 1e-10,
                    "window [{}, {}] diverged",
                    s,
                    e
                );
                s -= 1;
            }
        }
    }

    #[test]
    fn right_shrink_undoes_growth() {
        let (store, _, k) = init_store();
        let mut open = RangeMass::new(k);
        open.reset(1, 0);
        let mut ri = Array1::zeros(k);
        store.increment_right(Some(&mut ri), &mut open, false);
        store.increment_right(Some(&mut ri), &mut open, false);
        let mut exact = Array1::zeros(k);
        store.decrement_right(Some(&mut ri), &mut open);
        store.get_exact_r(1, 1, &mut exact);
        assert!(max_abs_diff(&ri, &exact) < 1e-10);
    }

    #[test]
    fn set_weights_refreshes_mass() {
        let (seq, fgen, lambda) = fixture();
        let mut store = FeatureStore::new();
        store.init(&seq, &fgen, &lambda, 2).unwrap();
        let doubled: Vec<f64> = lambda.iter().map(|w| 2.0 * w).collect();
        store.set_weights(&doubled).unwrap();
        let mut ri = Array1::zeros(2);
        store.get_exact_r(0, 1, &mut ri);
        let mut fresh = FeatureStore::new();
        fresh.init(&seq, &fgen, &doubled, 2).unwrap();
        let mut ri2 = Array1::zeros(2);
        fresh.get_exact_r(0, 1, &mut ri2);
        assert!(max_abs_diff(&ri, &ri2) < 1e-10);
    }

    #[test]
    fn sorted_scan_is_monotone() {
        let (store, _, _) = init_store();
        let mut count = 0;
        let mut prev: Option<(usize, usize)> = None;
        for f in store.scan_sorted() {
            if let Some((ps, pe)) = prev {
                assert!(
                    f.start > ps || (f.start == ps && f.end <= pe),
                    "scan order violated at ({}, {})",
                    f.start,
                    f.end
                );
            }
            prev = Some((f.start, f.end));
            count += 1;
        }
        assert!(count > 0);
    }

    #[test]
    fn init_rejects_bad_features() {
        let (seq, fgen, _) = fixture();
        let mut store = FeatureStore::new();
        // weight vector length mismatch
        assert!(store.init(&seq, &fgen, &[0.0; 3], 2).is_err());
    }
}
