//! Segment features and the feature generator contract.

use std::collections::HashMap;

use crate::dataset::{Corpus, DataSequence, Label};

/// One weighted feature over a candidate segment.
///
/// `start`/`end` declare the anchor span, `end` exclusive. An exact boundary
/// means the feature fires only for segments sharing that boundary; an open
/// start fires for any segment starting at or before `start`, an open end
/// for any segment ending at or after `end` (i.e. segments containing the
/// anchor span). Anchor spans never exceed the generator's
/// `max_boundary_gap`.
///
/// A feature with `prev_label: Some(_)` is an edge feature: it scores the
/// transition into a segment starting at `start` and ignores the end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentFeature {
    pub index: usize,
    pub value: f64,
    pub label: Label,
    pub prev_label: Option<Label>,
    pub start: usize,
    pub start_open: bool,
    pub end: usize,
    pub end_open: bool,
}

impl SegmentFeature {
    /// Feature firing only for the exact segment `[start, end)`.
    pub fn exact(index: usize, start: usize, end: usize, label: Label, value: f64) -> Self {
        Self {
            index,
            value,
            label,
            prev_label: None,
            start,
            start_open: false,
            end,
            end_open: false,
        }
    }

    /// Mark the start boundary open.
    pub fn open_start(mut self) -> Self {
        self.start_open = true;
        self
    }

    /// Mark the end boundary open.
    pub fn open_end(mut self) -> Self {
        self.end_open = true;
        self
    }

    /// Transition feature into a segment starting at `pos`.
    pub fn edge(index: usize, pos: usize, prev_label: Label, label: Label, value: f64) -> Self {
        Self {
            index,
            value,
            label,
            prev_label: Some(prev_label),
            start: pos,
            start_open: false,
            end: pos + 1,
            end_open: true,
        }
    }

    pub fn is_edge(&self) -> bool {
        self.prev_label.is_some()
    }
}

/// Supplies the features of a sequence to the engine.
///
/// Emission order is unconstrained; the store buckets features on insert and
/// iterates them in its own sorted order.
pub trait FeatureGenerator: Sync {
    /// Size of the feature index space.
    fn num_features(&self) -> usize;

    /// Largest anchor span any emitted feature may declare. Segments may be
    /// longer; features just cannot discriminate boundaries further apart.
    fn max_boundary_gap(&self) -> usize;

    /// Human-readable name for diagnostics.
    fn feature_name(&self, index: usize) -> String {
        format!("f{}", index)
    }

    /// Push every feature of `seq` into `sink`.
    fn emit(&self, seq: &DataSequence, sink: &mut dyn FnMut(SegmentFeature));
}

impl<G: FeatureGenerator + ?Sized> FeatureGenerator for &G {
    fn num_features(&self) -> usize {
        (**self).num_features()
    }

    fn max_boundary_gap(&self) -> usize {
        (**self).max_boundary_gap()
    }

    fn feature_name(&self, index: usize) -> String {
        (**self).feature_name(index)
    }

    fn emit(&self, seq: &DataSequence, sink: &mut dyn FnMut(SegmentFeature)) {
        (**self).emit(seq, sink)
    }
}

/// Built-in generator over per-position attributes.
///
/// Emits, for every label, four template families:
/// - token: attribute at a position, open on both sides (fires for any
///   segment containing the position);
/// - begin: attribute at a segment start, exact start / open end;
/// - end: attribute at a segment end, open start / exact end;
/// - length: segment-length indicator, exact on both sides;
///
/// plus dense edge features between every label pair.
#[derive(Debug, Clone)]
pub struct WindowFeatureGen {
    attrs: HashMap<String, usize>,
    attr_names: Vec<String>,
    num_labels: usize,
    max_gap: usize,
}

const FAMILIES: usize = 3;

impl WindowFeatureGen {
    /// Build the feature index space from a corpus.
    pub fn fit(corpus: &Corpus, max_gap: usize) -> Self {
        let mut gen = Self {
            attrs: HashMap::new(),
            attr_names: Vec::new(),
            num_labels: corpus.num_labels(),
            max_gap,
        };
        for seq in corpus.sequences() {
            for i in 0..seq.len() {
                for attr in seq.item(i) {
                    if !gen.attrs.contains_key(&attr.name) {
                        gen.attrs.insert(attr.name.clone(), gen.attr_names.len());
                        gen.attr_names.push(attr.name.clone());
                    }
                }
            }
        }
        gen
    }

    fn num_attrs(&self) -> usize {
        self.attr_names.len()
    }

    // index layout: [token | begin | end] x attr x label, then length x label,
    // then edge label pairs
    fn attr_index(&self, family: usize, attr: usize, y: usize) -> usize {
        (family * self.num_attrs() + attr) * self.num_labels + y
    }

    fn len_index(&self, len: usize, y: usize) -> usize {
        FAMILIES * self.num_attrs() * self.num_labels + (len - 1) * self.num_labels + y
    }

    fn edge_index(&self, yp: usize, y: usize) -> usize {
        (FAMILIES * self.num_attrs() + self.max_gap) * self.num_labels
            + yp * self.num_labels
            + y
    }
}

impl FeatureGenerator for WindowFeatureGen {
    fn num_features(&self) -> usize {
        (FAMILIES * self.num_attrs() + self.max_gap) * self.num_labels
            + self.num_labels * self.num_labels
    }

    fn max_boundary_gap(&self) -> usize {
        self.max_gap
    }

    fn feature_name(&self, index: usize) -> String {
        let k = self.num_labels;
        let attr_block = FAMILIES * self.num_attrs() * k;
        if index < attr_block {
            let y = index % k;
            let attr = (index / k) % self.num_attrs();
            let family = ["token", "begin", "end"][index / k / self.num_attrs()];
            format!("{}:{}:y{}", family, self.attr_names[attr], y)
        } else if index < attr_block + self.max_gap * k {
            let rest = index - attr_block;
            format!("len{}:y{}", rest / k + 1, rest % k)
        } else {
            let rest = index - attr_block - self.max_gap * k;
            format!("edge:y{}-y{}", rest / k, rest % k)
        }
    }

    fn emit(&self, seq: &DataSequence, sink: &mut dyn FnMut(SegmentFeature)) {
        let n = seq.len();
        for i in 0..n {
            for attr in seq.item(i) {
                let Some(&a) = self.attrs.get(&attr.name) else {
                    continue;
                };
                for y in 0..self.num_labels {
                    sink(
                        SegmentFeature::exact(self.attr_index(0, a, y), i, i + 1, y, attr.value)
                            .open_start()
                            .open_end(),
                    );
                    sink(
                        SegmentFeature::exact(self.attr_index(1, a, y), i, i + 1, y, attr.value)
                            .open_end(),
                    );
                    sink(
                        SegmentFeature::exact(self.attr_index(2, a, y), i, i + 1, y, attr.value)
                            .open_start(),
                    );
                }
            }
        }
        for s in 0..n {
            for l in 1..=self.max_gap.min(n - s) {
                for y in 0..self.num_labels {
                    sink(SegmentFeature::exact(self.len_index(l, y), s, s + l, y, 1.0));
                }
            }
        }
        for i in 1..n {
            for yp in 0..self.num_labels {
                for y in 0..self.num_labels {
                    sink(SegmentFeature::edge(self.edge_index(yp, y), i, yp, y, 1.0));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Corpus;

    fn tiny_corpus() -> Corpus {
        let mut corpus = Corpus::new();
        corpus
            .append_labeled(
                vec![vec!["a".into()], vec!["b".into()], vec!["a".into()]],
                &["X", "X", "Y"],
            )
            .unwrap();
        corpus
    }

    #[test]
    fn index_space_is_dense_and_disjoint() {
        let corpus = tiny_corpus();
        let gen = WindowFeatureGen::fit(&corpus, 2);
        let mut seen = vec![0usize; gen.num_features()];
        gen.emit(&corpus.sequences()[0], &mut |f| {
            assert!(f.index < gen.num_features(), "index out of range");
            seen[f.index] += 1;
        });
        // every feature index is used at least once on this corpus
        assert!(seen.iter().all(|&c| c > 0));
    }

    #[test]
    fn edge_features_carry_prev_label() {
        let corpus = tiny_corpus();
        let gen = WindowFeatureGen::fit(&corpus, 2);
        let mut edges = 0;
        gen.emit(&corpus.sequences()[0], &mut |f| {
            if let Some(yp) = f.prev_label {
                assert!(yp < 2);
                assert!(f.start >= 1);
                edges += 1;
            }
        });
        // two interior positions, 2x2 label pairs
        assert_eq!(edges, 8);
    }

    #[test]
    fn names_round_trip_families() {
        let corpus = tiny_corpus();
        let gen = WindowFeatureGen::fit(&corpus, 2);
        assert!(gen.feature_name(0).starts_with("token:"));
        assert!(gen
            .feature_name(gen.num_features() - 1)
            .starts_with("edge:"));
    }
}
