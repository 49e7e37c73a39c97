//! Sequences, segmentations and training corpora.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Dense label identifier, `0..num_labels`.
pub type Label = usize;

/// Tuple of attribute name and its value, observed at one sequence position.
///
/// This type is used both for training and for decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// Attribute name
    pub name: String,
    /// Value of the attribute
    pub value: f64,
}

impl Attribute {
    /// Create a new attribute with a name and value
    pub fn new<T: Into<String>>(name: T, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

impl From<String> for Attribute {
    fn from(name: String) -> Self {
        Self { name, value: 1.0 }
    }
}

impl From<&str> for Attribute {
    fn from(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: 1.0,
        }
    }
}

impl<S: Into<String>> From<(S, f64)> for Attribute {
    fn from((name, value): (S, f64)) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// A labeled segment `[start, end)` of a sequence. `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub start: usize,
    pub end: usize,
    pub label: Label,
}

impl Segment {
    pub fn new(start: usize, end: usize, label: Label) -> Self {
        Self { start, end, label }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// An ordered, gap-free, non-overlapping cover of `0..len` by labeled
/// segments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segmentation {
    segments: Vec<Segment>,
    // segment index owning each position
    seg_of: Vec<usize>,
}

impl Segmentation {
    /// Build from an explicit segment list covering `0..len`.
    pub fn from_segments(len: usize, mut segments: Vec<Segment>) -> Result<Self> {
        segments.sort_by_key(|s| s.start);
        let mut expect = 0usize;
        for seg in &segments {
            if seg.start != expect || seg.end <= seg.start {
                return Err(Error::InvalidSegmentation(format!(
                    "segment [{}, {}) does not continue the cover at {}",
                    seg.start, seg.end, expect
                )));
            }
            expect = seg.end;
        }
        if expect != len {
            return Err(Error::InvalidSegmentation(format!(
                "segments cover 0..{} but the sequence has length {}",
                expect, len
            )));
        }
        let mut seg_of = Vec::with_capacity(len);
        for (k, seg) in segments.iter().enumerate() {
            seg_of.extend(std::iter::repeat(k).take(seg.len()));
        }
        Ok(Self { segments, seg_of })
    }

    /// Build from per-position labels; maximal runs of equal labels become
    /// segments.
    pub fn from_labels(labels: &[Label]) -> Self {
        let mut segments = Vec::new();
        let mut start = 0;
        for i in 1..=labels.len() {
            if i == labels.len() || labels[i] != labels[start] {
                segments.push(Segment::new(start, i, labels[start]));
                start = i;
            }
        }
        let seg = Self::from_segments(labels.len(), segments);
        debug_assert!(seg.is_ok());
        seg.unwrap_or_default()
    }

    /// Append a segment continuing the cover at its current end.
    pub fn push(&mut self, seg: Segment) -> Result<()> {
        if seg.start != self.seg_of.len() || seg.end <= seg.start {
            return Err(Error::InvalidSegmentation(format!(
                "segment [{}, {}) does not continue the cover at {}",
                seg.start,
                seg.end,
                self.seg_of.len()
            )));
        }
        let k = self.segments.len();
        self.seg_of.extend(std::iter::repeat(k).take(seg.len()));
        self.segments.push(seg);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.seg_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seg_of.is_empty()
    }

    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    pub fn segment(&self, k: usize) -> Segment {
        self.segments[k]
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Index of the segment owning position `pos`.
    pub fn segment_index_at(&self, pos: usize) -> usize {
        self.seg_of[pos]
    }

    pub fn label_at(&self, pos: usize) -> Label {
        self.segments[self.seg_of[pos]].label
    }

    pub fn labels(&self) -> Vec<Label> {
        self.seg_of.iter().map(|&k| self.segments[k].label).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }
}

/// One observation sequence: per-position attribute lists plus a
/// segmentation carrying gold or predicted labels.
#[derive(Debug, Clone)]
pub struct DataSequence {
    items: Vec<Vec<Attribute>>,
    segmentation: Segmentation,
}

impl DataSequence {
    pub fn new(items: Vec<Vec<Attribute>>, segmentation: Segmentation) -> Result<Self> {
        if items.is_empty() {
            return Err(Error::invalid_input("empty sequence"));
        }
        if items.len() != segmentation.len() {
            return Err(Error::invalid_input(format!(
                "sequence has {} items but segmentation covers {}",
                items.len(),
                segmentation.len()
            )));
        }
        Ok(Self {
            items,
            segmentation,
        })
    }

    /// A sequence awaiting decoding; labels start out as a single segment
    /// of label 0 and are overwritten by the decoder.
    pub fn unlabeled(items: Vec<Vec<Attribute>>) -> Result<Self> {
        let n = items.len();
        if n == 0 {
            return Err(Error::invalid_input("empty sequence"));
        }
        let segmentation = Segmentation::from_segments(n, vec![Segment::new(0, n, 0)])?;
        Ok(Self {
            items,
            segmentation,
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item(&self, i: usize) -> &[Attribute] {
        &self.items[i]
    }

    pub fn label(&self, i: usize) -> Label {
        self.segmentation.label_at(i)
    }

    pub fn segmentation(&self) -> &Segmentation {
        &self.segmentation
    }

    /// Replace the segmentation, e.g. with a decoder output.
    pub fn set_segmentation(&mut self, segmentation: Segmentation) -> Result<()> {
        if segmentation.len() != self.len() {
            return Err(Error::invalid_input(format!(
                "segmentation covers {} positions, sequence has {}",
                segmentation.len(),
                self.len()
            )));
        }
        self.segmentation = segmentation;
        Ok(())
    }
}

/// A bidirectional dictionary mapping label names to dense ids.
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    str_to_id: HashMap<String, usize>,
    id_to_str: Vec<String>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.id_to_str.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_str.is_empty()
    }

    /// Get or create an id for a string.
    pub fn get_or_insert(&mut self, s: &str) -> usize {
        if let Some(&id) = self.str_to_id.get(s) {
            id
        } else {
            let id = self.id_to_str.len();
            self.str_to_id.insert(s.to_string(), id);
            self.id_to_str.push(s.to_string());
            id
        }
    }

    pub fn get(&self, s: &str) -> Option<usize> {
        self.str_to_id.get(s).copied()
    }

    pub fn name(&self, id: usize) -> Option<&str> {
        self.id_to_str.get(id).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> + '_ {
        self.id_to_str
            .iter()
            .enumerate()
            .map(|(id, s)| (s.as_str(), id))
    }
}

/// A training corpus: validated sequences plus the label dictionary shared
/// by all of them.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    sequences: Vec<DataSequence>,
    labels: Dictionary,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sequence given segment boundaries with named labels.
    pub fn append<I, S>(&mut self, items: Vec<Vec<Attribute>>, segments: I) -> Result<()>
    where
        I: IntoIterator<Item = (usize, usize, S)>,
        S: AsRef<str>,
    {
        let len = items.len();
        let segs: Vec<Segment> = segments
            .into_iter()
            .map(|(start, end, name)| {
                Segment::new(start, end, self.labels.get_or_insert(name.as_ref()))
            })
            .collect();
        let segmentation = Segmentation::from_segments(len, segs)?;
        self.sequences.push(DataSequence::new(items, segmentation)?);
        Ok(())
    }

    /// Append a sequence labeled per position; runs of equal labels become
    /// segments.
    pub fn append_labeled(&mut self, items: Vec<Vec<Attribute>>, labels: &[&str]) -> Result<()> {
        if items.len() != labels.len() {
            return Err(Error::invalid_input(format!(
                "sequence has {} items but {} labels",
                items.len(),
                labels.len()
            )));
        }
        let ids: Vec<Label> = labels.iter().map(|l| self.labels.get_or_insert(l)).collect();
        let segmentation = Segmentation::from_labels(&ids);
        self.sequences.push(DataSequence::new(items, segmentation)?);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn sequences(&self) -> &[DataSequence] {
        &self.sequences
    }

    pub fn sequences_mut(&mut self) -> &mut [DataSequence] {
        &mut self.sequences
    }

    pub fn num_labels(&self) -> usize {
        self.labels.len()
    }

    pub fn labels(&self) -> &Dictionary {
        &self.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segmentation_rejects_gaps_and_overlaps() {
        assert!(Segmentation::from_segments(
            4,
            vec![Segment::new(0, 2, 0), Segment::new(3, 4, 1)]
        )
        .is_err());
        assert!(Segmentation::from_segments(
            4,
            vec![Segment::new(0, 3, 0), Segment::new(2, 4, 1)]
        )
        .is_err());
        assert!(Segmentation::from_segments(3, vec![Segment::new(0, 2, 0)]).is_err());
    }

    #[test]
    fn segmentation_from_labels_builds_runs() {
        let seg = Segmentation::from_labels(&[0, 0, 1, 1, 1, 0]);
        assert_eq!(seg.num_segments(), 3);
        assert_eq!(seg.segment(1), Segment::new(2, 5, 1));
        assert_eq!(seg.segment_index_at(4), 1);
        assert_eq!(seg.label_at(5), 0);
    }

    #[test]
    fn push_extends_the_cover_in_order() {
        let mut seg = Segmentation::default();
        seg.push(Segment::new(0, 2, 1)).unwrap();
        seg.push(Segment::new(2, 3, 0)).unwrap();
        assert!(seg.push(Segment::new(4, 5, 0)).is_err());
        assert!(seg.push(Segment::new(3, 3, 0)).is_err());
        assert_eq!(seg.len(), 3);
        assert_eq!(seg.labels(), vec![1, 1, 0]);
    }

    #[test]
    fn corpus_append_validates() {
        let mut corpus = Corpus::new();
        let empty: Vec<(usize, usize, &str)> = vec![];
        assert!(corpus.append(vec![], empty).is_err());
        corpus
            .append(
                vec![vec!["a".into()], vec!["b".into()], vec!["c".into()]],
                vec![(0, 2, "X"), (2, 3, "Y")],
            )
            .unwrap();
        assert_eq!(corpus.num_labels(), 2);
        assert_eq!(corpus.sequences()[0].label(1), 0);
        assert_eq!(corpus.sequences()[0].label(2), 1);
    }

    #[test]
    fn append_labeled_mismatch_is_rejected() {
        let mut corpus = Corpus::new();
        let items = vec![vec![Attribute::from("a")], vec![Attribute::from("b")]];
        assert!(corpus.append_labeled(items, &["X"]).is_err());
    }
}
