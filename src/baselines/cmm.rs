//! Conditional Markov model baseline.
//!
//! A per-position multiclass logistic classifier over the position's
//! attributes plus the previous label, trained with SGD on the gold
//! history and decoded greedily left to right.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::SequenceClassifier;
use crate::dataset::{Attribute, Corpus, DataSequence, Dictionary, Label, Segmentation};
use crate::error::{Error, Result};

/// CMM training parameters.
#[derive(Debug, Clone)]
pub struct CmmParams {
    epochs: usize,
    learning_rate: f64,
    l2: f64,
    shuffle_seed: Option<u64>,
}

impl Default for CmmParams {
    fn default() -> Self {
        Self {
            epochs: 50,
            learning_rate: 0.1,
            l2: 1e-4,
            shuffle_seed: None,
        }
    }
}

impl CmmParams {
    pub fn epochs(&self) -> usize {
        self.epochs
    }

    pub fn set_epochs(&mut self, epochs: usize) -> Result<()> {
        if epochs == 0 {
            return Err(Error::invalid_input("epochs must be at least 1"));
        }
        self.epochs = epochs;
        Ok(())
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) -> Result<()> {
        if !(learning_rate > 0.0) {
            return Err(Error::invalid_input("learning_rate must be positive"));
        }
        self.learning_rate = learning_rate;
        Ok(())
    }

    pub fn l2(&self) -> f64 {
        self.l2
    }

    pub fn set_l2(&mut self, l2: f64) -> Result<()> {
        if l2 < 0.0 {
            return Err(Error::invalid_input("l2 must be non-negative"));
        }
        self.l2 = l2;
        Ok(())
    }

    pub fn shuffle_seed(&self) -> Option<u64> {
        self.shuffle_seed
    }

    pub fn set_shuffle_seed(&mut self, seed: Option<u64>) {
        self.shuffle_seed = seed;
    }
}

/// Trained conditional Markov model.
///
/// Feature ids: 0 is the bias, then one per attribute name, then one per
/// previous label, then a begin-of-sequence marker. The weight of feature
/// `f` for label `y` sits at `f * num_labels + y`.
#[derive(Debug, Clone)]
pub struct Cmm {
    attrs: Dictionary,
    num_labels: usize,
    weights: Vec<f64>,
}

impl Cmm {
    /// Train on a labeled corpus.
    pub fn train(corpus: &Corpus, params: &CmmParams) -> Result<Self> {
        if corpus.is_empty() {
            return Err(Error::invalid_input("no training sequences"));
        }
        let num_labels = corpus.num_labels();
        if num_labels == 0 {
            return Err(Error::invalid_input("corpus defines no labels"));
        }

        let mut attrs = Dictionary::new();
        for seq in corpus.sequences() {
            for i in 0..seq.len() {
                for attr in seq.item(i) {
                    attrs.get_or_insert(&attr.name);
                }
            }
        }

        let mut model = Self {
            num_labels,
            weights: vec![0.0; (attrs.len() + num_labels + 2) * num_labels],
            attrs,
        };

        let mut positions: Vec<(usize, usize)> = corpus
            .sequences()
            .iter()
            .enumerate()
            .flat_map(|(si, seq)| (0..seq.len()).map(move |i| (si, i)))
            .collect();
        let mut rng = match params.shuffle_seed() {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut probs = vec![0.0; num_labels];
        for epoch in 0..params.epochs() {
            positions.shuffle(&mut rng);
            let lr = params.learning_rate() / (1.0 + epoch as f64);
            let mut loss = 0.0;
            for &(si, i) in &positions {
                let seq = &corpus.sequences()[si];
                let prev = (i > 0).then(|| seq.label(i - 1));
                let gold = seq.label(i);
                model.scores(seq.item(i), prev, &mut probs);
                softmax_in_place(&mut probs);
                loss -= probs[gold].max(f64::MIN_POSITIVE).ln();
                for y in 0..num_labels {
                    let g = probs[y] - if y == gold { 1.0 } else { 0.0 };
                    model.update(seq.item(i), prev, y, -lr * g, lr * params.l2());
                }
            }
            tracing::debug!(epoch = epoch + 1, loss, "cmm epoch");
        }
        Ok(model)
    }

    fn bias_id(&self) -> usize {
        0
    }

    fn attr_id(&self, a: usize) -> usize {
        1 + a
    }

    fn prev_id(&self, yp: Option<Label>) -> usize {
        match yp {
            Some(yp) => 1 + self.attrs.len() + yp,
            None => 1 + self.attrs.len() + self.num_labels,
        }
    }

    /// Unnormalized per-label scores for one position.
    fn scores(&self, item: &[Attribute], prev: Option<Label>, out: &mut [f64]) {
        let k = self.num_labels;
        for y in 0..k {
            out[y] = self.weights[self.bias_id() * k + y] + self.weights[self.prev_id(prev) * k + y];
        }
        for attr in item {
            let Some(a) = self.attrs.get(&attr.name) else {
                continue;
            };
            for y in 0..k {
                out[y] += attr.value * self.weights[self.attr_id(a) * k + y];
            }
        }
    }

    fn update(&mut self, item: &[Attribute], prev: Option<Label>, y: Label, step: f64, decay: f64) {
        let k = self.num_labels;
        let ids = [self.bias_id(), self.prev_id(prev)];
        for id in ids {
            let w = &mut self.weights[id * k + y];
            *w += step - decay * *w;
        }
        for attr in item {
            let Some(a) = self.attrs.get(&attr.name) else {
                continue;
            };
            let idx = self.attr_id(a) * k + y;
            let w = &mut self.weights[idx];
            *w += step * attr.value - decay * *w;
        }
    }
}

impl SequenceClassifier for Cmm {
    fn classify(&self, seq: &mut DataSequence) -> Result<()> {
        let mut scores = vec![0.0; self.num_labels];
        let mut labels = Vec::with_capacity(seq.len());
        let mut prev = None;
        for i in 0..seq.len() {
            self.scores(seq.item(i), prev, &mut scores);
            let best = scores
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(y, _)| y)
                .ok_or_else(|| Error::invalid_input("classifier has no labels"))?;
            labels.push(best);
            prev = Some(best);
        }
        seq.set_segmentation(Segmentation::from_labels(&labels))
    }
}

fn softmax_in_place(scores: &mut [f64]) {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut total = 0.0;
    for s in scores.iter_mut() {
        *s = (*s - max).exp();
        total += *s;
    }
    for s in scores.iter_mut() {
        *s /= total;
    }
}
