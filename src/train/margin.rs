//! Averaged max-margin training.
//!
//! Each update decodes the most violating segmentation with the
//! loss-augmented beam search and moves the weights toward the gold
//! feature counts and away from the predicted ones. Updates are averaged
//! over the whole run, which is what makes the perceptron stable enough
//! to use as a drop-in alternative to likelihood training.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::forward_backward::{observed_counts, segmentation_score};
use super::{MaxMargin, TrainOutcome, TrainStatus, Trainer, TrainingAlgorithm};
use crate::dataset::Corpus;
use crate::error::{Error, Result};
use crate::feature::FeatureGenerator;
use crate::viterbi::SegmentDecoder;

/// Max-margin training parameters.
#[derive(Debug, Clone)]
pub struct MarginParams {
    max_iterations: usize,
    beam: usize,
    shuffle_seed: Option<u64>,
}

impl Default for MarginParams {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            beam: 1,
            shuffle_seed: None,
        }
    }
}

impl MarginParams {
    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn set_max_iterations(&mut self, max_iterations: usize) -> Result<()> {
        if max_iterations < 1 {
            return Err(Error::invalid_input("max_iterations must be at least 1"));
        }
        self.max_iterations = max_iterations;
        Ok(())
    }

    pub fn beam(&self) -> usize {
        self.beam
    }

    pub fn set_beam(&mut self, beam: usize) -> Result<()> {
        if beam == 0 {
            return Err(Error::invalid_input("beam must be at least 1"));
        }
        self.beam = beam;
        Ok(())
    }

    pub fn shuffle_seed(&self) -> Option<u64> {
        self.shuffle_seed
    }

    pub fn set_shuffle_seed(&mut self, seed: Option<u64>) {
        self.shuffle_seed = seed;
    }
}

impl TrainingAlgorithm for MaxMargin {
    type Params = MarginParams;

    fn train<G: FeatureGenerator>(
        trainer: &mut Trainer<Self>,
        corpus: &Corpus,
        fgen: &G,
    ) -> Result<TrainOutcome> {
        trainer.train_max_margin(corpus, fgen)
    }
}

impl Trainer<MaxMargin> {
    fn train_max_margin<G: FeatureGenerator>(
        &mut self,
        corpus: &Corpus,
        fgen: &G,
    ) -> Result<TrainOutcome> {
        let num_features = fgen.num_features();
        let num_labels = corpus.num_labels();
        let max_iterations = self.params.max_iterations();

        let mut weights = vec![0.0; num_features];
        let mut summed = vec![0.0; num_features];
        let mut c = 1.0;
        let mut gold_counts = vec![0.0; num_features];
        let mut pred_counts = vec![0.0; num_features];
        let mut decoder = SegmentDecoder::new(self.params.beam(), false);
        let mut order: Vec<usize> = (0..corpus.len()).collect();
        let mut rng = match self.params.shuffle_seed() {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut status = TrainStatus::MaxIterations;
        let mut iterations = 0;
        let mut last_loss = 0.0;

        'epochs: for epoch in 0..max_iterations {
            let mut updates = 0usize;
            let mut loss = 0.0;
            if order.len() > 1 {
                order.shuffle(&mut rng);
            }
            for &idx in &order {
                if self.cancel.is_cancelled() {
                    status = TrainStatus::Cancelled;
                    break 'epochs;
                }
                let seq = &corpus.sequences()[idx];
                decoder.search(seq, fgen, &weights, num_labels, true)?;
                let (augmented_score, predicted) = decoder.best()?;
                if &predicted != seq.segmentation() {
                    let store = decoder.store();
                    gold_counts.iter_mut().for_each(|v| *v = 0.0);
                    pred_counts.iter_mut().for_each(|v| *v = 0.0);
                    observed_counts(store, seq.segmentation(), &mut gold_counts);
                    observed_counts(store, &predicted, &mut pred_counts);
                    for fi in 0..num_features {
                        let delta = gold_counts[fi] - pred_counts[fi];
                        if delta != 0.0 {
                            weights[fi] += delta;
                            summed[fi] += c * delta;
                        }
                    }
                    let gold_score = segmentation_score(store, seq.segmentation());
                    loss += (augmented_score - gold_score).max(0.0);
                    updates += 1;
                }
                c += 1.0;
            }
            iterations = epoch + 1;
            last_loss = loss;
            tracing::info!(epoch = epoch + 1, updates, loss, "margin epoch");
            if updates == 0 {
                status = TrainStatus::Converged;
                break;
            }
        }

        for fi in 0..num_features {
            weights[fi] -= summed[fi] / c;
        }

        Ok(TrainOutcome {
            weights,
            status,
            iterations,
            loss: last_loss,
        })
    }
}
