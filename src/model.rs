//! Trained models: configuration, decoding entry points, persistence.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::baselines::{Cmm, CmmParams, Hmm, HmmParams, SequenceClassifier};
use crate::dataset::{Corpus, DataSequence, Segmentation};
use crate::error::{Error, Result};
use crate::feature::{FeatureGenerator, WindowFeatureGen};
use crate::store::FeatureStore;
use crate::train::forward_backward::{segmentation_score, SumProductScratch};
use crate::train::{Lbfgs, TrainOutcome, Trainer, TrainingAlgorithm};
use crate::viterbi::SegmentDecoder;

/// Dependency structure of the label process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModelGraph {
    /// Segments of arbitrary length.
    #[default]
    SemiMarkov,
    /// Segment length capped at one position: an ordinary chain CRF over
    /// the same feature space.
    Markov,
}

/// Configuration of a [`SegmentCrf`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentCrfConfig {
    num_labels: usize,
    beam_size: usize,
    graph: ModelGraph,
}

impl SegmentCrfConfig {
    pub fn new(num_labels: usize) -> Result<Self> {
        if num_labels == 0 {
            return Err(Error::invalid_input("num_labels must be at least 1"));
        }
        Ok(Self {
            num_labels,
            beam_size: 1,
            graph: ModelGraph::default(),
        })
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    pub fn beam_size(&self) -> usize {
        self.beam_size
    }

    pub fn set_beam_size(&mut self, beam_size: usize) -> Result<()> {
        if beam_size == 0 {
            return Err(Error::invalid_input("beam_size must be at least 1"));
        }
        self.beam_size = beam_size;
        Ok(())
    }

    pub fn graph(&self) -> ModelGraph {
        self.graph
    }

    pub fn set_graph(&mut self, graph: ModelGraph) {
        self.graph = graph;
    }
}

/// A semi-Markov CRF over segment features: a generator, a weight vector
/// and the decoding configuration.
#[derive(Debug, Clone)]
pub struct SegmentCrf<F: FeatureGenerator> {
    fgen: F,
    config: SegmentCrfConfig,
    weights: Vec<f64>,
}

#[derive(Serialize, Deserialize)]
struct ModelFile {
    config: SegmentCrfConfig,
    num_features: usize,
    weights: Vec<f64>,
}

impl<F: FeatureGenerator> SegmentCrf<F> {
    pub fn new(fgen: F, config: SegmentCrfConfig) -> Result<Self> {
        if fgen.num_features() == 0 {
            return Err(Error::invalid_input(
                "feature generator declares no features",
            ));
        }
        if fgen.max_boundary_gap() == 0 {
            return Err(Error::invalid_input("max_boundary_gap must be at least 1"));
        }
        let weights = vec![0.0; fgen.num_features()];
        Ok(Self {
            fgen,
            config,
            weights,
        })
    }

    pub fn config(&self) -> &SegmentCrfConfig {
        &self.config
    }

    pub fn feature_generator(&self) -> &F {
        &self.fgen
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn set_weights(&mut self, weights: Vec<f64>) -> Result<()> {
        if weights.len() != self.fgen.num_features() {
            return Err(Error::invalid_input(format!(
                "weight vector has {} entries, generator declares {} features",
                weights.len(),
                self.fgen.num_features()
            )));
        }
        self.weights = weights;
        Ok(())
    }

    /// Train on `corpus`, storing the learned weights in the model. The
    /// outcome carries the convergence status and the final weights.
    pub fn train<A: TrainingAlgorithm>(
        &mut self,
        corpus: &Corpus,
        trainer: &mut Trainer<A>,
    ) -> Result<TrainOutcome> {
        if corpus.num_labels() != self.config.num_labels {
            return Err(Error::invalid_input(format!(
                "corpus defines {} labels, model is configured for {}",
                corpus.num_labels(),
                self.config.num_labels
            )));
        }
        let outcome = trainer.train(corpus, &self.fgen)?;
        self.weights = outcome.weights.clone();
        Ok(outcome)
    }

    fn decoder(&self, beam: usize) -> SegmentDecoder {
        SegmentDecoder::new(beam, self.config.graph == ModelGraph::Markov)
    }

    /// Decode the best segmentation into `seq` and return its score.
    pub fn decode(&self, seq: &mut DataSequence) -> Result<f64> {
        let mut decoder = self.decoder(self.config.beam_size);
        decoder.search(seq, &self.fgen, &self.weights, self.config.num_labels, false)?;
        let (score, seg) = decoder.best()?;
        seq.set_segmentation(seg)?;
        Ok(score)
    }

    /// The `k` best segmentations with their scores, best first.
    pub fn decode_top_k(&self, seq: &DataSequence, k: usize) -> Result<Vec<(f64, Segmentation)>> {
        if k == 0 {
            return Err(Error::invalid_input("k must be at least 1"));
        }
        let mut decoder = self.decoder(self.config.beam_size.max(k));
        decoder.search(seq, &self.fgen, &self.weights, self.config.num_labels, false)?;
        let available = decoder.num_solutions().min(k);
        Ok((0..available).filter_map(|rank| decoder.nth(rank)).collect())
    }

    /// Most violating segmentation against `seq`'s gold labels: the best
    /// segmentation under the loss-augmented potentials, with its
    /// augmented score. The margin trainer's inner oracle.
    pub fn decode_augmented(&self, seq: &DataSequence) -> Result<(f64, Segmentation)> {
        let mut decoder = self.decoder(self.config.beam_size);
        decoder.search(seq, &self.fgen, &self.weights, self.config.num_labels, true)?;
        decoder.best()
    }

    /// Log partition function over all segmentations of `seq`.
    pub fn log_z(&self, seq: &DataSequence) -> Result<f64> {
        let mut store = FeatureStore::new();
        store.init(seq, &self.fgen, &self.weights, self.config.num_labels)?;
        let mut scratch = SumProductScratch::new();
        scratch.sum_product(&store, false)
    }

    /// Log potential of `seq`'s current segmentation.
    pub fn score(&self, seq: &DataSequence) -> Result<f64> {
        let mut store = FeatureStore::new();
        store.init(seq, &self.fgen, &self.weights, self.config.num_labels)?;
        Ok(segmentation_score(&store, seq.segmentation()))
    }

    /// Expected count of every feature under the model distribution over
    /// segmentations of `seq`.
    pub fn feature_expectations(&self, seq: &DataSequence) -> Result<Vec<f64>> {
        let mut store = FeatureStore::new();
        store.init(seq, &self.fgen, &self.weights, self.config.num_labels)?;
        let mut scratch = SumProductScratch::new();
        let log_z = scratch.sum_product(&store, true)?;
        Ok(scratch
            .exp_f
            .iter()
            .map(|&e| crate::math::exp_clip(e - log_z))
            .collect())
    }

    /// Save configuration and weights as JSON. The feature generator is
    /// not serialized; loading requires an equivalent one.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = ModelFile {
            config: self.config.clone(),
            num_features: self.fgen.num_features(),
            weights: self.weights.clone(),
        };
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, &file)?;
        Ok(())
    }

    /// Load a model saved with [`save`](Self::save), pairing it with a
    /// generator declaring the same feature space.
    pub fn load<P: AsRef<Path>>(fgen: F, path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let file: ModelFile = serde_json::from_reader(reader)?;
        if file.num_features != fgen.num_features() {
            return Err(Error::invalid_input(format!(
                "model was saved with {} features, generator declares {}",
                file.num_features,
                fgen.num_features()
            )));
        }
        if file.weights.len() != file.num_features {
            return Err(Error::invalid_input(
                "model file weight vector does not match its feature count",
            ));
        }
        Ok(Self {
            fgen,
            config: file.config,
            weights: file.weights,
        })
    }
}

impl<F: FeatureGenerator> SequenceClassifier for SegmentCrf<F> {
    fn classify(&self, seq: &mut DataSequence) -> Result<()> {
        self.decode(seq).map(|_| ())
    }
}

/// Which model family to train.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    SegmentCrf,
    Cmm,
    Hmm,
}

const DEFAULT_BOUNDARY_GAP: usize = 4;

impl ModelKind {
    /// Train a classifier of this kind on `corpus` with default settings.
    pub fn train(self, corpus: &Corpus) -> Result<Box<dyn SequenceClassifier>> {
        match self {
            ModelKind::SegmentCrf => {
                let fgen = WindowFeatureGen::fit(corpus, DEFAULT_BOUNDARY_GAP);
                let config = SegmentCrfConfig::new(corpus.num_labels())?;
                let mut model = SegmentCrf::new(fgen, config)?;
                let mut trainer = Trainer::<Lbfgs>::new();
                model.train(corpus, &mut trainer)?;
                Ok(Box::new(model))
            }
            ModelKind::Cmm => Ok(Box::new(Cmm::train(corpus, &CmmParams::default())?)),
            ModelKind::Hmm => Ok(Box::new(Hmm::train(corpus, &HmmParams::default())?)),
        }
    }
}
