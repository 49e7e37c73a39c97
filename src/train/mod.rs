//! Training algorithms.
//!
//! The trainer is parameterized by an algorithm marker selecting both the
//! parameter set and the optimization loop: [`Lbfgs`] maximizes the
//! penalized log-likelihood with exact expectations, [`MaxMargin`] runs an
//! averaged perceptron against the loss-augmented decoder.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::dataset::Corpus;
use crate::error::{Error, Result};
use crate::feature::FeatureGenerator;

pub(crate) mod forward_backward;
mod lbfgs;
mod margin;

pub use self::lbfgs::LbfgsParams;
pub use self::margin::MarginParams;

/// Cooperative cancellation handle. Workers check it between sequences;
/// a cancelled run returns its current weights with
/// [`TrainStatus::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// How a training run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainStatus {
    Converged,
    /// The iteration budget ran out first. The returned weights are still
    /// usable.
    MaxIterations,
    Cancelled,
}

/// Result of a training run.
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub weights: Vec<f64>,
    pub status: TrainStatus,
    pub iterations: usize,
    /// Final objective value: penalized negative log-likelihood for
    /// [`Lbfgs`], summed margin violation for [`MaxMargin`].
    pub loss: f64,
}

/// Training algorithm marker for L-BFGS maximum likelihood.
#[derive(Debug, Clone, Copy)]
pub struct Lbfgs;

/// Training algorithm marker for the averaged max-margin perceptron.
#[derive(Debug, Clone, Copy)]
pub struct MaxMargin;

/// Training algorithm interface.
pub trait TrainingAlgorithm {
    type Params: Default + std::fmt::Debug;

    fn train<G: FeatureGenerator>(
        trainer: &mut Trainer<Self>,
        corpus: &Corpus,
        fgen: &G,
    ) -> Result<TrainOutcome>
    where
        Self: Sized;
}

/// Semi-Markov CRF trainer.
#[derive(Debug)]
pub struct Trainer<A: TrainingAlgorithm> {
    params: A::Params,
    cancel: CancelToken,
}

impl<A: TrainingAlgorithm> Default for Trainer<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: TrainingAlgorithm> Trainer<A> {
    pub fn new() -> Self {
        Self {
            params: A::Params::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn params(&self) -> &A::Params {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut A::Params {
        &mut self.params
    }

    /// Handle for cancelling this trainer from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Train on `corpus` with the features of `fgen`.
    pub fn train<G: FeatureGenerator>(
        &mut self,
        corpus: &Corpus,
        fgen: &G,
    ) -> Result<TrainOutcome> {
        if corpus.is_empty() {
            return Err(Error::invalid_input("no training sequences"));
        }
        if corpus.num_labels() == 0 {
            return Err(Error::invalid_input("corpus defines no labels"));
        }
        if fgen.num_features() == 0 {
            return Err(Error::invalid_input(
                "feature generator declares no features",
            ));
        }
        if fgen.max_boundary_gap() == 0 {
            return Err(Error::invalid_input("max_boundary_gap must be at least 1"));
        }
        A::train(self, corpus, fgen)
    }
}
