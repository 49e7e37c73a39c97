//! Penalized maximum-likelihood training with L-BFGS.
//!
//! Each objective evaluation fans the corpus out over a rayon pool. Every
//! worker owns its inference scratch; per-sequence feature stores are
//! either rebuilt per evaluation or, with caching enabled, kept indexed
//! across iterations and only re-weighted.

use rayon::prelude::*;

use super::forward_backward::{observed_counts, SumProductScratch};
use super::{Lbfgs, TrainOutcome, TrainStatus, Trainer, TrainingAlgorithm};
use crate::dataset::{Corpus, DataSequence};
use crate::error::{Error, Result};
use crate::feature::FeatureGenerator;
use crate::math::exp_clip;
use crate::store::FeatureStore;

/// L-BFGS training parameters.
#[derive(Debug, Clone)]
pub struct LbfgsParams {
    sigma: f64,
    c1: f64,
    max_iterations: usize,
    epsilon: f64,
    period: usize,
    delta: f64,
    max_linesearch: usize,
    cache_feature_stores: bool,
}

impl Default for LbfgsParams {
    fn default() -> Self {
        Self {
            sigma: 10.0,
            c1: 0.0,
            max_iterations: 100,
            epsilon: 1e-5,
            period: 10,
            delta: 1e-5,
            max_linesearch: 20,
            cache_feature_stores: true,
        }
    }
}

impl LbfgsParams {
    /// Standard deviation of the Gaussian prior on the weights.
    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    pub fn set_sigma(&mut self, sigma: f64) -> Result<()> {
        if !(sigma > 0.0) {
            return Err(Error::invalid_input("sigma must be positive"));
        }
        self.sigma = sigma;
        Ok(())
    }

    /// L1 penalty coefficient; a positive value switches the optimizer to
    /// OWL-QN.
    pub fn c1(&self) -> f64 {
        self.c1
    }

    pub fn set_c1(&mut self, c1: f64) -> Result<()> {
        if c1 < 0.0 {
            return Err(Error::invalid_input("c1 must be non-negative"));
        }
        self.c1 = c1;
        Ok(())
    }

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

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn set_epsilon(&mut self, epsilon: f64) -> Result<()> {
        if epsilon < 0.0 {
            return Err(Error::invalid_input("epsilon must be non-negative"));
        }
        self.epsilon = epsilon;
        Ok(())
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Period of the objective-delta convergence test; 0 disables it.
    pub fn set_period(&mut self, period: usize) {
        self.period = period;
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    pub fn set_delta(&mut self, delta: f64) -> Result<()> {
        if delta < 0.0 {
            return Err(Error::invalid_input("delta must be non-negative"));
        }
        self.delta = delta;
        Ok(())
    }

    pub fn max_linesearch(&self) -> usize {
        self.max_linesearch
    }

    pub fn set_max_linesearch(&mut self, max_linesearch: usize) -> Result<()> {
        if max_linesearch == 0 {
            return Err(Error::invalid_input("max_linesearch must be positive"));
        }
        self.max_linesearch = max_linesearch;
        Ok(())
    }

    /// Keep per-sequence feature stores indexed across iterations, trading
    /// memory for the cost of re-scanning the generators.
    pub fn cache_feature_stores(&self) -> bool {
        self.cache_feature_stores
    }

    pub fn set_cache_feature_stores(&mut self, cache: bool) {
        self.cache_feature_stores = cache;
    }
}

impl TrainingAlgorithm for Lbfgs {
    type Params = LbfgsParams;

    fn train<G: FeatureGenerator>(
        trainer: &mut Trainer<Self>,
        corpus: &Corpus,
        fgen: &G,
    ) -> Result<TrainOutcome> {
        trainer.train_lbfgs(corpus, fgen)
    }
}

/// Per-worker accumulator for one objective evaluation.
struct Accum {
    scratch: SumProductScratch,
    // negated expectation sums; observed counts are added by the driver
    grad: Vec<f64>,
    observed: Option<Vec<f64>>,
    log_likelihood: f64,
}

impl Accum {
    fn new(num_features: usize, with_observed: bool) -> Self {
        Self {
            scratch: SumProductScratch::new(),
            grad: vec![0.0; num_features],
            observed: with_observed.then(|| vec![0.0; num_features]),
            log_likelihood: 0.0,
        }
    }

    fn add_sequence(&mut self, store: &FeatureStore, seq: &DataSequence) -> Result<()> {
        let log_z = self.scratch.sum_product(store, true)?;
        for (g, &e) in self.grad.iter_mut().zip(self.scratch.exp_f.iter()) {
            *g -= exp_clip(e - log_z);
        }
        self.log_likelihood -= log_z;
        if let Some(obs) = self.observed.as_deref_mut() {
            observed_counts(store, seq.segmentation(), obs);
        }
        Ok(())
    }

    fn merge(mut self, other: Accum) -> Accum {
        for (a, b) in self.grad.iter_mut().zip(other.grad.iter()) {
            *a += b;
        }
        if let (Some(a), Some(b)) = (self.observed.as_deref_mut(), other.observed.as_deref()) {
            for (x, y) in a.iter_mut().zip(b.iter()) {
                *x += y;
            }
        }
        self.log_likelihood += other.log_likelihood;
        self
    }
}

impl Trainer<Lbfgs> {
    fn train_lbfgs<G: FeatureGenerator>(
        &mut self,
        corpus: &Corpus,
        fgen: &G,
    ) -> Result<TrainOutcome> {
        let num_features = fgen.num_features();
        let num_labels = corpus.num_labels();
        let inv_sigma_sq = 1.0 / (self.params.sigma() * self.params.sigma());
        let cache = self.params.cache_feature_stores();
        let cancel = self.cancel.clone();

        let mut weights = vec![0.0; num_features];
        let mut stores: Vec<Option<FeatureStore>> = (0..corpus.len()).map(|_| None).collect();
        // gold feature counts are weight-independent, computed once
        let mut observed: Option<Vec<f64>> = None;
        let mut last_loss = f64::INFINITY;
        let mut failure: Option<Error> = None;
        let mut iterations = 0usize;

        let mut body = |x: &[f64], gx: &mut [f64]| -> Result<f64> {
            let first_call = observed.is_none();
            let reduced = corpus
                .sequences()
                .par_iter()
                .enumerate()
                .zip(stores.par_iter_mut())
                .try_fold(
                    || (Accum::new(num_features, first_call), FeatureStore::new()),
                    |(mut acc, mut local_store), ((si, seq), slot)| -> Result<(Accum, FeatureStore)> {
                        if cancel.is_cancelled() {
                            return Err(Error::Cancelled);
                        }
                        let added = if cache {
                            let store = slot.get_or_insert_with(FeatureStore::new);
                            if store.num_features() == num_features {
                                store.set_weights(x)?;
                            } else {
                                store.init(seq, fgen, x, num_labels)?;
                            }
                            acc.add_sequence(store, seq)
                        } else {
                            local_store.init(seq, fgen, x, num_labels)?;
                            acc.add_sequence(&local_store, seq)
                        };
                        added.map_err(|e| match e {
                            Error::Numerical(msg) => {
                                Error::Numerical(format!("sequence {}: {}", si, msg))
                            }
                            other => other,
                        })?;
                        Ok((acc, local_store))
                    },
                )
                .map(|r| r.map(|(acc, _)| acc))
                .try_reduce(|| Accum::new(num_features, first_call), |a, b| Ok(a.merge(b)));
            let acc = reduced?;

            if observed.is_none() {
                observed = acc.observed;
            }
            let obs = observed
                .as_deref()
                .ok_or_else(|| Error::Numerical("observed feature counts missing".into()))?;
            let mut log_likelihood = acc.log_likelihood;
            for fi in 0..num_features {
                log_likelihood += obs[fi] * x[fi];
                log_likelihood -= x[fi] * x[fi] * inv_sigma_sq / 2.0;
                let g = acc.grad[fi] + obs[fi] - x[fi] * inv_sigma_sq;
                gx[fi] = -g;
            }
            if !log_likelihood.is_finite() {
                return Err(Error::Numerical(format!(
                    "log-likelihood became {} during optimization",
                    log_likelihood
                )));
            }
            last_loss = -log_likelihood;
            Ok(-log_likelihood)
        };

        let evaluate = |x: &[f64], gx: &mut [f64]| -> std::result::Result<f64, anyhow::Error> {
            body(x, gx).map_err(|e| {
                let msg = e.to_string();
                failure = Some(e);
                anyhow::anyhow!(msg)
            })
        };

        let progress = |prgr: &liblbfgs::Progress| -> bool {
            iterations = prgr.niter;
            tracing::info!(
                iteration = prgr.niter,
                loss = prgr.fx,
                gnorm = prgr.gnorm,
                "lbfgs iteration"
            );
            false
        };

        let mut optimizer = liblbfgs::lbfgs()
            .with_max_iterations(self.params.max_iterations())
            .with_epsilon(self.params.epsilon())
            .with_fx_delta(self.params.delta(), self.params.period())
            .with_max_linesearch(self.params.max_linesearch());
        if self.params.c1() > 0.0 {
            // OWL-QN only supports backtracking line search
            optimizer = optimizer
                .with_linesearch_algorithm("BacktrackingStrongWolfe")
                .with_orthantwise(self.params.c1(), 0, num_features);
        }
        let result = optimizer.minimize(&mut weights, evaluate, progress);

        let (status, loss) = match result {
            // depending on the liblbfgs release, an exhausted iteration
            // budget surfaces as Ok or as Err; classify by the count
            Ok(report) if iterations >= self.params.max_iterations() => {
                (TrainStatus::MaxIterations, report.fx)
            }
            Ok(report) => (TrainStatus::Converged, report.fx),
            Err(err) => match failure.take() {
                Some(Error::Cancelled) => {
                    tracing::info!("training cancelled");
                    (TrainStatus::Cancelled, last_loss)
                }
                Some(e) => return Err(e),
                None => {
                    // no evaluation failed, so the optimizer stopped on its
                    // own; the weights are still the best iterate seen
                    tracing::warn!("stopped before convergence: {}", err);
                    (TrainStatus::MaxIterations, last_loss)
                }
            },
        };

        Ok(TrainOutcome {
            weights,
            status,
            iterations,
            loss,
        })
    }
}
