//! Hidden Markov model baseline.
//!
//! Observations are drawn from a discrete alphabet built from the first
//! attribute at each position. Parameters come from Laplace-smoothed
//! supervised counts, optionally refined with a few Baum-Welch passes,
//! and decoding is a log-space per-position Viterbi.

use super::SequenceClassifier;
use crate::dataset::{Corpus, DataSequence, Dictionary, Segmentation};
use crate::error::{Error, Result};
use crate::math::{exp_clip, log_sum_exp, LOG0};

/// HMM training parameters.
#[derive(Debug, Clone)]
pub struct HmmParams {
    smoothing: f64,
    baum_welch_iterations: usize,
}

impl Default for HmmParams {
    fn default() -> Self {
        Self {
            smoothing: 1.0,
            baum_welch_iterations: 0,
        }
    }
}

impl HmmParams {
    pub fn smoothing(&self) -> f64 {
        self.smoothing
    }

    pub fn set_smoothing(&mut self, smoothing: f64) -> Result<()> {
        if !(smoothing > 0.0) {
            return Err(Error::invalid_input("smoothing must be positive"));
        }
        self.smoothing = smoothing;
        Ok(())
    }

    pub fn baum_welch_iterations(&self) -> usize {
        self.baum_welch_iterations
    }

    pub fn set_baum_welch_iterations(&mut self, iterations: usize) {
        self.baum_welch_iterations = iterations;
    }
}

/// Trained hidden Markov model.
#[derive(Debug, Clone)]
pub struct Hmm {
    obs: Dictionary,
    num_labels: usize,
    // log probabilities; emissions have one extra column for unseen symbols
    log_start: Vec<f64>,
    log_trans: Vec<f64>,
    log_emit: Vec<f64>,
}

impl Hmm {
    /// Train on a labeled corpus.
    pub fn train(corpus: &Corpus, params: &HmmParams) -> Result<Self> {
        if corpus.is_empty() {
            return Err(Error::invalid_input("no training sequences"));
        }
        let k = corpus.num_labels();
        if k == 0 {
            return Err(Error::invalid_input("corpus defines no labels"));
        }

        let mut obs = Dictionary::new();
        for seq in corpus.sequences() {
            for i in 0..seq.len() {
                if let Some(attr) = seq.item(i).first() {
                    obs.get_or_insert(&attr.name);
                }
            }
        }
        let v = obs.len();
        let lam = params.smoothing();

        let mut start = vec![lam; k];
        let mut trans = vec![lam; k * k];
        let mut emit = vec![lam; k * (v + 1)];
        for seq in corpus.sequences() {
            start[seq.label(0)] += 1.0;
            for i in 0..seq.len() {
                let y = seq.label(i);
                emit[y * (v + 1) + symbol(&obs, seq, i)] += 1.0;
                if i > 0 {
                    trans[seq.label(i - 1) * k + y] += 1.0;
                }
            }
        }

        let mut model = Self {
            obs,
            num_labels: k,
            log_start: normalized_log(&start, k),
            log_trans: normalized_log(&trans, k),
            log_emit: normalized_log(&emit, v + 1),
        };
        for iter in 0..params.baum_welch_iterations() {
            let log_likelihood = model.reestimate(corpus, lam)?;
            tracing::debug!(iteration = iter + 1, log_likelihood, "baum-welch pass");
        }
        Ok(model)
    }

    /// One EM pass over the observation sequences, ignoring their labels.
    /// Returns the data log-likelihood under the parameters being replaced.
    fn reestimate(&mut self, corpus: &Corpus, lam: f64) -> Result<f64> {
        let k = self.num_labels;
        let v = self.obs.len();
        let mut start = vec![lam; k];
        let mut trans = vec![lam; k * k];
        let mut emit = vec![lam; k * (v + 1)];
        let mut total_ll = 0.0;

        for seq in corpus.sequences() {
            let n = seq.len();
            let o: Vec<usize> = (0..n).map(|i| symbol(&self.obs, seq, i)).collect();

            let mut alpha = vec![LOG0; n * k];
            for y in 0..k {
                alpha[y] = self.log_start[y] + self.log_emit[y * (v + 1) + o[0]];
            }
            for t in 1..n {
                for y in 0..k {
                    let mut acc = LOG0;
                    for yp in 0..k {
                        acc = log_sum_exp(acc, alpha[(t - 1) * k + yp] + self.log_trans[yp * k + y]);
                    }
                    alpha[t * k + y] = acc + self.log_emit[y * (v + 1) + o[t]];
                }
            }
            let mut log_z = LOG0;
            for y in 0..k {
                log_z = log_sum_exp(log_z, alpha[(n - 1) * k + y]);
            }
            if !log_z.is_finite() {
                return Err(Error::Numerical(
                    "sequence has zero probability under the model".into(),
                ));
            }
            total_ll += log_z;

            let mut beta = vec![LOG0; n * k];
            for y in 0..k {
                beta[(n - 1) * k + y] = 0.0;
            }
            for t in (0..n - 1).rev() {
                for y in 0..k {
                    let mut acc = LOG0;
                    for yn in 0..k {
                        acc = log_sum_exp(
                            acc,
                            self.log_trans[y * k + yn]
                                + self.log_emit[yn * (v + 1) + o[t + 1]]
                                + beta[(t + 1) * k + yn],
                        );
                    }
                    beta[t * k + y] = acc;
                }
            }

            for y in 0..k {
                start[y] += exp_clip(alpha[y] + beta[y] - log_z);
            }
            for t in 0..n {
                for y in 0..k {
                    let gamma = exp_clip(alpha[t * k + y] + beta[t * k + y] - log_z);
                    emit[y * (v + 1) + o[t]] += gamma;
                }
            }
            for t in 0..n - 1 {
                for yp in 0..k {
                    for y in 0..k {
                        trans[yp * k + y] += exp_clip(
                            alpha[t * k + yp]
                                + self.log_trans[yp * k + y]
                                + self.log_emit[y * (v + 1) + o[t + 1]]
                                + beta[(t + 1) * k + y]
                                - log_z,
                        );
                    }
                }
            }
        }

        self.log_start = normalized_log(&start, k);
        self.log_trans = normalized_log(&trans, k);
        self.log_emit = normalized_log(&emit, v + 1);
        Ok(total_ll)
    }
}

impl SequenceClassifier for Hmm {
    fn classify(&self, seq: &mut DataSequence) -> Result<()> {
        let k = self.num_labels;
        let v = self.obs.len();
        let n = seq.len();
        let o: Vec<usize> = (0..n).map(|i| symbol(&self.obs, seq, i)).collect();

        let mut dp = vec![LOG0; n * k];
        let mut back = vec![0usize; n * k];
        for y in 0..k {
            dp[y] = self.log_start[y] + self.log_emit[y * (v + 1) + o[0]];
        }
        for t in 1..n {
            for y in 0..k {
                let mut best = LOG0;
                let mut arg = 0;
                for yp in 0..k {
                    let score = dp[(t - 1) * k + yp] + self.log_trans[yp * k + y];
                    if score > best {
                        best = score;
                        arg = yp;
                    }
                }
                dp[t * k + y] = best + self.log_emit[y * (v + 1) + o[t]];
                back[t * k + y] = arg;
            }
        }

        let mut labels = vec![0usize; n];
        let mut cur = (0..k)
            .max_by(|&a, &b| dp[(n - 1) * k + a].total_cmp(&dp[(n - 1) * k + b]))
            .ok_or_else(|| Error::invalid_input("model has no labels"))?;
        for t in (0..n).rev() {
            labels[t] = cur;
            if t > 0 {
                cur = back[t * k + cur];
            }
        }
        seq.set_segmentation(Segmentation::from_labels(&labels))
    }
}

/// Observation id at a position. Positions with no attributes, or with an
/// attribute name outside the training alphabet, map to the unseen column.
fn symbol(obs: &Dictionary, seq: &DataSequence, i: usize) -> usize {
    seq.item(i)
        .first()
        .and_then(|attr| obs.get(&attr.name))
        .unwrap_or(obs.len())
}

/// Row-normalize counts and move to log space. `stride` is the row width.
fn normalized_log(counts: &[f64], stride: usize) -> Vec<f64> {
    counts
        .chunks(stride)
        .flat_map(|row| {
            let total: f64 = row.iter().sum();
            row.iter().map(move |&c| (c / total).ln())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn striped_corpus() -> Corpus {
        let mut corpus = Corpus::new();
        for _ in 0..3 {
            corpus
                .append_labeled(
                    vec![
                        vec!["a".into()],
                        vec!["a".into()],
                        vec!["b".into()],
                        vec!["b".into()],
                        vec!["a".into()],
                    ],
                    &["X", "X", "Y", "Y", "X"],
                )
                .unwrap();
        }
        corpus
    }

    #[test]
    fn supervised_counts_decode_emission_pattern() {
        let corpus = striped_corpus();
        let model = Hmm::train(&corpus, &HmmParams::default()).unwrap();
        let mut seq = DataSequence::unlabeled(vec![
            vec!["b".into()],
            vec!["a".into()],
            vec!["a".into()],
        ])
        .unwrap();
        model.classify(&mut seq).unwrap();
        assert_eq!(seq.segmentation().labels(), vec![1, 0, 0]);
    }

    #[test]
    fn baum_welch_keeps_decoding_intact() {
        let corpus = striped_corpus();
        let mut params = HmmParams::default();
        params.set_baum_welch_iterations(3);
        let model = Hmm::train(&corpus, &params).unwrap();
        let mut seq =
            DataSequence::unlabeled(vec![vec!["a".into()], vec!["b".into()]]).unwrap();
        model.classify(&mut seq).unwrap();
        assert_eq!(seq.segmentation().labels(), vec![0, 1]);
    }

    #[test]
    fn unseen_symbols_fall_back_to_transitions() {
        let corpus = striped_corpus();
        let model = Hmm::train(&corpus, &HmmParams::default()).unwrap();
        let mut seq =
            DataSequence::unlabeled(vec![vec!["a".into()], vec!["zzz".into()]]).unwrap();
        model.classify(&mut seq).unwrap();
        // the seen symbol still anchors its position
        assert_eq!(seq.segmentation().labels()[0], 0);
    }

    #[test]
    fn smoothing_must_be_positive() {
        let mut params = HmmParams::default();
        assert!(params.set_smoothing(0.0).is_err());
    }
}
