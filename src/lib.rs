//! Semi-Markov conditional random fields for sequence segmentation.
//!
//! A semi-Markov CRF labels whole segments instead of single positions, so
//! features can look at a candidate segment's boundaries and length.
//! Features declare an anchor span with independently exact or open
//! boundaries; the engine keeps exact inference quadratic in the boundary
//! gap rather than in the segment length.
//!
//! # Examples
//!
//! ## Training
//!
//! ```no_run
//! use semicrf::train::{Lbfgs, Trainer};
//! use semicrf::{Corpus, SegmentCrf, SegmentCrfConfig, WindowFeatureGen};
//!
//! let mut corpus = Corpus::new();
//! corpus.append(
//!     vec![vec!["cold".into()], vec!["cold".into()], vec!["warm".into()]],
//!     vec![(0, 2, "frost"), (2, 3, "thaw")],
//! )?;
//!
//! let fgen = WindowFeatureGen::fit(&corpus, 3);
//! let config = SegmentCrfConfig::new(corpus.num_labels())?;
//! let mut model = SegmentCrf::new(fgen, config)?;
//! let mut trainer = Trainer::<Lbfgs>::new();
//! model.train(&corpus, &mut trainer)?;
//! model.save("model.json")?;
//! # Ok::<(), semicrf::Error>(())
//! ```
//!
//! ## Decoding
//!
//! ```no_run
//! use semicrf::{Corpus, DataSequence, SegmentCrf, WindowFeatureGen};
//!
//! # let corpus = Corpus::new();
//! let fgen = WindowFeatureGen::fit(&corpus, 3);
//! let model = SegmentCrf::load(fgen, "model.json")?;
//! let mut seq = DataSequence::unlabeled(vec![vec!["cold".into()], vec!["warm".into()]])?;
//! let score = model.decode(&mut seq)?;
//! for segment in seq.segmentation().iter() {
//!     println!("[{}, {}) -> {}", segment.start, segment.end, segment.label);
//! }
//! # Ok::<(), semicrf::Error>(())
//! ```

mod dataset;
mod error;
mod feature;
mod math;
mod model;
mod store;
mod viterbi;

/// Per-position baseline classifiers (CMM, HMM).
pub mod baselines;

/// Training algorithms and their parameters.
pub mod train;

pub use self::baselines::SequenceClassifier;
pub use self::dataset::{Attribute, Corpus, DataSequence, Dictionary, Label, Segment, Segmentation};
pub use self::error::{Error, Result};
pub use self::feature::{FeatureGenerator, SegmentFeature, WindowFeatureGen};
pub use self::model::{ModelGraph, ModelKind, SegmentCrf, SegmentCrfConfig};

// Re-export training types for convenience
pub use self::train::{CancelToken, Lbfgs, MaxMargin, TrainOutcome, TrainStatus, Trainer};
