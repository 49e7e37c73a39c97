//! Per-position baseline classifiers sharing the segment engine's data
//! model.

use crate::dataset::DataSequence;
use crate::error::Result;

mod cmm;
mod hmm;

pub use self::cmm::{Cmm, CmmParams};
pub use self::hmm::{Hmm, HmmParams};

/// Anything that can label a sequence in place.
pub trait SequenceClassifier {
    fn classify(&self, seq: &mut DataSequence) -> Result<()>;
}
