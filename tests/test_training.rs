//! Training runs on small corpora: convergence, cancellation, and the
//! loss-augmented oracle.

use semicrf::train::{Lbfgs, MaxMargin, Trainer};
use semicrf::{
    Corpus, SegmentCrf, SegmentCrfConfig, TrainStatus, WindowFeatureGen,
};

fn separable_corpus() -> Corpus {
    let mut corpus = Corpus::new();
    for _ in 0..3 {
        corpus
            .append(
                vec![
                    vec!["a".into()],
                    vec!["a".into()],
                    vec!["b".into()],
                    vec!["b".into()],
                ],
                vec![(0, 2, "X"), (2, 4, "Y")],
            )
            .unwrap();
        corpus
            .append(
                vec![vec!["b".into()], vec!["a".into()], vec!["a".into()]],
                vec![(0, 1, "Y"), (1, 3, "X")],
            )
            .unwrap();
    }
    corpus
}

fn model_for(corpus: &Corpus, max_gap: usize) -> SegmentCrf<WindowFeatureGen> {
    let fgen = WindowFeatureGen::fit(corpus, max_gap);
    SegmentCrf::new(fgen, SegmentCrfConfig::new(corpus.num_labels()).unwrap()).unwrap()
}

#[test]
fn lbfgs_fits_a_separable_corpus() {
    let corpus = separable_corpus();
    let mut model = model_for(&corpus, 3);
    let mut trainer = Trainer::<Lbfgs>::new();
    let outcome = model.train(&corpus, &mut trainer).unwrap();
    assert_ne!(outcome.status, TrainStatus::Cancelled);
    assert!(outcome.loss.is_finite());

    for seq in corpus.sequences() {
        let mut decoded = seq.clone();
        model.decode(&mut decoded).unwrap();
        assert_eq!(decoded.segmentation(), seq.segmentation());
    }
}

#[test]
fn max_margin_fits_a_separable_corpus() {
    let corpus = separable_corpus();
    let mut model = model_for(&corpus, 3);
    let mut trainer = Trainer::<MaxMargin>::new();
    trainer.params_mut().set_shuffle_seed(Some(42));
    trainer.params_mut().set_max_iterations(50).unwrap();
    let outcome = model.train(&corpus, &mut trainer).unwrap();
    assert!(outcome.iterations >= 1);

    for seq in corpus.sequences() {
        let mut decoded = seq.clone();
        model.decode(&mut decoded).unwrap();
        assert_eq!(decoded.segmentation(), seq.segmentation());
    }
}

#[test]
fn long_segments_beyond_the_boundary_gap_are_recovered() {
    // gold segments of length 2 with a boundary gap of 3; the same corpus
    // also exercises segments longer than the gap at decode time
    let mut corpus = Corpus::new();
    for _ in 0..3 {
        corpus
            .append(
                vec![
                    vec!["a".into()],
                    vec!["b".into()],
                    vec!["c".into()],
                    vec!["d".into()],
                ],
                vec![(0, 2, "L1"), (2, 4, "L2")],
            )
            .unwrap();
    }
    let mut model = model_for(&corpus, 3);
    let mut trainer = Trainer::<Lbfgs>::new();
    model.train(&corpus, &mut trainer).unwrap();

    let mut seq = corpus.sequences()[0].clone();
    model.decode(&mut seq).unwrap();
    assert_eq!(seq.segmentation(), corpus.sequences()[0].segmentation());
}

#[test]
fn iteration_budget_returns_usable_weights() {
    let corpus = separable_corpus();
    let mut model = model_for(&corpus, 2);
    let mut trainer = Trainer::<Lbfgs>::new();
    trainer.params_mut().set_max_iterations(1).unwrap();
    let outcome = model.train(&corpus, &mut trainer).unwrap();
    assert_eq!(outcome.status, TrainStatus::MaxIterations);
    assert!(outcome.weights.iter().all(|w| w.is_finite()));
    // the model still decodes with the partial weights
    let mut seq = corpus.sequences()[0].clone();
    model.decode(&mut seq).unwrap();
}

#[test]
fn cancellation_stops_lbfgs_with_status() {
    let corpus = separable_corpus();
    let mut model = model_for(&corpus, 2);
    let mut trainer = Trainer::<Lbfgs>::new();
    trainer.cancel_token().cancel();
    let outcome = model.train(&corpus, &mut trainer).unwrap();
    assert_eq!(outcome.status, TrainStatus::Cancelled);
}

#[test]
fn cancellation_stops_max_margin_with_status() {
    let corpus = separable_corpus();
    let mut model = model_for(&corpus, 2);
    let mut trainer = Trainer::<MaxMargin>::new();
    trainer.cancel_token().cancel();
    let outcome = model.train(&corpus, &mut trainer).unwrap();
    assert_eq!(outcome.status, TrainStatus::Cancelled);
}

#[test]
fn augmented_score_bounds_the_gold_score() {
    let corpus = separable_corpus();
    let mut model = model_for(&corpus, 3);
    let weights: Vec<f64> = (0..model.weights().len())
        .map(|i| ((i * 13 + 5) % 11) as f64 / 11.0 - 0.5)
        .collect();
    model.set_weights(weights).unwrap();

    for seq in corpus.sequences() {
        let (augmented, predicted) = model.decode_augmented(seq).unwrap();
        let gold_score = model.score(seq).unwrap();
        // the gold segmentation carries zero loss, so the augmented
        // maximum can never fall below the gold potential
        assert!(augmented >= gold_score - 1e-9);
        if &predicted == seq.segmentation() {
            assert!((augmented - gold_score).abs() < 1e-9);
        }
    }
}

#[test]
fn empty_corpus_is_rejected() {
    let corpus = separable_corpus();
    let mut model = model_for(&corpus, 2);
    let empty = Corpus::new();
    let mut trainer = Trainer::<Lbfgs>::new();
    assert!(model.train(&empty, &mut trainer).is_err());
}
