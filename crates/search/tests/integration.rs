//! Integration tests for the search crate: engine + driver end-to-end
//! over mock scorer, codec, and oracle. No model, no network.

use rand::rngs::StdRng;
use rand::SeedableRng;

use search::mocks::{MockCodec, MockOracle, MockScorer};
use search::{
    CancelToken, ExampleBank, ExampleRecipe, PairStream, ReverseSearcher, SearchConfig,
    SearchError,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn test_bank() -> ExampleBank {
    ExampleBank::from_recipes(vec![
        ExampleRecipe {
            first: "Water".to_string(),
            second: "Fire".to_string(),
            result: "Steam".to_string(),
        },
        ExampleRecipe {
            first: "Water".to_string(),
            second: "Wind".to_string(),
            result: "Wave".to_string(),
        },
    ])
}

fn test_config() -> SearchConfig {
    SearchConfig {
        seed: Some(0),
        ..SearchConfig::default()
    }
}

/// Scripted scorer over [`MockCodec::with_craft_vocab`] producing, in
/// cost order:
///
/// 1. `Water + Wind`   2. `Fire + Water`   3. `Fire + Earth`
///
/// plus a high-probability ` Leady` branch (leading-space boundary
/// artifact) that the grammar prunes before it is ever expanded.
fn craft_scorer(codec: &MockCodec) -> MockScorer {
    let mut scorer = MockScorer::new(codec.vocab_size());
    // ids: 2 Fire, 3 Earth, 4 Water, 5 Wind, 6 " + ", 7 "\n", 9 " Leady"
    scorer.add_response(&[0], &[(2, 0.0), (4, 0.0), (9, 3.0)]);
    scorer.add_response(&[0, 2], &[(6, 0.0)]);
    scorer.add_response(&[0, 2, 6], &[(3, 0.0), (4, 1.0)]);
    scorer.add_response(&[0, 2, 6, 3], &[(7, 0.0)]);
    scorer.add_response(&[0, 2, 6, 4], &[(7, 0.0)]);
    scorer.add_response(&[0, 4], &[(6, 0.0)]);
    scorer.add_response(&[0, 4, 6], &[(5, 0.0)]);
    scorer.add_response(&[0, 4, 6, 5], &[(7, 0.0)]);
    scorer
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[test]
fn test_stream_emits_candidates_in_cost_order() {
    let codec = MockCodec::with_craft_vocab();
    let scorer = craft_scorer(&codec);
    let bank = test_bank();
    let mut rng = StdRng::seed_from_u64(0);

    let mut stream = PairStream::new(
        "Lava",
        &[],
        &bank,
        &scorer,
        &codec,
        test_config(),
        CancelToken::new(),
        &mut rng,
    )
    .unwrap();

    let mut pairs = Vec::new();
    let mut costs = Vec::new();
    while let Some(candidate) = stream.next_pair().unwrap() {
        costs.push(candidate.cost);
        pairs.push((candidate.first, candidate.second));
    }

    assert_eq!(
        pairs,
        vec![
            ("Water".to_string(), "Wind".to_string()),
            ("Fire".to_string(), "Water".to_string()),
            ("Fire".to_string(), "Earth".to_string()),
        ]
    );
    assert!(
        costs.windows(2).all(|w| w[0] <= w[1]),
        "costs must be non-decreasing: {costs:?}"
    );
}

#[test]
fn test_stream_never_emits_banned_or_oversized_operands() {
    let codec = MockCodec::with_craft_vocab();
    let scorer = craft_scorer(&codec);
    let bank = test_bank();
    let mut rng = StdRng::seed_from_u64(0);

    let mut stream = PairStream::new(
        "Lava",
        &["Water".to_string()],
        &bank,
        &scorer,
        &codec,
        test_config(),
        CancelToken::new(),
        &mut rng,
    )
    .unwrap();

    let mut pairs = Vec::new();
    while let Some(candidate) = stream.next_pair().unwrap() {
        pairs.push((candidate.first, candidate.second));
    }

    // Every Water-bearing pair is pruned; only Fire + Earth survives.
    assert_eq!(pairs, vec![("Fire".to_string(), "Earth".to_string())]);
    for (first, second) in &pairs {
        assert_ne!(first.to_lowercase(), "water");
        assert_ne!(second.to_lowercase(), "water");
        assert!(first.len() <= 30 && second.len() <= 30);
        assert!(!first.starts_with(' ') && !second.starts_with(' '));
    }
}

#[test]
fn test_stream_defers_completions_popped_behind_pending_expansions() {
    // A dear complete line coexists in one round with a cheaper
    // expandable branch whose completion is still pending. Emission must
    // stay cost-ordered: "Water + Wind" (cost ≈ 1.006) before
    // "Fire + Earth" (cost ≈ 1.313), even though the latter's line
    // completes a round earlier.
    let codec = MockCodec::new(&[
        "<prompt>",
        "<reserved>",
        "Wa",
        "ter",
        " + ",
        "Wind",
        "\n",
        "Fire",
        "Earth",
    ]);
    let mut scorer = MockScorer::new(codec.vocab_size());
    scorer.add_response(&[0], &[(7, 0.0), (2, 1.0)]);
    scorer.add_response(&[0, 7], &[(4, 0.0)]);
    scorer.add_response(&[0, 7, 4], &[(8, 0.0)]);
    scorer.add_response(&[0, 7, 4, 8], &[(6, 0.0)]);
    scorer.add_response(&[0, 2], &[(3, 0.0)]);
    scorer.add_response(&[0, 2, 3], &[(4, 0.0)]);
    // Mass on the reserved token makes the Wind edge cost ln 2.
    scorer.add_response(&[0, 2, 3, 4], &[(5, 0.0), (1, 0.0)]);
    scorer.add_response(&[0, 2, 3, 4, 5], &[(6, 0.0)]);

    let bank = test_bank();
    let mut rng = StdRng::seed_from_u64(0);
    let mut stream = PairStream::new(
        "Lava",
        &[],
        &bank,
        &scorer,
        &codec,
        test_config(),
        CancelToken::new(),
        &mut rng,
    )
    .unwrap();

    let mut emitted = Vec::new();
    while let Some(candidate) = stream.next_pair().unwrap() {
        emitted.push((candidate.first.clone(), candidate.cost));
    }

    assert_eq!(emitted.len(), 2);
    assert_eq!(emitted[0].0, "Water");
    assert_eq!(emitted[1].0, "Fire");
    assert!(emitted[0].1 <= emitted[1].1);
}

#[test]
fn test_cancelled_stream_ends_immediately() {
    let codec = MockCodec::with_craft_vocab();
    let scorer = craft_scorer(&codec);
    let bank = test_bank();
    let cancel = CancelToken::new();
    let mut rng = StdRng::seed_from_u64(0);

    let mut stream = PairStream::new(
        "Lava",
        &[],
        &bank,
        &scorer,
        &codec,
        test_config(),
        cancel.clone(),
        &mut rng,
    )
    .unwrap();

    cancel.cancel();
    assert!(stream.next_pair().unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_find_returns_first_match_within_budget() {
    // The third emitted candidate is (Earth, Fire) after
    // canonicalization and the oracle maps it to the target.
    let codec = MockCodec::with_craft_vocab();
    let scorer = craft_scorer(&codec);
    let bank = test_bank();

    let mut oracle = MockOracle::new();
    oracle.add_response("Water", "Wind", Some("Wave"));
    oracle.add_response("Fire", "Water", Some("Steam"));
    oracle.add_response("Fire", "Earth", Some("Lava"));

    let searcher = ReverseSearcher::new(
        &oracle,
        &scorer,
        &codec,
        &bank,
        test_config(),
        CancelToken::new(),
    );
    let report = searcher
        .find("Lava", &["Lava".to_string()], 5)
        .await
        .unwrap();

    let found = report.found.expect("should find the Lava recipe");
    assert_eq!(found.first, "Earth");
    assert_eq!(found.second, "Fire");
    assert_eq!(found.result, "Lava");
    assert_eq!(report.oracle_calls, 3);
    assert_eq!(oracle.calls().len(), 3);
}

#[tokio::test]
async fn test_find_match_is_case_insensitive() {
    let codec = MockCodec::with_craft_vocab();
    let scorer = craft_scorer(&codec);
    let bank = test_bank();

    let mut oracle = MockOracle::new();
    oracle.add_response("Water", "Wind", Some("WAVE"));

    let searcher = ReverseSearcher::new(
        &oracle,
        &scorer,
        &codec,
        &bank,
        test_config(),
        CancelToken::new(),
    );
    let report = searcher.find("wave", &[], 5).await.unwrap();

    let found = report.found.expect("case-insensitive match");
    assert_eq!(found.result, "WAVE");
    assert_eq!(report.oracle_calls, 1);
}

#[tokio::test]
async fn test_find_exhausts_budget_without_match() {
    let codec = MockCodec::with_craft_vocab();
    let scorer = craft_scorer(&codec);
    let bank = test_bank();
    let oracle = MockOracle::new(); // everything combines to nothing

    let searcher = ReverseSearcher::new(
        &oracle,
        &scorer,
        &codec,
        &bank,
        test_config(),
        CancelToken::new(),
    );
    let report = searcher.find("Lava", &[], 2).await.unwrap();

    assert!(report.found.is_none());
    assert_eq!(report.oracle_calls, 2);
    assert_eq!(oracle.calls().len(), 2);
}

#[tokio::test]
async fn test_find_stops_when_stream_is_exhausted() {
    let codec = MockCodec::with_craft_vocab();
    let scorer = craft_scorer(&codec);
    let bank = test_bank();
    let oracle = MockOracle::new();

    let searcher = ReverseSearcher::new(
        &oracle,
        &scorer,
        &codec,
        &bank,
        test_config(),
        CancelToken::new(),
    );
    // Budget far above the three candidates the scorer can produce.
    let report = searcher.find("Lava", &[], 1000).await.unwrap();

    assert!(report.found.is_none());
    assert_eq!(report.oracle_calls, 3);
}

#[tokio::test]
async fn test_duplicate_pairs_do_not_consume_budget() {
    // Two token paths decode to the same "Fire + Earth" line; the second
    // one must be skipped for free.
    let codec = MockCodec::new(&[
        "<prompt>",
        "<reserved>",
        "Fire",
        " + ",
        "Earth",
        "\n",
        "Fi",
        "re",
    ]);
    let mut scorer = MockScorer::new(codec.vocab_size());
    scorer.add_response(&[0], &[(2, 0.0), (6, 0.0)]);
    scorer.add_response(&[0, 2], &[(3, 0.0)]);
    scorer.add_response(&[0, 2, 3], &[(4, 0.0)]);
    scorer.add_response(&[0, 2, 3, 4], &[(5, 0.0)]);
    scorer.add_response(&[0, 6], &[(7, 0.0)]);
    scorer.add_response(&[0, 6, 7], &[(3, 0.0)]);
    scorer.add_response(&[0, 6, 7, 3], &[(4, 0.0)]);
    scorer.add_response(&[0, 6, 7, 3, 4], &[(5, 0.0)]);

    let bank = test_bank();
    let oracle = MockOracle::new();

    let searcher = ReverseSearcher::new(
        &oracle,
        &scorer,
        &codec,
        &bank,
        test_config(),
        CancelToken::new(),
    );
    let report = searcher.find("Lava", &[], 5).await.unwrap();

    assert!(report.found.is_none());
    assert_eq!(report.candidates_pulled, 2);
    assert_eq!(report.duplicates_skipped, 1);
    assert_eq!(report.oracle_calls, 1);
    assert_eq!(oracle.calls().len(), 1, "one call per canonical pair");
}

#[tokio::test]
async fn test_cancelled_find_reports_not_found() {
    let codec = MockCodec::with_craft_vocab();
    let scorer = craft_scorer(&codec);
    let bank = test_bank();
    let oracle = MockOracle::new();
    let cancel = CancelToken::new();
    cancel.cancel();

    let searcher = ReverseSearcher::new(&oracle, &scorer, &codec, &bank, test_config(), cancel);
    let report = searcher.find("Lava", &[], 5).await.unwrap();

    assert!(report.found.is_none());
    assert_eq!(report.oracle_calls, 0);
    assert!(oracle.calls().is_empty());
}

#[tokio::test]
async fn test_protocol_violation_propagates_as_error() {
    let codec = MockCodec::with_craft_vocab();
    let scorer = craft_scorer(&codec);
    let bank = test_bank();

    let mut oracle = MockOracle::new();
    oracle.add_protocol_violation("Water", "Wind");

    let searcher = ReverseSearcher::new(
        &oracle,
        &scorer,
        &codec,
        &bank,
        test_config(),
        CancelToken::new(),
    );
    let err = searcher.find("Lava", &[], 5).await.unwrap_err();

    assert!(matches!(
        err,
        SearchError::Oracle(oracle::OracleError::Protocol(_))
    ));
}

#[tokio::test]
async fn test_empty_bank_fails_the_search() {
    let codec = MockCodec::with_craft_vocab();
    let scorer = craft_scorer(&codec);
    let bank = ExampleBank::from_recipes(vec![]);
    let oracle = MockOracle::new();

    let searcher = ReverseSearcher::new(
        &oracle,
        &scorer,
        &codec,
        &bank,
        test_config(),
        CancelToken::new(),
    );
    let err = searcher.find("Lava", &[], 5).await.unwrap_err();

    assert!(matches!(err, SearchError::ExampleBank(_)));
}
