use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use optrack_checkpoint::CheckpointStore;
use optrack_core::{SimilarityWeights, Stance};
use optrack_oracle::{DisabledOracle, RelationOracle};

use super::*;
use crate::test_support::candidate;

struct ScriptedOracle {
    relation: OracleRelation,
    rationale: &'static str,
    calls: AtomicU32,
    questions: Mutex<Vec<ComparisonQuestion>>,
}

impl ScriptedOracle {
    fn answering(relation: OracleRelation, rationale: &'static str) -> Self {
        Self {
            relation,
            rationale,
            calls: AtomicU32::new(0),
            questions: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl RelationOracle for ScriptedOracle {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn verify(&self, request: &OracleRequest) -> Result<OracleVerdict, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.questions.lock().unwrap().push(request.question);
        Ok(OracleVerdict {
            relation: self.relation,
            confidence: 0.9,
            rationale: self.rationale.to_owned(),
        })
    }
}

/// Everything in [0.05, 0.95) is borderline; every cross-cluster pair is compared.
fn wide_band() -> Tuning {
    Tuning {
        merge_threshold: 0.5,
        borderline_margin: 0.45,
        related_threshold: 0.0,
        ..Tuning::default()
    }
}

async fn run(
    tuning: &Tuning,
    oracle: &dyn RelationOracle,
    candidates: &[OpinionCandidate],
    clusters: &[Vec<usize>],
) -> Classification {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::load(dir.path().join("cp.json")).unwrap();
    let cached = CachedOracle::new(oracle, &store, Duration::from_secs(5));
    let scores = PartitionScores::new(candidates, &SimilarityWeights::default());
    Classifier::new(tuning, &cached)
        .classify(&scores, clusters)
        .await
        .unwrap()
}

fn twins() -> Vec<OpinionCandidate> {
    vec![
        candidate("c1", "Interest rates will fall quickly")
            .keywords(&["rates"])
            .speaker("alice", Stance::Support, None)
            .build(),
        candidate("c2", "Interest rates will fall quickly")
            .keywords(&["rates"])
            .speaker("alice", Stance::Support, None)
            .build(),
    ]
}

#[tokio::test]
async fn confident_pair_is_same_without_oracle() {
    let oracle = ScriptedOracle::answering(OracleRelation::Related, "unused");
    let tuning = Tuning {
        merge_threshold: 0.5,
        borderline_margin: 0.1,
        ..Tuning::default()
    };
    let out = run(&tuning, &oracle, &twins(), &[vec![0, 1]]).await;

    assert_eq!(out.relationships.len(), 1);
    let rel = &out.relationships[0];
    assert_eq!(rel.kind, RelationKind::Same);
    assert_eq!((rel.source_id.as_str(), rel.target_id.as_str()), ("c1", "c2"));
    assert_eq!(rel.evidence[0].kind, EvidenceKind::Semantic);
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn borderline_pair_follows_oracle_verdict() {
    let oracle = ScriptedOracle::answering(OracleRelation::Same, "both predict rate cuts");
    let out = run(&wide_band(), &oracle, &twins(), &[vec![0, 1]]).await;

    let rel = &out.relationships[0];
    assert_eq!(rel.kind, RelationKind::Same);
    assert!(rel
        .evidence
        .iter()
        .any(|e| e.kind == EvidenceKind::Oracle && e.description == "both predict rate cuts"));
    assert_eq!(out.stats.oracle_calls, 1);
    assert_eq!(out.stats.oracle_fallbacks, 0);
    assert_eq!(
        *oracle.questions.lock().unwrap(),
        vec![ComparisonQuestion::SameOpinion]
    );
}

#[tokio::test]
async fn borderline_pair_without_oracle_falls_back_with_capped_confidence() {
    let out = run(&wide_band(), &DisabledOracle, &twins(), &[vec![0, 1]]).await;

    let rel = &out.relationships[0];
    assert!(rel.confidence <= FALLBACK_CEILING);
    assert!(rel.evidence.iter().any(|e| e.kind == EvidenceKind::Heuristic));
    assert_eq!(out.stats.oracle_fallbacks, 1);
    assert_eq!(out.stats.oracle_calls, 0);
}

#[tokio::test]
async fn no_relation_verdict_emits_nothing() {
    let oracle = ScriptedOracle::answering(OracleRelation::NoRelation, "different topics");
    let out = run(&wide_band(), &oracle, &twins(), &[vec![0, 1]]).await;
    assert!(out.relationships.is_empty());
    assert_eq!(out.stats.pairs_compared, 1);
}

#[tokio::test]
async fn cross_cluster_evolution_points_forward_in_time() {
    let candidates = vec![
        candidate("a-late", "Rates falling but slower than thought")
            .unit("ep-mar", 3)
            .build(),
        candidate("b-early", "Rates will fall fast").unit("ep-jan", 1).build(),
    ];
    let oracle = ScriptedOracle::answering(OracleRelation::Evolution, "pace expectations shifted");
    let out = run(&wide_band(), &oracle, &candidates, &[vec![0], vec![1]]).await;

    let rel = &out.relationships[0];
    assert_eq!(rel.kind, RelationKind::Evolution);
    assert_eq!(rel.source_id, "b-early");
    assert_eq!(rel.target_id, "a-late");
    assert_eq!(
        *oracle.questions.lock().unwrap(),
        vec![ComparisonQuestion::EvolutionOrContradiction]
    );
}

#[tokio::test]
async fn in_cluster_evolution_is_chronology_corrected() {
    let candidates = vec![
        candidate("a", "Rates falling slower").unit("ep-mar", 3).build(),
        candidate("b", "Rates falling fast").unit("ep-jan", 1).build(),
    ];
    let oracle = ScriptedOracle::answering(OracleRelation::Evolution, "refined view");
    let out = run(&wide_band(), &oracle, &candidates, &[vec![0, 1]]).await;

    let rel = &out.relationships[0];
    assert_eq!(rel.kind, RelationKind::Evolution);
    assert_eq!((rel.source_id.as_str(), rel.target_id.as_str()), ("b", "a"));
    assert!(rel.evidence_text().contains("chronology corrected"));
}

#[tokio::test]
async fn same_date_evolution_verdict_is_downgraded_to_related() {
    let oracle = ScriptedOracle::answering(OracleRelation::Evolution, "view was refined");
    let out = run(&wide_band(), &oracle, &twins(), &[vec![0, 1]]).await;

    assert_eq!(out.relationships.len(), 1);
    let rel = &out.relationships[0];
    assert_eq!(rel.kind, RelationKind::Related);
    assert!(rel.evidence.iter().any(|e| e.kind == EvidenceKind::Temporal
        && e.description.contains("share the date 2024-01-15")));
    assert!(out
        .relationships
        .iter()
        .all(|r| r.kind != RelationKind::Evolution));
}

#[tokio::test]
async fn fallback_detects_contradiction_from_opposing_stances() {
    let candidates = vec![
        candidate("a", "Crypto is the future")
            .speaker("alice", Stance::Support, None)
            .unit("ep-jan", 1)
            .build(),
        candidate("b", "Crypto is the future, not")
            .speaker("bob", Stance::Oppose, None)
            .unit("ep-feb", 2)
            .build(),
    ];
    let out = run(&wide_band(), &DisabledOracle, &candidates, &[vec![0], vec![1]]).await;

    let rel = &out.relationships[0];
    assert_eq!(rel.kind, RelationKind::Contradiction);
    assert!(rel.confidence <= FALLBACK_CEILING);
}

#[tokio::test]
async fn fallback_detects_evolution_from_changed_reasoning() {
    let candidates = vec![
        candidate("a", "Rates will fall")
            .speaker("alice", Stance::Support, Some("inflation is cooling fast"))
            .unit("ep-jan", 1)
            .build(),
        candidate("b", "Rates will fall slowly")
            .speaker("alice", Stance::Support, Some("services inflation is sticky"))
            .unit("ep-mar", 3)
            .build(),
    ];
    let out = run(&wide_band(), &DisabledOracle, &candidates, &[vec![0], vec![1]]).await;

    let rel = &out.relationships[0];
    assert_eq!(rel.kind, RelationKind::Evolution);
    assert_eq!(rel.source_id, "a");
    assert!(rel.evidence_text().contains("refined their reasoning"));
}

#[tokio::test]
async fn same_day_cross_cluster_pair_is_related() {
    let candidates = vec![
        candidate("a", "Rates will fall").build(),
        candidate("b", "Rates will rise").build(),
    ];
    let oracle = ScriptedOracle::answering(OracleRelation::Contradiction, "unused");
    let out = run(&wide_band(), &oracle, &candidates, &[vec![0], vec![1]]).await;
    assert_eq!(out.relationships[0].kind, RelationKind::Related);
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cross_cluster_pairs_below_related_threshold_are_skipped() {
    let candidates = vec![
        candidate("a", "Rates will fall").unit("ep-jan", 1).build(),
        candidate("b", "Housing is overpriced").unit("ep-mar", 3).build(),
    ];
    let tuning = Tuning {
        related_threshold: 0.9,
        ..wide_band()
    };
    let out = run(&tuning, &DisabledOracle, &candidates, &[vec![0], vec![1]]).await;
    assert!(out.relationships.is_empty());
    assert_eq!(out.stats.pairs_compared, 0);
}

#[tokio::test]
async fn every_relationship_carries_evidence() {
    let candidates = vec![
        candidate("a", "Rates will fall")
            .speaker("alice", Stance::Support, Some("cooling"))
            .unit("ep-jan", 1)
            .build(),
        candidate("b", "Rates will fall")
            .speaker("alice", Stance::Support, None)
            .unit("ep-jan", 1)
            .build(),
        candidate("c", "Rates will not fall")
            .speaker("bob", Stance::Oppose, None)
            .unit("ep-feb", 2)
            .build(),
        candidate("d", "Rates will fall slowly")
            .speaker("alice", Stance::Neutral, None)
            .unit("ep-mar", 3)
            .build(),
    ];
    let out = run(
        &wide_band(),
        &DisabledOracle,
        &candidates,
        &[vec![0, 1], vec![2], vec![3]],
    )
    .await;
    assert!(!out.relationships.is_empty());
    for rel in &out.relationships {
        assert!(!rel.evidence.is_empty(), "{rel:?}");
        assert!(rel.validate().is_ok());
    }
}
