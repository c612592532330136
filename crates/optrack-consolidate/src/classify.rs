//! Relationship classification within one category partition.
//!
//! In-cluster pairs decide between SAME and RELATED; cross-cluster pairs in
//! chronological order are tested for EVOLUTION and CONTRADICTION. Borderline
//! or directional questions go to the oracle. When the oracle cannot answer,
//! a similarity-only heuristic decides, capped at [`FALLBACK_CEILING`] and
//! tagged with a heuristic evidence entry.

use optrack_core::{
    EvidenceKind, OpinionCandidate, RelationKind, Relationship, RelationshipEvidence, StanceShift,
    Tuning,
};
use optrack_oracle::{ComparisonQuestion, OracleError, OracleRelation, OracleRequest, OracleVerdict};
use serde::{Deserialize, Serialize};

use crate::cache::CachedOracle;
use crate::error::ConsolidateError;
use crate::similarity::{dominant_stance, PartitionScores, SimilarityVector};

/// Confidence ceiling for decisions made without the oracle.
pub const FALLBACK_CEILING: f32 = 0.6;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifyStats {
    pub pairs_compared: u64,
    pub oracle_calls: u64,
    pub oracle_cache_hits: u64,
    pub oracle_fallbacks: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub relationships: Vec<Relationship>,
    pub stats: ClassifyStats,
}

pub struct Classifier<'a> {
    tuning: &'a Tuning,
    oracle: &'a CachedOracle<'a>,
}

/// One candidate pair under consideration, earlier-by-id first for in-cluster
/// pairs and earlier-by-date first for cross-cluster pairs.
struct Pair<'c> {
    first: &'c OpinionCandidate,
    second: &'c OpinionCandidate,
    vector: SimilarityVector,
    score: f32,
}

impl<'a> Classifier<'a> {
    #[must_use]
    pub fn new(tuning: &'a Tuning, oracle: &'a CachedOracle<'a>) -> Self {
        Self { tuning, oracle }
    }

    /// Classify every relevant pair of the partition described by `scores`,
    /// given its clusters as index groups into `scores`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsolidateError::MissingEvidence`] if a relationship would
    /// be emitted without evidence.
    pub async fn classify(
        &self,
        scores: &PartitionScores<'_>,
        clusters: &[Vec<usize>],
    ) -> Result<Classification, ConsolidateError> {
        let mut out = Classification::default();

        for group in clusters {
            for (pos, &i) in group.iter().enumerate() {
                for &j in &group[pos + 1..] {
                    let pair = Pair {
                        first: scores.candidate(i),
                        second: scores.candidate(j),
                        vector: scores.vector(i, j),
                        score: scores.combined(i, j),
                    };
                    out.stats.pairs_compared += 1;
                    if let Some(rel) = self.within_cluster(&pair, &mut out.stats).await? {
                        out.relationships.push(rel);
                    }
                }
            }
        }

        for (gx, group_x) in clusters.iter().enumerate() {
            for group_y in &clusters[gx + 1..] {
                for &i in group_x {
                    for &j in group_y {
                        let score = scores.combined(i, j);
                        if score < self.tuning.related_threshold {
                            continue;
                        }
                        let (a, b) = (scores.candidate(i), scores.candidate(j));
                        let (first, second) = if chronological(a, b) { (a, b) } else { (b, a) };
                        let pair = Pair {
                            first,
                            second,
                            vector: scores.vector(i, j),
                            score,
                        };
                        out.stats.pairs_compared += 1;
                        if let Some(rel) = self.across_clusters(&pair, &mut out.stats).await? {
                            out.relationships.push(rel);
                        }
                    }
                }
            }
        }

        tracing::debug!(
            relationships = out.relationships.len(),
            pairs = out.stats.pairs_compared,
            oracle_calls = out.stats.oracle_calls,
            fallbacks = out.stats.oracle_fallbacks,
            "partition classified"
        );
        Ok(out)
    }

    async fn within_cluster(
        &self,
        pair: &Pair<'_>,
        stats: &mut ClassifyStats,
    ) -> Result<Option<Relationship>, ConsolidateError> {
        let confident = self.tuning.merge_threshold + self.tuning.borderline_margin;
        let band_floor = self.tuning.merge_threshold - self.tuning.borderline_margin;

        if pair.score >= confident {
            return build(pair, RelationKind::Same, vec![semantic(pair)]).map(Some);
        }
        if pair.score < band_floor {
            return build(pair, RelationKind::Related, vec![semantic(pair)]).map(Some);
        }

        match self
            .ask(ComparisonQuestion::SameOpinion, pair, stats)
            .await
        {
            Ok(verdict) => from_verdict(pair, &verdict),
            Err(e) => {
                stats.oracle_fallbacks += 1;
                let kind = if pair.score >= self.tuning.merge_threshold {
                    RelationKind::Same
                } else {
                    RelationKind::Related
                };
                fallback(pair, kind, &e, "score against merge threshold").map(Some)
            }
        }
    }

    async fn across_clusters(
        &self,
        pair: &Pair<'_>,
        stats: &mut ClassifyStats,
    ) -> Result<Option<Relationship>, ConsolidateError> {
        if pair.first.source_unit_date == pair.second.source_unit_date {
            return build(pair, RelationKind::Related, vec![semantic(pair)]).map(Some);
        }

        match self
            .ask(ComparisonQuestion::EvolutionOrContradiction, pair, stats)
            .await
        {
            Ok(verdict) => from_verdict(pair, &verdict),
            Err(e) => {
                stats.oracle_fallbacks += 1;
                let (kind, reason) = heuristic_direction(pair.first, pair.second);
                fallback(pair, kind, &e, &reason).map(Some)
            }
        }
    }

    async fn ask(
        &self,
        question: ComparisonQuestion,
        pair: &Pair<'_>,
        stats: &mut ClassifyStats,
    ) -> Result<OracleVerdict, OracleError> {
        if !self.oracle.is_available() {
            return Err(OracleError::Unavailable);
        }
        let request = OracleRequest::pair(question, pair.first, pair.second);
        let verified = self.oracle.verify(&request).await;
        match &verified {
            Ok(v) if v.from_cache => stats.oracle_cache_hits += 1,
            _ => stats.oracle_calls += 1,
        }
        verified.map(|v| v.verdict)
    }
}

fn chronological(a: &OpinionCandidate, b: &OpinionCandidate) -> bool {
    (a.source_unit_date, &a.id) <= (b.source_unit_date, &b.id)
}

fn semantic(pair: &Pair<'_>) -> RelationshipEvidence {
    RelationshipEvidence::new(
        EvidenceKind::Semantic,
        format!("combined similarity {:.2} ({})", pair.score, pair.vector.describe()),
        pair.score,
    )
}

/// Build the relationship from `pair.first` to `pair.second`, pointing
/// EVOLUTION edges from older to newer. An EVOLUTION verdict between
/// candidates of the same date has no direction and becomes RELATED.
fn build(
    pair: &Pair<'_>,
    mut kind: RelationKind,
    mut evidence: Vec<RelationshipEvidence>,
) -> Result<Relationship, ConsolidateError> {
    if kind == RelationKind::Evolution
        && pair.first.source_unit_date == pair.second.source_unit_date
    {
        tracing::debug!(
            first = %pair.first.id,
            second = %pair.second.id,
            "evolution between same-date candidates downgraded to related"
        );
        evidence.push(RelationshipEvidence::new(
            EvidenceKind::Temporal,
            format!(
                "evolution downgraded to related: {} and {} share the date {}",
                pair.first.id,
                pair.second.id,
                pair.first.source_unit_date.format("%Y-%m-%d")
            ),
            pair.score,
        ));
        kind = RelationKind::Related;
    }
    let (src, tgt) = if kind == RelationKind::Evolution
        && pair.first.source_unit_date > pair.second.source_unit_date
    {
        evidence.push(RelationshipEvidence::new(
            EvidenceKind::Temporal,
            format!(
                "chronology corrected: {} ({}) precedes {} ({})",
                pair.second.id,
                pair.second.source_unit_date.format("%Y-%m-%d"),
                pair.first.id,
                pair.first.source_unit_date.format("%Y-%m-%d")
            ),
            1.0,
        ));
        (pair.second, pair.first)
    } else {
        (pair.first, pair.second)
    };
    Relationship::new(&src.id, &tgt.id, kind, evidence).map_err(|_| {
        ConsolidateError::MissingEvidence {
            source_id: src.id.clone(),
            target_id: tgt.id.clone(),
        }
    })
}

fn from_verdict(
    pair: &Pair<'_>,
    verdict: &OracleVerdict,
) -> Result<Option<Relationship>, ConsolidateError> {
    let kind = match verdict.relation {
        OracleRelation::Same => RelationKind::Same,
        OracleRelation::Related => RelationKind::Related,
        OracleRelation::Evolution => RelationKind::Evolution,
        OracleRelation::Contradiction => RelationKind::Contradiction,
        OracleRelation::NoRelation => {
            tracing::debug!(
                first = %pair.first.id,
                second = %pair.second.id,
                "oracle found no relation"
            );
            return Ok(None);
        }
    };
    let rationale = if verdict.rationale.is_empty() {
        format!("oracle judged {kind}")
    } else {
        verdict.rationale.clone()
    };
    let evidence = vec![
        RelationshipEvidence::new(EvidenceKind::Oracle, rationale, verdict.confidence),
        semantic(pair),
    ];
    build(pair, kind, evidence).map(Some)
}

fn fallback(
    pair: &Pair<'_>,
    kind: RelationKind,
    err: &OracleError,
    reason: &str,
) -> Result<Relationship, ConsolidateError> {
    tracing::warn!(
        first = %pair.first.id,
        second = %pair.second.id,
        error = %err,
        %kind,
        "oracle unavailable, using similarity heuristic"
    );
    let evidence = vec![
        RelationshipEvidence::new(
            EvidenceKind::Heuristic,
            format!("oracle unavailable ({err}); heuristic decision: {reason}"),
            pair.score.min(FALLBACK_CEILING),
        ),
        semantic(pair),
    ];
    Ok(build(pair, kind, evidence)?.capped(FALLBACK_CEILING))
}

/// Heuristic cross-cluster decision for an earlier/later pair.
fn heuristic_direction(
    earlier: &OpinionCandidate,
    later: &OpinionCandidate,
) -> (RelationKind, String) {
    if let (Some(a), Some(b)) = (dominant_stance(earlier), dominant_stance(later)) {
        if a.opposes(b) {
            return (
                RelationKind::Contradiction,
                format!("opposing stances ({a} then {b})"),
            );
        }
    }

    for s in &earlier.speakers {
        let Some(next) = later.stance_of(&s.speaker_id) else {
            continue;
        };
        match StanceShift::between(s.stance, next.stance) {
            Some(StanceShift::Reversal) => {
                return (
                    RelationKind::Evolution,
                    format!(
                        "speaker {} reversed stance from {} to {}",
                        s.speaker_id, s.stance, next.stance
                    ),
                );
            }
            Some(StanceShift::Moderate) => {
                return (
                    RelationKind::Evolution,
                    format!(
                        "speaker {} shifted stance from {} to {}",
                        s.speaker_id, s.stance, next.stance
                    ),
                );
            }
            None => {}
        }
        if normalized(s.reasoning.as_deref()) != normalized(next.reasoning.as_deref()) {
            return (
                RelationKind::Evolution,
                format!("speaker {} refined their reasoning", s.speaker_id),
            );
        }
    }

    (
        RelationKind::Related,
        "semantic overlap without stance change".to_string(),
    )
}

pub(crate) fn normalized(text: Option<&str>) -> String {
    text.map(|t| t.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "classify_test.rs"]
mod tests;
