//! Merge engine: folds SAME-linked candidates into canonical opinions.
//!
//! Identity is the transitive closure of SAME relationships, computed with a
//! disjoint-set forest over candidate indices. Every field disagreement in a
//! merged group is settled by a fixed rule and recorded as a
//! [`ConflictResolution`] so reruns reproduce the same audit trail.

use std::collections::{BTreeMap, BTreeSet};

use optrack_core::{
    CategoryId, ConflictResolution, MergeRecord, Opinion, OpinionAppearance, OpinionCandidate,
    RelationKind, Relationship, RelationshipEvidence, ResolutionMethod, ValidationError,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConsolidateError;

/// Everything the merge stage hands to the evolution and journey stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeOutcome {
    /// Ordered by earliest appearance, then first candidate id.
    pub opinions: Vec<Opinion>,
    pub merges: Vec<MergeRecord>,
    /// Candidate id to canonical opinion id. Total over the input candidates.
    pub id_map: BTreeMap<String, String>,
    /// EVOLUTION relationships translated to opinion ids, self-loops removed
    /// and parallel edges combined.
    pub evolution_edges: Vec<Relationship>,
}

/// Disjoint-set forest with path compression. The smaller index always
/// becomes the root so the representative of a set is its lowest member.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        while self.parent[x] != root {
            let next = self.parent[x];
            self.parent[x] = root;
            x = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (low, high) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[high] = low;
        }
    }
}

/// Merge `candidates` according to `relationships`.
///
/// # Errors
///
/// - [`ConsolidateError::MissingEvidence`] or [`ConsolidateError::Validation`]
///   for a malformed relationship.
/// - [`ConsolidateError::UnresolvedCandidateId`] when a relationship names a
///   candidate that is not in `candidates`.
pub fn process_relationships(
    candidates: &[OpinionCandidate],
    relationships: &[Relationship],
) -> Result<MergeOutcome, ConsolidateError> {
    let mut sorted: Vec<&OpinionCandidate> = candidates.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));
    let index: BTreeMap<&str, usize> = sorted
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id.as_str(), i))
        .collect();

    let resolve = |id: &str| {
        index
            .get(id)
            .copied()
            .ok_or_else(|| ConsolidateError::UnresolvedCandidateId {
                candidate_id: id.to_owned(),
            })
    };

    let mut edges: Vec<(usize, usize, &Relationship)> = Vec::with_capacity(relationships.len());
    for rel in relationships {
        rel.validate().map_err(|e| match e {
            ValidationError::MissingEvidence {
                source_id,
                target_id,
            } => ConsolidateError::MissingEvidence {
                source_id,
                target_id,
            },
            other => ConsolidateError::Validation(other),
        })?;
        edges.push((resolve(&rel.source_id)?, resolve(&rel.target_id)?, rel));
    }
    edges.sort_by(|a, b| (a.0, a.1, a.2.kind).cmp(&(b.0, b.1, b.2.kind)));

    let mut sets = DisjointSet::new(sorted.len());
    for (s, t, rel) in &edges {
        if rel.kind == RelationKind::Same {
            sets.union(*s, *t);
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..sorted.len() {
        groups.entry(sets.find(i)).or_default().push(i);
    }

    let mut synthesized: Vec<(Opinion, MergeRecord)> = groups
        .values()
        .map(|members| {
            let group: Vec<&OpinionCandidate> = members.iter().map(|&i| sorted[i]).collect();
            synthesize(&group)
        })
        .collect();

    let mut owner = vec![0usize; sorted.len()];
    for (pos, members) in groups.values().enumerate() {
        for &i in members {
            owner[i] = pos;
        }
    }

    let mut evolution: Vec<(usize, usize, Vec<RelationshipEvidence>)> = Vec::new();
    for (s, t, rel) in &edges {
        let (a, b) = (owner[*s], owner[*t]);
        if a == b {
            if rel.kind != RelationKind::Same {
                tracing::debug!(
                    source = %rel.source_id,
                    target = %rel.target_id,
                    kind = %rel.kind,
                    "dropping relationship inside one merged opinion"
                );
            }
            continue;
        }
        match rel.kind {
            RelationKind::Same => {}
            RelationKind::Related => {
                let (id_a, id_b) = (synthesized[a].0.id.clone(), synthesized[b].0.id.clone());
                synthesized[a].0.related_opinion_ids.insert(id_b);
                synthesized[b].0.related_opinion_ids.insert(id_a);
            }
            RelationKind::Contradiction => {
                let (id_a, id_b) = (synthesized[a].0.id.clone(), synthesized[b].0.id.clone());
                record_contradiction(&mut synthesized[a].0, id_b);
                record_contradiction(&mut synthesized[b].0, id_a);
            }
            RelationKind::Evolution => {
                match evolution.iter_mut().find(|(x, y, _)| (*x, *y) == (a, b)) {
                    Some((_, _, evidence)) => evidence.extend(rel.evidence.iter().cloned()),
                    None => evolution.push((a, b, rel.evidence.clone())),
                }
            }
        }
    }

    let evolution_edges = evolution
        .into_iter()
        .map(|(a, b, evidence)| {
            let (src, tgt) = (&synthesized[a].0.id, &synthesized[b].0.id);
            Relationship::new(src, tgt, RelationKind::Evolution, evidence).map_err(|_| {
                ConsolidateError::MissingEvidence {
                    source_id: src.clone(),
                    target_id: tgt.clone(),
                }
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let id_map: BTreeMap<String, String> = owner
        .iter()
        .enumerate()
        .map(|(i, &pos)| (sorted[i].id.clone(), synthesized[pos].0.id.clone()))
        .collect();

    synthesized.sort_by(|(a, _), (b, _)| {
        a.earliest_appearance()
            .cmp(&b.earliest_appearance())
            .then_with(|| a.candidate_ids().cmp(&b.candidate_ids()))
    });
    let (opinions, merges): (Vec<Opinion>, Vec<MergeRecord>) = synthesized.into_iter().unzip();

    tracing::debug!(
        candidates = sorted.len(),
        opinions = opinions.len(),
        evolution_edges = evolution_edges.len(),
        "merge complete"
    );

    Ok(MergeOutcome {
        opinions,
        merges,
        id_map,
        evolution_edges,
    })
}

/// Build one canonical opinion from a non-empty group sorted by candidate id.
fn synthesize(group: &[&OpinionCandidate]) -> (Opinion, MergeRecord) {
    let primary = group
        .iter()
        .copied()
        .reduce(|best, c| {
            if c.confidence.total_cmp(&best.confidence).is_gt() {
                c
            } else {
                best
            }
        })
        .unwrap_or(group[0]);

    let text_fields: [(&str, fn(&OpinionCandidate) -> String); 2] = [
        ("title", |c| c.title.clone()),
        ("description", |c| c.description.clone()),
    ];
    let mut conflicts = Vec::new();
    for (field, value) in text_fields {
        let values: BTreeSet<String> = group.iter().map(|c| value(c)).collect();
        if values.len() > 1 {
            conflicts.push(ConflictResolution {
                field: field.to_owned(),
                values: values.into_iter().collect(),
                method: ResolutionMethod::HighestConfidence,
                chosen: value(primary),
                confidence: primary.confidence,
            });
        }
    }

    let (category, category_conflict) = majority_category(group);
    conflicts.extend(category_conflict);

    let per_candidate: Vec<BTreeSet<String>> = group.iter().map(|c| keyword_set(c)).collect();
    let keywords: BTreeSet<String> = per_candidate.iter().flatten().cloned().collect();
    if per_candidate.iter().any(|k| *k != keywords) {
        conflicts.push(ConflictResolution {
            field: "keywords".to_owned(),
            values: per_candidate
                .iter()
                .map(|k| k.iter().cloned().collect::<Vec<_>>().join(", "))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            method: ResolutionMethod::Union,
            chosen: keywords.iter().cloned().collect::<Vec<_>>().join(", "),
            confidence: 1.0,
        });
    }

    let mut appearances: Vec<OpinionAppearance> = group
        .iter()
        .map(|c| OpinionAppearance {
            source_unit_id: c.source_unit_id.clone(),
            source_unit_title: c.source_unit_title.clone(),
            source_unit_date: c.source_unit_date,
            speakers: c.speakers.clone(),
            content: c.content.clone(),
            candidate_id: c.id.clone(),
        })
        .collect();
    appearances.sort_by(|a, b| {
        (a.source_unit_date, &a.source_unit_id, &a.candidate_id).cmp(&(
            b.source_unit_date,
            &b.source_unit_id,
            &b.candidate_id,
        ))
    });

    let id = Uuid::new_v4().to_string();
    let rationale = if group.len() == 1 {
        "single candidate, no merge".to_owned()
    } else {
        format!(
            "merged {} candidates linked by SAME relationships (transitive closure); \
             title and description from {}",
            group.len(),
            primary.id
        )
    };
    let record = MergeRecord {
        source_candidate_ids: group.iter().map(|c| c.id.clone()).collect(),
        opinion_id: id.clone(),
        rationale,
        conflicts,
    };

    let opinion = Opinion {
        id,
        title: primary.title.clone(),
        description: primary.description.clone(),
        category,
        appearances,
        related_opinion_ids: BTreeSet::new(),
        evolution_chain_id: None,
        contradicts_opinion_id: None,
        keywords,
        provenance: vec![record.clone()],
    };
    (opinion, record)
}

/// Most frequent category; among tied categories the one carried by the
/// earliest candidate (timestamp, then id) wins.
fn majority_category(group: &[&OpinionCandidate]) -> (CategoryId, Option<ConflictResolution>) {
    let mut counts: BTreeMap<&CategoryId, usize> = BTreeMap::new();
    for c in group {
        *counts.entry(&c.category).or_default() += 1;
    }
    let top = counts.values().copied().max().unwrap_or(0);

    let mut by_age: Vec<&&OpinionCandidate> = group.iter().collect();
    by_age.sort_by(|a, b| (a.source_unit_date, &a.id).cmp(&(b.source_unit_date, &b.id)));
    let chosen = by_age
        .iter()
        .map(|c| &c.category)
        .find(|cat| counts.get(cat) == Some(&top))
        .unwrap_or(&group[0].category)
        .clone();

    if counts.len() < 2 {
        return (chosen, None);
    }
    #[allow(clippy::cast_precision_loss)]
    let confidence = top as f32 / group.len() as f32;
    let conflict = ConflictResolution {
        field: "category".to_owned(),
        values: counts.keys().map(ToString::to_string).collect(),
        method: ResolutionMethod::Majority,
        chosen: chosen.to_string(),
        confidence,
    };
    (chosen, Some(conflict))
}

/// An opinion records one contradiction; the first recorded one wins.
fn record_contradiction(opinion: &mut Opinion, other: String) {
    match &opinion.contradicts_opinion_id {
        None => opinion.contradicts_opinion_id = Some(other),
        Some(kept) if *kept == other => {}
        Some(kept) => tracing::debug!(
            opinion = %opinion.id,
            kept = %kept,
            dropped = %other,
            "opinion already contradicts another, dropping contradiction"
        ),
    }
}

fn keyword_set(candidate: &OpinionCandidate) -> BTreeSet<String> {
    candidate
        .keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}

#[cfg(test)]
#[path = "merge_test.rs"]
mod tests;
