//! Multi-facet similarity between opinion candidates and average-linkage
//! clustering within a category.
//!
//! All accumulation runs over ordered maps so identical inputs produce
//! bit-identical scores, and clustering breaks ties by candidate id order.

use std::collections::{BTreeMap, BTreeSet};

use optrack_core::{CategoryId, OpinionCandidate, SimilarityWeights, Stance, Tuning};
use serde::Serialize;

const STOPWORDS: &[&str] = &[
    "a", "about", "all", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "do",
    "for", "from", "has", "have", "he", "i", "if", "in", "is", "it", "its", "just", "more", "not",
    "of", "on", "or", "so", "than", "that", "the", "their", "there", "they", "this", "to", "very",
    "was", "we", "were", "what", "will", "with", "would", "you",
];

/// Days over which temporal proximity decays to one half.
const TEMPORAL_HALF_LIFE_DAYS: f64 = 30.0;

/// Four independent facet scores for one candidate pair, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SimilarityVector {
    pub content: f32,
    pub context: f32,
    pub speaker_pattern: f32,
    pub keyword: f32,
}

impl SimilarityVector {
    #[must_use]
    pub fn combined(&self, weights: &SimilarityWeights) -> f32 {
        (self.content * weights.content
            + self.context * weights.context
            + self.speaker_pattern * weights.speaker_pattern
            + self.keyword * weights.keyword)
            .clamp(0.0, 1.0)
    }

    /// Human-readable facet summary used as evidence text.
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "content {:.2}, context {:.2}, speaker pattern {:.2}, keyword {:.2}",
            self.content, self.context, self.speaker_pattern, self.keyword
        )
    }
}

/// Precomputed token statistics for one candidate.
struct Profile<'a> {
    candidate: &'a OpinionCandidate,
    text_tf: BTreeMap<String, f64>,
    excerpt_tf: BTreeMap<String, f64>,
    keywords: BTreeSet<String>,
}

impl<'a> Profile<'a> {
    fn new(candidate: &'a OpinionCandidate) -> Self {
        Self {
            candidate,
            text_tf: term_frequencies(&candidate.text()),
            excerpt_tf: term_frequencies(&candidate.content),
            keywords: candidate
                .keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }
}

/// Similarity of two candidates.
#[must_use]
pub fn score(a: &OpinionCandidate, b: &OpinionCandidate) -> SimilarityVector {
    score_profiles(&Profile::new(a), &Profile::new(b))
}

#[allow(clippy::cast_possible_truncation)]
fn score_profiles(a: &Profile<'_>, b: &Profile<'_>) -> SimilarityVector {
    let content = match (&a.candidate.embedding, &b.candidate.embedding) {
        (Some(ea), Some(eb)) if ea.len() == eb.len() && !ea.is_empty() => {
            embedding_cosine(ea, eb)
        }
        _ => tf_cosine(&a.text_tf, &b.text_tf),
    };

    let excerpt = tf_cosine(&a.excerpt_tf, &b.excerpt_tf);
    let seconds = (a.candidate.source_unit_date - b.candidate.source_unit_date)
        .num_seconds()
        .unsigned_abs();
    #[allow(clippy::cast_precision_loss)]
    let days = seconds as f64 / 86_400.0;
    let temporal = 1.0 / (1.0 + days / TEMPORAL_HALF_LIFE_DAYS);
    let context = 0.7 * excerpt + 0.3 * temporal;

    SimilarityVector {
        content: content.clamp(0.0, 1.0) as f32,
        context: context.clamp(0.0, 1.0) as f32,
        speaker_pattern: speaker_pattern(a.candidate, b.candidate) as f32,
        keyword: jaccard(&a.keywords, &b.keywords) as f32,
    }
}

/// Pairwise scores for every candidate of one partition.
///
/// Candidates are held in ascending id order; indices used by
/// [`PartitionScores::cluster`] and [`PartitionScores::vector`] refer to
/// that order.
pub struct PartitionScores<'a> {
    candidates: Vec<&'a OpinionCandidate>,
    vectors: Vec<Vec<SimilarityVector>>,
    combined: Vec<Vec<f32>>,
}

impl<'a> PartitionScores<'a> {
    #[must_use]
    pub fn new(candidates: &'a [OpinionCandidate], weights: &SimilarityWeights) -> Self {
        let mut sorted: Vec<&OpinionCandidate> = candidates.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));
        let profiles: Vec<Profile<'_>> = sorted.iter().map(|c| Profile::new(c)).collect();

        let n = sorted.len();
        let mut vectors = vec![vec![SimilarityVector::default(); n]; n];
        let mut combined = vec![vec![0.0f32; n]; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let v = score_profiles(&profiles[i], &profiles[j]);
                let c = v.combined(weights);
                vectors[i][j] = v;
                vectors[j][i] = v;
                combined[i][j] = c;
                combined[j][i] = c;
            }
        }

        Self {
            candidates: sorted,
            vectors,
            combined,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    #[must_use]
    pub fn candidate(&self, idx: usize) -> &'a OpinionCandidate {
        self.candidates[idx]
    }

    #[must_use]
    pub fn vector(&self, i: usize, j: usize) -> SimilarityVector {
        self.vectors[i][j]
    }

    #[must_use]
    pub fn combined(&self, i: usize, j: usize) -> f32 {
        self.combined[i][j]
    }

    /// Average-linkage agglomerative clustering cut at `threshold`.
    ///
    /// Repeatedly merges the two clusters with the highest mean pairwise
    /// score while that score is at least `threshold`. Equal scores resolve
    /// to the pair whose members come first in id order. Returns disjoint
    /// groups of indices, each sorted, ordered by their first member.
    #[must_use]
    pub fn cluster(&self, threshold: f32) -> Vec<Vec<usize>> {
        let n = self.len();
        let mut members: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
        let mut active = vec![true; n];
        let mut link: Vec<Vec<f64>> = (0..n)
            .map(|i| (0..n).map(|j| f64::from(self.combined[i][j])).collect())
            .collect();

        loop {
            let mut best: Option<(usize, usize, f64)> = None;
            for i in 0..n {
                if !active[i] {
                    continue;
                }
                for j in (i + 1)..n {
                    if !active[j] {
                        continue;
                    }
                    let s = link[i][j];
                    if s + 1e-9 < f64::from(threshold) {
                        continue;
                    }
                    if best.is_none_or(|(_, _, b)| s > b + 1e-12) {
                        best = Some((i, j, s));
                    }
                }
            }
            let Some((keep, absorb, _)) = best else {
                break;
            };

            #[allow(clippy::cast_precision_loss)]
            let (size_keep, size_absorb) =
                (members[keep].len() as f64, members[absorb].len() as f64);
            for k in 0..n {
                if !active[k] || k == keep || k == absorb {
                    continue;
                }
                let merged = (size_keep * link[keep][k] + size_absorb * link[absorb][k])
                    / (size_keep + size_absorb);
                link[keep][k] = merged;
                link[k][keep] = merged;
            }
            let moved = std::mem::take(&mut members[absorb]);
            members[keep].extend(moved);
            members[keep].sort_unstable();
            active[absorb] = false;
        }

        let mut groups: Vec<Vec<usize>> = members
            .into_iter()
            .zip(active)
            .filter_map(|(m, a)| a.then_some(m))
            .collect();
        groups.sort_by_key(|g| g.first().copied().unwrap_or(usize::MAX));
        groups
    }
}

/// Group candidates of `candidates` into clusters at `threshold`.
#[must_use]
pub fn cluster<'a>(
    candidates: &'a [OpinionCandidate],
    weights: &SimilarityWeights,
    threshold: f32,
) -> Vec<Vec<&'a OpinionCandidate>> {
    let scores = PartitionScores::new(candidates, weights);
    scores
        .cluster(threshold)
        .into_iter()
        .map(|g| g.into_iter().map(|i| scores.candidate(i)).collect())
        .collect()
}

/// Whether `score` falls in the band around the merge threshold that is
/// referred to the oracle.
#[must_use]
pub fn is_borderline(score: f32, tuning: &Tuning) -> bool {
    score >= tuning.merge_threshold - tuning.borderline_margin
        && score < tuning.merge_threshold + tuning.borderline_margin
}

/// Split candidates by their category label. Within each partition the
/// candidates are sorted by id.
#[must_use]
pub fn partition_by_category(
    candidates: impl IntoIterator<Item = OpinionCandidate>,
) -> BTreeMap<CategoryId, Vec<OpinionCandidate>> {
    let mut partitions: BTreeMap<CategoryId, Vec<OpinionCandidate>> = BTreeMap::new();
    for c in candidates {
        partitions.entry(c.category.clone()).or_default().push(c);
    }
    for list in partitions.values_mut() {
        list.sort_by(|a, b| a.id.cmp(&b.id));
    }
    partitions
}

/// The stance most of a candidate's speakers hold, if there is a strict majority.
#[must_use]
pub fn dominant_stance(candidate: &OpinionCandidate) -> Option<Stance> {
    let mut counts: BTreeMap<Stance, usize> = BTreeMap::new();
    for s in &candidate.speakers {
        *counts.entry(s.stance).or_default() += 1;
    }
    let mut ranked: Vec<(Stance, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    match ranked.as_slice() {
        [] => None,
        [(only, _)] => Some(*only),
        [(first, n1), (_, n2), ..] if n1 > n2 => Some(*first),
        _ => None,
    }
}

pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2 && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

fn term_frequencies(text: &str) -> BTreeMap<String, f64> {
    let mut tf = BTreeMap::new();
    for token in tokenize(text) {
        *tf.entry(token).or_insert(0.0) += 1.0;
    }
    tf
}

fn tf_cosine(a: &BTreeMap<String, f64>, b: &BTreeMap<String, f64>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let dot: f64 = a
        .iter()
        .filter_map(|(t, wa)| b.get(t).map(|wb| wa * wb))
        .sum();
    let norm_a = a.values().map(|w| w * w).sum::<f64>().sqrt();
    let norm_b = b.values().map(|w| w * w).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn embedding_cosine(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum();
    let norm_a = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let ratio = a.intersection(b).count() as f64 / union as f64;
    ratio
}

/// Speaker overlap weighted by how often shared speakers agree.
fn speaker_pattern(a: &OpinionCandidate, b: &OpinionCandidate) -> f64 {
    let ids_a: BTreeSet<String> = a.speakers.iter().map(|s| s.speaker_id.clone()).collect();
    let ids_b: BTreeSet<String> = b.speakers.iter().map(|s| s.speaker_id.clone()).collect();
    let shared: Vec<&String> = ids_a.intersection(&ids_b).collect();
    if shared.is_empty() {
        return 0.0;
    }
    let agreeing = shared
        .iter()
        .filter(|id| {
            let sa = a.stance_of(id).map(|s| s.stance);
            let sb = b.stance_of(id).map(|s| s.stance);
            sa.is_some() && sa == sb
        })
        .count();
    #[allow(clippy::cast_precision_loss)]
    let agreement = agreeing as f64 / shared.len() as f64;
    jaccard(&ids_a, &ids_b) * (0.5 + 0.5 * agreement)
}

#[cfg(test)]
#[path = "similarity_test.rs"]
mod tests;
