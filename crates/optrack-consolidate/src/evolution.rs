//! Evolution chains over canonical opinions.
//!
//! EVOLUTION edges form a directed graph held as an arena: opinions are
//! nodes addressed by index, edges are index pairs. The graph must be
//! acyclic; a cycle is reported with the ids along it. Chains are the
//! maximal root-to-sink paths.

use std::collections::BTreeMap;

use optrack_core::{
    CategoryId, EvidenceKind, EvolutionChain, EvolutionNode, EvolutionStep, Opinion,
    RelationKind, Relationship,
};
use uuid::Uuid;

use crate::error::ConsolidateError;

/// Cue words per step, in the order they are tested.
const STEP_CUES: &[(EvolutionStep, &[&str])] = &[
    (EvolutionStep::Reversal, &["revers", "opposite", "flip", "u-turn"]),
    (
        EvolutionStep::Pivot,
        &[
            "pivot",
            "shift",
            "changed position",
            "previously thought",
            "than i thought",
            "no longer",
            "reconsider",
        ],
    ),
    (
        EvolutionStep::Contraction,
        &["narrow", "condense", "focus", "scaled back"],
    ),
    (
        EvolutionStep::Expansion,
        &["expand", "broaden", "additional", "extend", "elaborat"],
    ),
    (
        EvolutionStep::Refinement,
        &["refine", "nuance", "clarif", "adjust", "moderat"],
    ),
];

const DEFAULT_STEP_CONFIDENCE: f32 = 0.3;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Index-addressed evolution graph over one partition's opinions.
struct Graph<'a> {
    opinions: &'a [Opinion],
    /// Outgoing `(target, edge)` pairs per node, sorted by target.
    out: Vec<Vec<(usize, usize)>>,
    in_degree: Vec<usize>,
    edges: Vec<&'a Relationship>,
}

impl<'a> Graph<'a> {
    fn empty(opinions: &'a [Opinion]) -> Self {
        Self {
            opinions,
            out: vec![Vec::new(); opinions.len()],
            in_degree: vec![0; opinions.len()],
            edges: Vec::new(),
        }
    }

    fn new(
        opinions: &'a [Opinion],
        relationships: &'a [Relationship],
    ) -> Result<Self, ConsolidateError> {
        let index: BTreeMap<&str, usize> = opinions
            .iter()
            .enumerate()
            .map(|(i, o)| (o.id.as_str(), i))
            .collect();
        let resolve = |id: &str| {
            index
                .get(id)
                .copied()
                .ok_or_else(|| ConsolidateError::UnresolvedOpinionId {
                    opinion_id: id.to_owned(),
                })
        };

        let mut graph = Self::empty(opinions);
        for rel in relationships.iter().filter(|r| r.kind == RelationKind::Evolution) {
            graph.add(resolve(&rel.source_id)?, resolve(&rel.target_id)?, rel);
        }
        graph.sort_targets();
        Ok(graph)
    }

    /// The same edges, each pointing from the opinion that appeared first
    /// to the one that appeared later. Edges between opinions first seen on
    /// the same date have no direction and are dropped.
    fn chronological(&self, category: &CategoryId) -> Self {
        let mut graph = Self::empty(self.opinions);
        for (s, targets) in self.out.iter().enumerate() {
            for &(t, e) in targets {
                let (from, to) = (&self.opinions[s], &self.opinions[t]);
                match from.earliest_appearance().zip(to.earliest_appearance()) {
                    Some((a, b)) if a < b => graph.add(s, t, self.edges[e]),
                    Some((a, b)) if a > b => {
                        tracing::debug!(
                            source = %from.id,
                            target = %to.id,
                            "evolution edge runs backwards in time, reversed"
                        );
                        graph.add(t, s, self.edges[e]);
                    }
                    _ => tracing::warn!(
                        category = %category,
                        source = %from.id,
                        target = %to.id,
                        "evolution edge between opinions first seen on the same date, dropped"
                    ),
                }
            }
        }
        graph.sort_targets();
        graph
    }

    fn add(&mut self, s: usize, t: usize, rel: &'a Relationship) {
        if self.out[s].iter().any(|&(existing, _)| existing == t) {
            return;
        }
        self.out[s].push((t, self.edges.len()));
        self.in_degree[t] += 1;
        self.edges.push(rel);
    }

    fn sort_targets(&mut self) {
        for targets in &mut self.out {
            targets.sort_unstable();
        }
    }

    /// First cycle found by depth-first search, closed with its start node.
    fn find_cycle(&self) -> Option<Vec<usize>> {
        let mut marks = vec![Mark::Unvisited; self.opinions.len()];
        let mut path = Vec::new();
        for start in 0..self.opinions.len() {
            if marks[start] == Mark::Unvisited {
                if let Some(cycle) = self.visit(start, &mut marks, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn visit(&self, v: usize, marks: &mut [Mark], path: &mut Vec<usize>) -> Option<Vec<usize>> {
        marks[v] = Mark::InProgress;
        path.push(v);
        for &(w, _) in &self.out[v] {
            match marks[w] {
                Mark::InProgress => {
                    let start = path.iter().position(|&p| p == w).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(w);
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = self.visit(w, marks, path) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }
        path.pop();
        marks[v] = Mark::Done;
        None
    }

    /// Root-to-sink paths as `(node, edge from the previous node)` lists, at
    /// most `limit`.
    /// Returns whether enumeration stopped early.
    fn paths(&self, limit: usize) -> (Vec<Vec<(usize, Option<usize>)>>, bool) {
        let mut paths = Vec::new();
        let mut truncated = false;
        for root in 0..self.opinions.len() {
            if self.in_degree[root] == 0 && !self.out[root].is_empty() {
                self.walk(root, None, &mut Vec::new(), &mut paths, limit, &mut truncated);
            }
        }
        (paths, truncated)
    }

    fn walk(
        &self,
        v: usize,
        via: Option<usize>,
        path: &mut Vec<(usize, Option<usize>)>,
        paths: &mut Vec<Vec<(usize, Option<usize>)>>,
        limit: usize,
        truncated: &mut bool,
    ) {
        if paths.len() >= limit {
            *truncated = true;
            return;
        }
        path.push((v, via));
        if self.out[v].is_empty() {
            paths.push(path.clone());
        } else {
            for &(w, edge) in &self.out[v] {
                self.walk(w, Some(edge), path, paths, limit, truncated);
            }
        }
        path.pop();
    }
}

/// Build the evolution chains of one category partition.
///
/// Only EVOLUTION relationships are considered. Once the graph is known to
/// be acyclic, edges are oriented by each opinion's earliest appearance so
/// every chain advances strictly in time. At most `max_paths` chains are
/// produced.
///
/// # Errors
///
/// - [`ConsolidateError::UnresolvedOpinionId`] when an edge names an
///   opinion that is not in `opinions`.
/// - [`ConsolidateError::CyclicEvolution`] when the edges contain a cycle.
pub fn build_chains(
    category: &CategoryId,
    opinions: &[Opinion],
    edges: &[Relationship],
    max_paths: usize,
) -> Result<Vec<EvolutionChain>, ConsolidateError> {
    let graph = Graph::new(opinions, edges)?;

    if let Some(cycle) = graph.find_cycle() {
        return Err(ConsolidateError::CyclicEvolution {
            category: category.to_string(),
            ids: cycle.iter().map(|&i| opinions[i].id.clone()).collect(),
        });
    }

    let graph = graph.chronological(category);
    let (paths, truncated) = graph.paths(max_paths);
    if truncated {
        tracing::warn!(
            category = %category,
            max_paths,
            "evolution path enumeration truncated"
        );
    }

    let chains: Vec<EvolutionChain> = paths
        .into_iter()
        .map(|path| chain_from_path(&graph, category, &path))
        .collect();
    tracing::debug!(category = %category, chains = chains.len(), "evolution chains built");
    Ok(chains)
}

fn chain_from_path(
    graph: &Graph<'_>,
    category: &CategoryId,
    path: &[(usize, Option<usize>)],
) -> EvolutionChain {
    let nodes = path
        .iter()
        .enumerate()
        .map(|(pos, &(idx, via))| {
            let opinion = &graph.opinions[idx];
            let first = opinion
                .appearances
                .iter()
                .min_by_key(|a| (a.source_unit_date, a.source_unit_id.as_str()));
            let (step, step_confidence, transition) = if pos == 0 {
                let step = EvolutionStep::Initial;
                (step, 1.0, step.default_transition().to_owned())
            } else {
                classify_step(via.map(|e| graph.edges[e]))
            };
            EvolutionNode {
                opinion_id: opinion.id.clone(),
                source_unit_id: first.map(|a| a.source_unit_id.clone()).unwrap_or_default(),
                source_unit_date: first.map(|a| a.source_unit_date).unwrap_or_default(),
                step,
                step_confidence,
                transition,
            }
        })
        .collect();

    EvolutionChain {
        id: Uuid::new_v4().to_string(),
        category: category.clone(),
        nodes,
    }
}

/// Step classification of a non-initial node from the evidence on the edge
/// into it, as `(step, confidence, transition)`.
pub fn classify_step(edge: Option<&Relationship>) -> (EvolutionStep, f32, String) {
    let default = (
        EvolutionStep::Refinement,
        DEFAULT_STEP_CONFIDENCE,
        EvolutionStep::Refinement.default_transition().to_owned(),
    );
    let Some(edge) = edge.filter(|e| !e.evidence.is_empty()) else {
        return default;
    };

    let text = edge.evidence_text().to_lowercase();
    for (step, cues) in STEP_CUES {
        let hits = cues.iter().filter(|cue| text.contains(*cue)).count();
        if hits == 0 {
            continue;
        }
        #[allow(clippy::cast_precision_loss)]
        let confidence = (0.5 + 0.1 * hits as f32).min(0.9);
        let transition = edge
            .evidence
            .iter()
            .find(|e| e.kind == EvidenceKind::Oracle)
            .map_or_else(|| step.default_transition().to_owned(), |e| e.description.clone());
        return (*step, confidence, transition);
    }
    default
}

/// Set `evolution_chain_id` on every opinion that appears in a chain. An
/// opinion on several chains keeps the first.
pub fn assign_chain_ids(opinions: &mut [Opinion], chains: &[EvolutionChain]) {
    for opinion in opinions.iter_mut() {
        opinion.evolution_chain_id = chains
            .iter()
            .find(|c| c.contains(&opinion.id))
            .map(|c| c.id.clone());
    }
}

#[cfg(test)]
#[path = "evolution_test.rs"]
mod tests;
