use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::candidate::CategoryId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvolutionStep {
    Initial,
    Refinement,
    Expansion,
    Contraction,
    Pivot,
    Reversal,
}

impl EvolutionStep {
    /// Transition text used when the edge evidence offers none.
    #[must_use]
    pub fn default_transition(self) -> &'static str {
        match self {
            EvolutionStep::Initial => "First recorded appearance of the opinion",
            EvolutionStep::Refinement => "Refined the opinion with more nuanced perspective",
            EvolutionStep::Expansion => {
                "Expanded on the original opinion with additional details or examples"
            }
            EvolutionStep::Contraction => "Condensed or focused the opinion on key aspects",
            EvolutionStep::Pivot => "Significantly changed position from the original opinion",
            EvolutionStep::Reversal => "Reversed the original position",
        }
    }
}

impl std::fmt::Display for EvolutionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EvolutionStep::Initial => "initial",
            EvolutionStep::Refinement => "refinement",
            EvolutionStep::Expansion => "expansion",
            EvolutionStep::Contraction => "contraction",
            EvolutionStep::Pivot => "pivot",
            EvolutionStep::Reversal => "reversal",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionNode {
    pub opinion_id: String,
    pub source_unit_id: String,
    pub source_unit_date: DateTime<Utc>,
    pub step: EvolutionStep,
    pub step_confidence: f32,
    pub transition: String,
}

/// Chronological sequence of canonical opinions linked by EVOLUTION edges.
///
/// Invariants: nodes are ordered by earliest appearance and no opinion id
/// occurs twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionChain {
    pub id: String,
    pub category: CategoryId,
    pub nodes: Vec<EvolutionNode>,
}

impl EvolutionChain {
    #[must_use]
    pub fn opinion_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.opinion_id.as_str()).collect()
    }

    #[must_use]
    pub fn contains(&self, opinion_id: &str) -> bool {
        self.nodes.iter().any(|n| n.opinion_id == opinion_id)
    }
}
