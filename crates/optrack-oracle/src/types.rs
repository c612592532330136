use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use optrack_core::{OpinionCandidate, Stance};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::OracleError;

/// Longest excerpt, in characters, sent for a single candidate.
pub const EXCERPT_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonQuestion {
    /// Do these candidates express the same opinion?
    SameOpinion,
    /// Did the later candidate evolve from, or contradict, the earlier one?
    EvolutionOrContradiction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleSpeaker {
    pub speaker_id: String,
    pub stance: Stance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// The slice of a candidate the oracle gets to see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleCandidate {
    pub id: String,
    pub title: String,
    pub description: String,
    pub source_unit_date: DateTime<Utc>,
    pub speakers: Vec<OracleSpeaker>,
    pub excerpt: String,
}

impl OracleCandidate {
    #[must_use]
    pub fn from_candidate(candidate: &OpinionCandidate) -> Self {
        Self {
            id: candidate.id.clone(),
            title: candidate.title.clone(),
            description: candidate.description.clone(),
            source_unit_date: candidate.source_unit_date,
            speakers: candidate
                .speakers
                .iter()
                .map(|s| OracleSpeaker {
                    speaker_id: s.speaker_id.clone(),
                    stance: s.stance,
                    reasoning: s.reasoning.clone(),
                })
                .collect(),
            excerpt: truncate_chars(&candidate.content, EXCERPT_LIMIT),
        }
    }
}

/// A comparison question over a pair or small batch of candidates.
///
/// Serialization of this type is the exact payload hashed for the response
/// cache, so field order and content must stay deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleRequest {
    pub question: ComparisonQuestion,
    pub category: String,
    pub candidates: Vec<OracleCandidate>,
}

impl OracleRequest {
    #[must_use]
    pub fn pair(
        question: ComparisonQuestion,
        earlier: &OpinionCandidate,
        later: &OpinionCandidate,
    ) -> Self {
        Self {
            question,
            category: earlier.category.as_str().to_string(),
            candidates: vec![
                OracleCandidate::from_candidate(earlier),
                OracleCandidate::from_candidate(later),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OracleRelation {
    Same,
    Related,
    Evolution,
    Contradiction,
    NoRelation,
}

/// A validated oracle answer. Confidence is always finite and within [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleVerdict {
    pub relation: OracleRelation,
    pub confidence: f32,
    pub rationale: String,
}

/// Wire shape of an oracle reply, discriminated by `status`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum OracleReply {
    Ok {
        relation: OracleRelation,
        confidence: f64,
        #[serde(default)]
        rationale: String,
    },
    Error {
        #[serde(default = "unknown_kind")]
        kind: String,
        #[serde(default)]
        message: String,
    },
}

fn unknown_kind() -> String {
    "unknown".to_string()
}

impl OracleReply {
    /// Validate the reply and turn it into a verdict.
    ///
    /// # Errors
    ///
    /// [`OracleError::Rejected`] for an error reply,
    /// [`OracleError::MalformedResponse`] for an out-of-range confidence.
    pub fn into_verdict(self) -> Result<OracleVerdict, OracleError> {
        match self {
            OracleReply::Ok {
                relation,
                confidence,
                rationale,
            } => {
                if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
                    return Err(OracleError::malformed(format!(
                        "confidence {confidence} is outside [0, 1]"
                    )));
                }
                #[allow(clippy::cast_possible_truncation)]
                let confidence = confidence as f32;
                Ok(OracleVerdict {
                    relation,
                    confidence,
                    rationale: rationale.trim().to_string(),
                })
            }
            OracleReply::Error { kind, message } => Err(OracleError::Rejected { kind, message }),
        }
    }
}

/// Parse raw reply text into a verdict, unwrapping a Markdown code fence if present.
///
/// # Errors
///
/// Returns [`OracleError::MalformedResponse`] when the text is not a valid
/// reply, or [`OracleError::Rejected`] when it is an error reply.
pub fn parse_reply(raw: &str) -> Result<OracleVerdict, OracleError> {
    let body = strip_code_fence(raw);
    let reply: OracleReply =
        serde_json::from_str(body).map_err(|e| OracleError::malformed(e.to_string()))?;
    reply.into_verdict()
}

fn strip_code_fence(raw: &str) -> &str {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    let fence =
        FENCE.get_or_init(|| Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*\s*\n(.*?)\n?\s*```\s*$").ok());
    match fence.as_ref().and_then(|re| re.captures(raw)) {
        Some(caps) => caps.get(1).map_or(raw, |m| m.as_str()),
        None => raw.trim(),
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
