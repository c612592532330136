use std::fmt::Write as _;

use crate::types::{ComparisonQuestion, OracleRequest};

pub(crate) const SYSTEM_PROMPT: &str = "You compare opinions extracted from recorded \
conversations. Answer only with a single JSON object and no other text.";

const REPLY_SCHEMA: &str = r#"Reply with exactly one JSON object:
{"status": "ok", "relation": "<SAME|RELATED|EVOLUTION|CONTRADICTION|NO_RELATION>", "confidence": <number between 0 and 1>, "rationale": "<one or two sentences>"}
If you cannot answer, reply with:
{"status": "error", "kind": "<short code>", "message": "<why>"}"#;

/// Render the user message for `request`.
pub(crate) fn render(request: &OracleRequest) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Category: {}", request.category);
    out.push('\n');

    for (idx, c) in request.candidates.iter().enumerate() {
        let _ = writeln!(
            out,
            "Opinion {} (id {}, recorded {}):",
            idx + 1,
            c.id,
            c.source_unit_date.format("%Y-%m-%d")
        );
        let _ = writeln!(out, "  Title: {}", c.title);
        let _ = writeln!(out, "  Description: {}", c.description);
        for s in &c.speakers {
            match &s.reasoning {
                Some(r) => {
                    let _ = writeln!(out, "  Speaker {}: {} ({r})", s.speaker_id, s.stance);
                }
                None => {
                    let _ = writeln!(out, "  Speaker {}: {}", s.speaker_id, s.stance);
                }
            }
        }
        if !c.excerpt.is_empty() {
            let _ = writeln!(out, "  Excerpt: {}", c.excerpt);
        }
        out.push('\n');
    }

    out.push_str(question_text(request.question));
    out.push_str("\n\n");
    out.push_str(REPLY_SCHEMA);
    out
}

fn question_text(question: ComparisonQuestion) -> &'static str {
    match question {
        ComparisonQuestion::SameOpinion => {
            "Do these opinions express the same underlying view? Use SAME if they do, \
RELATED if they concern the same topic but differ in substance, NO_RELATION otherwise."
        }
        ComparisonQuestion::EvolutionOrContradiction => {
            "The opinions are listed oldest first. Use EVOLUTION if the later one develops, \
refines or shifts the earlier view, CONTRADICTION if it takes an opposing position, \
RELATED if they only share a topic, NO_RELATION otherwise. Describe the kind of change \
in the rationale."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OracleCandidate, OracleSpeaker};
    use chrono::TimeZone;
    use optrack_core::Stance;

    fn request(question: ComparisonQuestion) -> OracleRequest {
        OracleRequest {
            question,
            category: "economy".to_string(),
            candidates: vec![OracleCandidate {
                id: "c1".to_string(),
                title: "Rates will fall".to_string(),
                description: "Rates will fall fast this year".to_string(),
                source_unit_date: chrono::Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap(),
                speakers: vec![OracleSpeaker {
                    speaker_id: "alice".to_string(),
                    stance: Stance::Support,
                    reasoning: Some("inflation is cooling".to_string()),
                }],
                excerpt: String::new(),
            }],
        }
    }

    #[test]
    fn render_lists_candidates_and_schema() {
        let text = render(&request(ComparisonQuestion::SameOpinion));
        assert!(text.contains("Category: economy"));
        assert!(text.contains("Opinion 1 (id c1, recorded 2024-01-10)"));
        assert!(text.contains("Speaker alice: support (inflation is cooling)"));
        assert!(text.contains("\"status\": \"ok\""));
        assert!(!text.contains("Excerpt:"));
    }

    #[test]
    fn question_changes_instructions() {
        let same = render(&request(ComparisonQuestion::SameOpinion));
        let evo = render(&request(ComparisonQuestion::EvolutionOrContradiction));
        assert!(same.contains("same underlying view"));
        assert!(evo.contains("oldest first"));
    }
}
