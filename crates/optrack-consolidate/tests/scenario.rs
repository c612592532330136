//! Three candidates across two episodes: one evolves, two are the same opinion.

use chrono::{TimeZone, Utc};
use optrack_consolidate::{build_chains, build_journeys, process_relationships};
use optrack_core::{
    CategoryId, EvidenceKind, EvolutionStep, OpinionCandidate, RelationKind, Relationship,
    RelationshipEvidence, SpeakerStance, Stance,
};

fn candidate(
    id: &str,
    title: &str,
    unit: &str,
    month: u32,
    speaker: &str,
    reasoning: &str,
) -> OpinionCandidate {
    OpinionCandidate {
        id: id.to_owned(),
        title: title.to_owned(),
        description: title.to_owned(),
        category: CategoryId::new("economy"),
        keywords: vec!["rates".to_owned()],
        speakers: vec![SpeakerStance {
            speaker_id: speaker.to_owned(),
            speaker_name: None,
            stance: Stance::Support,
            reasoning: Some(reasoning.to_owned()),
            time_range: None,
        }],
        source_unit_id: unit.to_owned(),
        source_unit_title: format!("Episode {unit}"),
        source_unit_date: Utc.with_ymd_and_hms(2024, month, 10, 0, 0, 0).unwrap(),
        content: String::new(),
        confidence: 0.8,
        embedding: None,
    }
}

#[test]
fn evolution_and_merge_scenario() {
    let candidates = vec![
        candidate(
            "c1",
            "Rates will fall fast",
            "ep-jan",
            1,
            "alice",
            "inflation is collapsing",
        ),
        candidate(
            "c2",
            "Rates falling but slower than I thought",
            "ep-mar",
            3,
            "alice",
            "services inflation is sticky",
        ),
        candidate(
            "c3",
            "Rates falling but slower than I thought",
            "ep-mar",
            3,
            "bob",
            "wage growth",
        ),
    ];
    let relationships = vec![
        Relationship::new(
            "c1",
            "c2",
            RelationKind::Evolution,
            vec![RelationshipEvidence::new(
                EvidenceKind::Oracle,
                "Speaker shifted: cuts are coming slower than previously thought",
                0.85,
            )],
        )
        .unwrap(),
        Relationship::new(
            "c2",
            "c3",
            RelationKind::Same,
            vec![RelationshipEvidence::new(
                EvidenceKind::Semantic,
                "identical wording",
                0.95,
            )],
        )
        .unwrap(),
    ];

    let merged = process_relationships(&candidates, &relationships).unwrap();
    assert_eq!(merged.opinions.len(), 2);
    let first = &merged.opinions[0];
    let combined = &merged.opinions[1];
    assert_eq!(first.candidate_ids(), vec!["c1"]);
    assert_eq!(combined.candidate_ids(), vec!["c2", "c3"]);
    assert_eq!(combined.appearances.len(), 2);

    let chains = build_chains(
        &CategoryId::new("economy"),
        &merged.opinions,
        &merged.evolution_edges,
        1000,
    )
    .unwrap();
    assert_eq!(chains.len(), 1);
    let chain = &chains[0];
    assert_eq!(
        chain.opinion_ids(),
        vec![first.id.as_str(), combined.id.as_str()]
    );
    assert_eq!(chain.nodes[0].step, EvolutionStep::Initial);
    assert_eq!(chain.nodes[1].step, EvolutionStep::Pivot);

    let journeys = build_journeys(&merged.opinions, &chains);
    let alice = &journeys["alice"];
    assert_eq!(alice.nodes.len(), 2);
    let march = &alice.nodes[1];
    assert_eq!(march.source_unit_id, "ep-mar");
    assert!(march.reasoning_changed);
    assert!(!march.stance_changed);
    assert_eq!(march.continues_from.as_deref(), Some(first.id.as_str()));

    let bob = &journeys["bob"];
    assert_eq!(bob.nodes.len(), 1);
    assert!(!bob.nodes[0].reasoning_changed);
}
