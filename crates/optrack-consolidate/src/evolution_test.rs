use std::collections::BTreeSet;

use optrack_core::RelationshipEvidence;
use proptest::prelude::*;

use super::*;
use crate::test_support::opinion;

fn economy() -> CategoryId {
    CategoryId::new("economy")
}

fn evolves(source: &str, target: &str, evidence: &str) -> Relationship {
    Relationship::new(
        source,
        target,
        RelationKind::Evolution,
        vec![RelationshipEvidence::new(EvidenceKind::Semantic, evidence, 0.7)],
    )
    .unwrap()
}

#[test]
fn linear_edges_form_one_chain_in_date_order() {
    let opinions = vec![opinion("a", 1, &[]), opinion("b", 3, &[]), opinion("c", 5, &[])];
    let edges = vec![
        evolves("b", "c", "expanded with additional examples"),
        evolves("a", "b", "speaker shifted position"),
    ];
    let chains = build_chains(&economy(), &opinions, &edges, 10).unwrap();

    assert_eq!(chains.len(), 1);
    let chain = &chains[0];
    assert_eq!(chain.opinion_ids(), vec!["a", "b", "c"]);
    let steps: Vec<EvolutionStep> = chain.nodes.iter().map(|n| n.step).collect();
    assert_eq!(
        steps,
        vec![
            EvolutionStep::Initial,
            EvolutionStep::Pivot,
            EvolutionStep::Expansion
        ]
    );
    assert_eq!(chain.nodes[0].source_unit_id, "ep-01");
    assert_eq!(chain.category, economy());
}

#[test]
fn branching_produces_one_chain_per_path() {
    let opinions = vec![opinion("a", 1, &[]), opinion("b", 2, &[]), opinion("c", 3, &[])];
    let edges = vec![evolves("a", "b", "x"), evolves("a", "c", "x")];
    let chains = build_chains(&economy(), &opinions, &edges, 10).unwrap();

    let paths: Vec<Vec<&str>> = chains.iter().map(EvolutionChain::opinion_ids).collect();
    assert_eq!(paths, vec![vec!["a", "b"], vec!["a", "c"]]);
}

#[test]
fn path_enumeration_respects_cap() {
    let opinions = vec![
        opinion("a", 1, &[]),
        opinion("b", 2, &[]),
        opinion("c", 3, &[]),
        opinion("d", 4, &[]),
    ];
    let edges = vec![
        evolves("a", "b", "x"),
        evolves("a", "c", "x"),
        evolves("a", "d", "x"),
    ];
    assert_eq!(build_chains(&economy(), &opinions, &edges, 2).unwrap().len(), 2);
}

#[test]
fn cycle_is_reported_with_its_ids() {
    let opinions = vec![opinion("a", 1, &[]), opinion("b", 2, &[]), opinion("c", 3, &[])];
    let edges = vec![
        evolves("a", "b", "x"),
        evolves("b", "c", "x"),
        evolves("c", "a", "x"),
    ];
    let err = build_chains(&economy(), &opinions, &edges, 10).unwrap_err();
    match err {
        ConsolidateError::CyclicEvolution { category, ids } => {
            assert_eq!(category, "economy");
            assert_eq!(ids, vec!["a", "b", "c", "a"]);
        }
        other => panic!("expected cycle error, got {other:?}"),
    }
}

#[test]
fn edge_to_unknown_opinion_is_rejected() {
    let opinions = vec![opinion("a", 1, &[])];
    let err = build_chains(&economy(), &opinions, &[evolves("a", "zz", "x")], 10).unwrap_err();
    assert!(matches!(
        err,
        ConsolidateError::UnresolvedOpinionId { ref opinion_id } if opinion_id == "zz"
    ));
}

#[test]
fn non_evolution_edges_are_ignored() {
    let opinions = vec![opinion("a", 1, &[]), opinion("b", 2, &[])];
    let mut related = evolves("a", "b", "x");
    related.kind = RelationKind::Related;
    assert!(build_chains(&economy(), &opinions, &[related], 10)
        .unwrap()
        .is_empty());
}

#[test]
fn edge_against_chronology_is_reversed_and_keeps_its_evidence() {
    let opinions = vec![opinion("late", 6, &[]), opinion("early", 2, &[])];
    let edges = [evolves("late", "early", "speaker shifted position")];
    let chains = build_chains(&economy(), &opinions, &edges, 10).unwrap();
    assert_eq!(chains[0].opinion_ids(), vec!["early", "late"]);
    assert_eq!(chains[0].nodes[0].step, EvolutionStep::Initial);
    assert_eq!(chains[0].nodes[1].step, EvolutionStep::Pivot);
}

#[test]
fn merged_opinion_reordering_a_path_uses_the_edge_between_neighbours() {
    // "b" merged an early candidate, so it now predates "a" though a -> b.
    let mut b = opinion("b", 5, &[]);
    b.appearances.extend(opinion("b", 1, &[]).appearances);
    let opinions = vec![opinion("a", 3, &[]), b, opinion("c", 7, &[])];
    let edges = vec![
        evolves("a", "b", "narrowed the claim to housing"),
        evolves("a", "c", "expanded with additional examples"),
    ];
    let chains = build_chains(&economy(), &opinions, &edges, 10).unwrap();

    let paths: Vec<Vec<&str>> = chains.iter().map(EvolutionChain::opinion_ids).collect();
    assert_eq!(paths, vec![vec!["b", "a", "c"]]);
    let steps: Vec<EvolutionStep> = chains[0].nodes.iter().map(|n| n.step).collect();
    assert_eq!(
        steps,
        vec![
            EvolutionStep::Initial,
            EvolutionStep::Contraction,
            EvolutionStep::Expansion
        ]
    );
}

#[test]
fn same_date_edge_yields_no_chain() {
    let opinions = vec![opinion("a", 2, &[]), opinion("b", 2, &[]), opinion("c", 4, &[])];
    let edges = vec![evolves("a", "b", "shift"), evolves("b", "c", "shift")];
    let chains = build_chains(&economy(), &opinions, &edges, 10).unwrap();

    let paths: Vec<Vec<&str>> = chains.iter().map(EvolutionChain::opinion_ids).collect();
    assert_eq!(paths, vec![vec!["b", "c"]]);
    for chain in &chains {
        assert!(chain
            .nodes
            .windows(2)
            .all(|w| w[0].source_unit_date < w[1].source_unit_date));
    }
}

#[test]
fn step_defaults_to_low_confidence_refinement() {
    let (step, confidence, transition) = classify_step(None);
    assert_eq!(step, EvolutionStep::Refinement);
    assert!((confidence - 0.3).abs() < 1e-6);
    assert_eq!(transition, EvolutionStep::Refinement.default_transition());

    let (step, confidence, _) = classify_step(Some(&evolves("a", "b", "no cue words here")));
    assert_eq!(step, EvolutionStep::Refinement);
    assert!((confidence - 0.3).abs() < 1e-6);
}

#[test]
fn reversal_cues_win_over_later_steps() {
    let edge = evolves("a", "b", "reversed stance after refining the argument");
    let (step, confidence, _) = classify_step(Some(&edge));
    assert_eq!(step, EvolutionStep::Reversal);
    assert!((confidence - 0.6).abs() < 1e-6);
}

#[test]
fn oracle_rationale_becomes_transition_text() {
    let edge = Relationship::new(
        "a",
        "b",
        RelationKind::Evolution,
        vec![RelationshipEvidence::new(
            EvidenceKind::Oracle,
            "Now expects slower cuts than previously thought",
            0.9,
        )],
    )
    .unwrap();
    let (step, _, transition) = classify_step(Some(&edge));
    assert_eq!(step, EvolutionStep::Pivot);
    assert_eq!(transition, "Now expects slower cuts than previously thought");
}

#[test]
fn chain_ids_are_assigned_first_chain_wins() {
    let mut opinions = vec![
        opinion("a", 1, &[]),
        opinion("b", 2, &[]),
        opinion("c", 3, &[]),
        opinion("lonely", 4, &[]),
    ];
    let edges = vec![evolves("a", "b", "x"), evolves("a", "c", "x")];
    let chains = build_chains(&economy(), &opinions, &edges, 10).unwrap();
    assign_chain_ids(&mut opinions, &chains);

    assert_eq!(opinions[0].evolution_chain_id.as_ref(), Some(&chains[0].id));
    assert_eq!(opinions[1].evolution_chain_id.as_ref(), Some(&chains[0].id));
    assert_eq!(opinions[2].evolution_chain_id.as_ref(), Some(&chains[1].id));
    assert!(opinions[3].evolution_chain_id.is_none());
}

proptest! {
    #[test]
    fn prop_dag_chains_never_repeat_an_opinion(
        n in 2usize..9,
        raw_edges in proptest::collection::vec((0usize..9, 0usize..9), 0..20),
    ) {
        let opinions: Vec<Opinion> = (0..n)
            .map(|i| opinion(&format!("o{i}"), u32::try_from(i % 12).unwrap() + 1, &[]))
            .collect();
        let edges: Vec<Relationship> = raw_edges
            .into_iter()
            .filter(|(a, b)| a < b && *b < n)
            .map(|(a, b)| evolves(&format!("o{a}"), &format!("o{b}"), "shift"))
            .collect();

        let chains = build_chains(&economy(), &opinions, &edges, 1000).unwrap();
        for chain in &chains {
            let ids = chain.opinion_ids();
            let distinct: BTreeSet<&str> = ids.iter().copied().collect();
            prop_assert_eq!(distinct.len(), ids.len());
            prop_assert!(ids.len() >= 2);
            prop_assert!(chain
                .nodes
                .windows(2)
                .all(|w| w[0].source_unit_date < w[1].source_unit_date));
            prop_assert_eq!(chain.nodes[0].step, EvolutionStep::Initial);
        }
    }

    #[test]
    fn prop_closing_a_path_into_a_loop_is_rejected(len in 2usize..7) {
        let opinions: Vec<Opinion> = (0..len)
            .map(|i| opinion(&format!("o{i}"), u32::try_from(i).unwrap() + 1, &[]))
            .collect();
        let mut edges: Vec<Relationship> = (1..len)
            .map(|i| evolves(&format!("o{}", i - 1), &format!("o{i}"), "x"))
            .collect();
        edges.push(evolves(&format!("o{}", len - 1), "o0", "x"));

        let result = build_chains(&economy(), &opinions, &edges, 1000);
        let is_cycle = matches!(result, Err(ConsolidateError::CyclicEvolution { .. }));
        prop_assert!(is_cycle);
    }
}
