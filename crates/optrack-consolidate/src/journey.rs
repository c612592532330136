//! Per-speaker stance timelines.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use optrack_core::{
    ContentiousPair, EvolutionChain, Opinion, SpeakerJourney, SpeakerJourneyNode, Stance,
    StanceShift,
};

use crate::classify::normalized;

struct Sighting<'a> {
    opinion_id: &'a str,
    source_unit_id: &'a str,
    source_unit_date: DateTime<Utc>,
    stance: Stance,
    reasoning: Option<&'a str>,
}

/// Build one journey per speaker found in the appearances of `opinions`.
///
/// Stance changes compare a node with the same speaker's previous node on
/// the same opinion only. Reasoning changes follow the speaker's thread,
/// which also runs through earlier opinions sharing an evolution chain.
#[must_use]
pub fn build_journeys(
    opinions: &[Opinion],
    chains: &[EvolutionChain],
) -> BTreeMap<String, SpeakerJourney> {
    let mut chains_of: BTreeMap<&str, BTreeSet<usize>> = BTreeMap::new();
    for (idx, chain) in chains.iter().enumerate() {
        for node in &chain.nodes {
            chains_of.entry(node.opinion_id.as_str()).or_default().insert(idx);
        }
    }
    let same_thread = |a: &str, b: &str| {
        a == b
            || match (chains_of.get(a), chains_of.get(b)) {
                (Some(x), Some(y)) => !x.is_disjoint(y),
                _ => false,
            }
    };

    let mut sightings: BTreeMap<&str, Vec<Sighting<'_>>> = BTreeMap::new();
    let mut names: BTreeMap<&str, &str> = BTreeMap::new();
    for opinion in opinions {
        for appearance in &opinion.appearances {
            for speaker in &appearance.speakers {
                if let Some(name) = speaker.speaker_name.as_deref() {
                    names.entry(speaker.speaker_id.as_str()).or_insert(name);
                }
                sightings
                    .entry(speaker.speaker_id.as_str())
                    .or_default()
                    .push(Sighting {
                        opinion_id: &opinion.id,
                        source_unit_id: &appearance.source_unit_id,
                        source_unit_date: appearance.source_unit_date,
                        stance: speaker.stance,
                        reasoning: speaker.reasoning.as_deref(),
                    });
            }
        }
    }

    let mut journeys = BTreeMap::new();
    for (speaker_id, mut seen) in sightings {
        seen.sort_by(|a, b| {
            (a.source_unit_date, a.source_unit_id, a.opinion_id).cmp(&(
                b.source_unit_date,
                b.source_unit_id,
                b.opinion_id,
            ))
        });

        let mut journey = SpeakerJourney::new(speaker_id);
        journey.speaker_name = names.get(speaker_id).map(|n| (*n).to_owned());

        for (k, cur) in seen.iter().enumerate() {
            let earlier = &seen[..k];
            let previous_same = earlier.iter().rfind(|p| p.opinion_id == cur.opinion_id);
            let previous_thread = earlier
                .iter()
                .rfind(|p| same_thread(p.opinion_id, cur.opinion_id));

            let shift = previous_same.and_then(|p| StanceShift::between(p.stance, cur.stance));
            journey.nodes.push(SpeakerJourneyNode {
                opinion_id: cur.opinion_id.to_owned(),
                source_unit_id: cur.source_unit_id.to_owned(),
                source_unit_date: cur.source_unit_date,
                stance: cur.stance,
                reasoning: cur.reasoning.map(str::to_owned),
                stance_changed: previous_same.is_some_and(|p| p.stance != cur.stance),
                shift,
                reasoning_changed: previous_thread
                    .is_some_and(|p| normalized(p.reasoning) != normalized(cur.reasoning)),
                continues_from: previous_thread
                    .filter(|p| p.opinion_id != cur.opinion_id)
                    .map(|p| p.opinion_id.to_owned()),
            });

            for other in earlier
                .iter()
                .filter(|p| p.source_unit_id == cur.source_unit_id)
                .filter(|p| p.opinion_id != cur.opinion_id && p.stance.opposes(cur.stance))
            {
                journey.contentious.push(ContentiousPair {
                    source_unit_id: cur.source_unit_id.to_owned(),
                    opinion_a: other.opinion_id.to_owned(),
                    stance_a: other.stance,
                    opinion_b: cur.opinion_id.to_owned(),
                    stance_b: cur.stance,
                });
            }
        }

        tracing::debug!(
            speaker = %speaker_id,
            nodes = journey.nodes.len(),
            stance_changes = journey.stance_changes(),
            contentious = journey.contentious.len(),
            "speaker journey built"
        );
        journeys.insert(speaker_id.to_owned(), journey);
    }
    journeys
}

/// Combine per-partition journeys into one journey per speaker.
#[must_use]
pub fn merge_journeys(
    parts: impl IntoIterator<Item = BTreeMap<String, SpeakerJourney>>,
) -> BTreeMap<String, SpeakerJourney> {
    let mut combined: BTreeMap<String, SpeakerJourney> = BTreeMap::new();
    for part in parts {
        for (speaker_id, journey) in part {
            match combined.get_mut(&speaker_id) {
                Some(existing) => existing.absorb(journey),
                None => {
                    combined.insert(speaker_id, journey);
                }
            }
        }
    }
    combined
}
