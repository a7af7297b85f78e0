//! Deduplicate and rank the union of several traversal results

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::engine::{HopEdge, TraversalResult};
use crate::types::{Edge, EdgeKey, EntityId, TraversalKind};

/// The (entity, kind) unit that produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Provenance {
    pub entity_id: EntityId,
    pub kind: TraversalKind,
}

/// An edge in the merged output with every unit that discovered it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedEdge {
    #[serde(flatten)]
    pub edge: Edge,
    pub hop: usize,
    pub closing: bool,
    pub source_name: String,
    pub target_name: String,
    /// Sorted, deduplicated
    pub contributors: Vec<Provenance>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedResult {
    /// Ordered by hop ascending, strength descending, then edge key
    pub edges: Vec<MergedEdge>,
    /// Any contributing result was truncated
    pub truncated: bool,
    /// Any contributing result had failed nodes
    pub partial: bool,
}

struct Candidate {
    best: HopEdge,
    contributors: BTreeSet<Provenance>,
}

/// `candidate` should replace `current` for the same edge key
fn preferred(candidate: &HopEdge, current: &HopEdge) -> bool {
    candidate
        .hop
        .cmp(&current.hop)
        .then_with(|| current.edge.strength.total_cmp(&candidate.edge.strength))
        .then_with(|| candidate.closing.cmp(&current.closing))
        .is_lt()
}

/// Merge traversal results into one ranked, deduplicated list.
///
/// Edges sharing `(source_id, target_id, relationship_type)` collapse into
/// one, keeping the lowest hop, then the highest strength, then a discovery
/// edge over a closing one. Output depends only on the inputs, not on the
/// order they were collected in.
pub fn merge<'a, I>(results: I) -> MergedResult
where
    I: IntoIterator<Item = (Provenance, &'a TraversalResult)>,
{
    let mut by_key: BTreeMap<EdgeKey, Candidate> = BTreeMap::new();
    let mut truncated = false;
    let mut partial = false;

    for (provenance, result) in results {
        truncated |= result.truncated;
        partial |= result.partial;

        for hop_edge in &result.edges {
            match by_key.get_mut(&hop_edge.edge.key()) {
                Some(candidate) => {
                    candidate.contributors.insert(provenance);
                    if preferred(hop_edge, &candidate.best) {
                        let previous = std::mem::replace(&mut candidate.best, hop_edge.clone());
                        fill_names(&mut candidate.best, &previous);
                    } else {
                        fill_names(&mut candidate.best, hop_edge);
                    }
                }
                None => {
                    by_key.insert(
                        hop_edge.edge.key(),
                        Candidate {
                            best: hop_edge.clone(),
                            contributors: BTreeSet::from([provenance]),
                        },
                    );
                }
            }
        }
    }

    let mut edges: Vec<MergedEdge> = by_key
        .into_values()
        .map(|candidate| MergedEdge {
            edge: candidate.best.edge,
            hop: candidate.best.hop,
            closing: candidate.best.closing,
            source_name: candidate.best.source_name,
            target_name: candidate.best.target_name,
            contributors: candidate.contributors.into_iter().collect(),
        })
        .collect();

    // Stable over key order
    edges.sort_by(|a, b| {
        a.hop
            .cmp(&b.hop)
            .then_with(|| b.edge.strength.total_cmp(&a.edge.strength))
    });

    MergedResult {
        edges,
        truncated,
        partial,
    }
}

fn fill_names(target: &mut HopEdge, other: &HopEdge) {
    if target.source_name.is_empty() {
        target.source_name = other.source_name.clone();
    }
    if target.target_name.is_empty() {
        target.target_name = other.target_name.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traversal::engine::TraversalStats;
    use crate::types::{Layer, RelationshipType};
    use pretty_assertions::assert_eq;

    fn hop_edge(source: EntityId, target: EntityId, hop: usize, strength: f32) -> HopEdge {
        HopEdge {
            edge: Edge {
                source_id: source,
                target_id: target,
                relationship_type: RelationshipType::Causes,
                layer: Layer::Causal,
                strength,
                metadata: BTreeMap::new(),
            },
            hop,
            closing: false,
            discovered_id: Some(target),
            source_name: String::new(),
            target_name: String::new(),
        }
    }

    fn result(start: EntityId, edges: Vec<HopEdge>) -> TraversalResult {
        TraversalResult {
            start_id: start,
            edges,
            truncated: false,
            truncation: None,
            partial: false,
            failed_nodes: vec![],
            stats: TraversalStats::default(),
        }
    }

    #[test]
    fn test_duplicate_keeps_lowest_hop_and_unions_contributors() {
        let ids: Vec<EntityId> = (0..3).map(|_| EntityId::new_v4()).collect();
        let first = result(ids[0], vec![hop_edge(ids[1], ids[2], 2, 0.5)]);
        let mut near = hop_edge(ids[1], ids[2], 1, 0.5);
        near.target_name = "Deploy".to_string();
        let second = result(ids[1], vec![near]);

        let a = Provenance {
            entity_id: ids[0],
            kind: TraversalKind::All,
        };
        let b = Provenance {
            entity_id: ids[1],
            kind: TraversalKind::CausalEffects,
        };
        let merged = merge([(a, &first), (b, &second)]);

        assert_eq!(merged.edges.len(), 1);
        assert_eq!(merged.edges[0].hop, 1);
        assert_eq!(merged.edges[0].target_name, "Deploy");
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(merged.edges[0].contributors, expected);
    }

    #[test]
    fn test_tie_on_hop_keeps_strongest() {
        let ids: Vec<EntityId> = (0..2).map(|_| EntityId::new_v4()).collect();
        let weak = result(ids[0], vec![hop_edge(ids[0], ids[1], 1, 0.3)]);
        let strong = result(ids[0], vec![hop_edge(ids[0], ids[1], 1, 0.9)]);
        let p = Provenance {
            entity_id: ids[0],
            kind: TraversalKind::All,
        };

        let merged = merge([(p, &weak), (p, &strong)]);
        assert_eq!(merged.edges[0].edge.strength, 0.9);
        assert_eq!(merged.edges[0].contributors.len(), 1);
    }

    #[test]
    fn test_merge_is_order_independent_and_repeatable() {
        let ids: Vec<EntityId> = (0..5).map(|_| EntityId::new_v4()).collect();
        let r1 = result(
            ids[0],
            vec![hop_edge(ids[0], ids[1], 1, 0.4), hop_edge(ids[1], ids[2], 2, 0.8)],
        );
        let r2 = result(
            ids[3],
            vec![hop_edge(ids[3], ids[4], 1, 0.4), hop_edge(ids[1], ids[2], 1, 0.8)],
        );
        let p1 = Provenance {
            entity_id: ids[0],
            kind: TraversalKind::Semantic,
        };
        let p2 = Provenance {
            entity_id: ids[3],
            kind: TraversalKind::Semantic,
        };

        let forward = merge([(p1, &r1), (p2, &r2)]);
        let again = merge([(p1, &r1), (p2, &r2)]);
        let backward = merge([(p2, &r2), (p1, &r1)]);

        let bytes = serde_json::to_vec(&forward).unwrap();
        assert_eq!(bytes, serde_json::to_vec(&again).unwrap());
        assert_eq!(bytes, serde_json::to_vec(&backward).unwrap());

        let hops: Vec<usize> = forward.edges.iter().map(|e| e.hop).collect();
        assert_eq!(hops, vec![1, 1, 1]);
        assert_eq!(forward.edges[0].edge.strength, 0.8);
    }

    #[test]
    fn test_flags_are_unioned() {
        let start = EntityId::new_v4();
        let mut truncated = result(start, vec![]);
        truncated.truncated = true;
        let mut partial = result(start, vec![]);
        partial.partial = true;
        let p = Provenance {
            entity_id: start,
            kind: TraversalKind::All,
        };

        let merged = merge([(p, &truncated), (p, &partial)]);
        assert!(merged.truncated);
        assert!(merged.partial);
        assert!(merged.edges.is_empty());
    }
}
