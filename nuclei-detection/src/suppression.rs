use itertools::Itertools;

use crate::candidate::{Candidate, ScaleParameters};
use crate::error::DetectionError;
use crate::overlap::{candidates_overlap, validate_overlap_threshold, OverlapGraph};

/// Greedy non-maximum suppression over the overlap graph.
///
/// Within every connected component the candidate with the lowest response
/// survives, members overlapping it are discarded, and the rest of the
/// component is clustered again. Pending clusters are kept on an explicit
/// work list.
pub fn suppress_overlapping(
    candidates: &[Candidate],
    params: &ScaleParameters,
    overlap_threshold: f64,
) -> Result<Vec<Candidate>, DetectionError> {
    validate_overlap_threshold(overlap_threshold)?;
    for candidate in candidates {
        params.check_scale(candidate)?;
    }

    let mut kept = Vec::with_capacity(candidates.len());
    let mut pending: Vec<Vec<Candidate>> = vec![candidates.to_vec()];
    while let Some(cluster) = pending.pop() {
        let graph = OverlapGraph::build(&cluster, params, overlap_threshold);
        let mut next = Vec::new();
        for component in graph.connected_components() {
            if component.len() == 1 {
                kept.push(cluster[component[0]].clone());
                continue;
            }
            let members = component
                .iter()
                .map(|&i| &cluster[i])
                .sorted_by(|a, b| a.value.total_cmp(&b.value))
                .collect_vec();
            let strongest = members[0];
            kept.push(strongest.clone());
            let remaining = members[1..]
                .iter()
                .filter(|m| !candidates_overlap(strongest, m, params, overlap_threshold))
                .map(|m| (*m).clone())
                .collect_vec();
            if !remaining.is_empty() {
                next.push(remaining);
            }
        }
        // keep component order: the first component's leftovers are handled first
        pending.extend(next.into_iter().rev());
    }
    Ok(kept)
}
