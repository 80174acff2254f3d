use std::f64::consts::PI;

use crate::candidate::{Candidate, ScaleParameters};
use crate::error::DetectionError;

fn full_measure(r: f64, num_dims: usize) -> f64 {
    if num_dims == 2 {
        PI * r * r
    } else {
        4.0 / 3.0 * PI * r * r * r
    }
}

/// Area (2-D) or volume (3-D) shared by two discs/balls of radius `r1`, `r2`
/// whose centres are `d` apart.
///
/// The lens formulas need `0 < d < r1 + r2` and partial overlap; containment
/// and coincident centres return the smaller shape's full measure, disjoint
/// shapes return zero.
pub fn intersection_measure(r1: f64, r2: f64, d: f64, num_dims: usize) -> f64 {
    if d >= r1 + r2 {
        return 0.0;
    }
    let smaller = r1.min(r2);
    if d <= 0.0 || d + smaller <= r1.max(r2) {
        return full_measure(smaller, num_dims);
    }
    if num_dims == 2 {
        let d2 = d * d;
        let (a2, b2) = (r1 * r1, r2 * r2);
        let alpha = ((d2 + a2 - b2) / (2.0 * d * r1)).max(-1.0).min(1.0).acos();
        let beta = ((d2 + b2 - a2) / (2.0 * d * r2)).max(-1.0).min(1.0).acos();
        let kite = ((-d + r1 + r2) * (d + r1 - r2) * (d - r1 + r2) * (d + r1 + r2))
            .max(0.0)
            .sqrt();
        a2 * alpha + b2 * beta - 0.5 * kite
    } else {
        PI * (r1 + r2 - d).powi(2) * (d * d + 2.0 * d * (r1 + r2) - 3.0 * (r1 - r2).powi(2))
            / (12.0 * d)
    }
}

/// True when the shared measure exceeds `threshold * min(measure_a, measure_b)`.
pub fn candidates_overlap(
    a: &Candidate,
    b: &Candidate,
    params: &ScaleParameters,
    threshold: f64,
) -> bool {
    let (ra, rb) = (params.radius(a), params.radius(b));
    let shared = intersection_measure(ra, rb, params.distance(a, b), params.num_dims);
    shared > threshold * params.measure(a).min(params.measure(b))
}

pub fn validate_overlap_threshold(threshold: f64) -> Result<(), DetectionError> {
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(DetectionError::InvalidParameter(format!(
            "overlap threshold must lie in (0, 1], got {}",
            threshold
        )));
    }
    Ok(())
}

/// Undirected graph stored as adjacency lists.
#[derive(Clone, Debug, Default)]
pub struct OverlapGraph {
    adjacency: Vec<Vec<usize>>,
}

impl OverlapGraph {
    pub fn new(num_vertices: usize) -> OverlapGraph {
        OverlapGraph {
            adjacency: vec![Vec::new(); num_vertices],
        }
    }

    /// Connect every pair of candidates whose overlap exceeds `threshold`.
    pub fn build(
        candidates: &[Candidate],
        params: &ScaleParameters,
        threshold: f64,
    ) -> OverlapGraph {
        let mut graph = OverlapGraph::new(candidates.len());
        for i in 0..candidates.len() {
            for j in i + 1..candidates.len() {
                if candidates_overlap(&candidates[i], &candidates[j], params, threshold) {
                    graph.add_edge(i, j);
                }
            }
        }
        graph
    }

    pub fn add_edge(&mut self, a: usize, b: usize) {
        self.adjacency[a].push(b);
        self.adjacency[b].push(a);
    }

    pub fn num_vertices(&self) -> usize {
        self.adjacency.len()
    }

    pub fn num_edges(&self) -> usize {
        self.adjacency.iter().map(Vec::len).sum::<usize>() / 2
    }

    pub fn neighbours(&self, v: usize) -> &[usize] {
        &self.adjacency[v]
    }

    /// Vertices grouped by component, each in depth-first visiting order.
    /// Components are ordered by their lowest vertex.
    pub fn connected_components(&self) -> Vec<Vec<usize>> {
        let mut visited = vec![false; self.num_vertices()];
        let mut components = Vec::new();
        for start in 0..self.num_vertices() {
            if visited[start] {
                continue;
            }
            let mut component = Vec::new();
            let mut node_stack = vec![start];
            while let Some(v) = node_stack.pop() {
                if visited[v] {
                    continue;
                }
                visited[v] = true;
                component.push(v);
                // reversed so neighbours are visited in insertion order
                for &next in self.adjacency[v].iter().rev() {
                    if !visited[next] {
                        node_stack.push(next);
                    }
                }
            }
            components.push(component);
        }
        components
    }
}
