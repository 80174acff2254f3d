use ndarray::Array2;

use crate::error::RegistrationError;
use crate::shape_context::ShapeContextHistogram;

/// Chi-square distance `sum 0.5 (a - b)^2 / (a + b)` between two
/// histograms, each normalised to sum to one. Bins empty in both are
/// skipped.
pub fn histogram_distance(a: &[u32], b: &[u32]) -> Result<f64, RegistrationError> {
    if a.len() != b.len() {
        return Err(RegistrationError::Mismatch(format!(
            "histograms with {} and {} bins",
            a.len(),
            b.len()
        )));
    }
    let total_a: u32 = a.iter().sum();
    let total_b: u32 = b.iter().sum();
    if total_a == 0 || total_b == 0 {
        return Err(RegistrationError::InvalidInput(
            "cannot normalise an empty histogram".to_string(),
        ));
    }
    let cost = std::iter::zip(a, b)
        .filter(|(&x, &y)| x + y > 0)
        .map(|(&x, &y)| {
            let p = x as f64 / total_a as f64;
            let q = y as f64 / total_b as f64;
            0.5 * (p - q) * (p - q) / (p + q)
        })
        .sum();
    Ok(cost)
}

pub fn cost_matrix(
    source: &[ShapeContextHistogram],
    target: &[ShapeContextHistogram],
) -> Result<Array2<f64>, RegistrationError> {
    if source.is_empty() || target.is_empty() {
        return Err(RegistrationError::InvalidInput(
            "cost matrix of an empty descriptor set".to_string(),
        ));
    }
    let mut cost = Array2::zeros((source.len(), target.len()));
    for (i, a) in source.iter().enumerate() {
        for (j, b) in target.iter().enumerate() {
            cost[[i, j]] = histogram_distance(a, b)?;
        }
    }
    Ok(cost)
}

/// Minimum-cost assignment for a rectangular cost matrix. Entry `i` is the
/// column given to row `i`; when there are more rows than columns the
/// leftover rows get `None`.
pub fn hungarian(cost: &Array2<f64>) -> Result<Vec<Option<usize>>, RegistrationError> {
    if cost.iter().any(|v| !v.is_finite()) {
        return Err(RegistrationError::InvalidInput(
            "assignment costs must be finite".to_string(),
        ));
    }
    let (rows, cols) = cost.dim();
    if rows <= cols {
        Ok(solve_rows(cost).into_iter().map(Some).collect())
    } else {
        let by_column = solve_rows(&cost.t().to_owned());
        let mut out = vec![None; rows];
        for (j, i) in by_column.into_iter().enumerate() {
            out[i] = Some(j);
        }
        Ok(out)
    }
}

// Shortest augmenting path with potentials, O(n^2 m) for n <= m rows.
fn solve_rows(cost: &Array2<f64>) -> Vec<usize> {
    let (n, m) = cost.dim();
    let mut u = vec![0.0; n + 1];
    let mut v = vec![0.0; m + 1];
    // p[j]: row (1-based) matched to column j, 0 when free
    let mut p = vec![0usize; m + 1];
    let mut way = vec![0usize; m + 1];
    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0;
        let mut minv = vec![f64::INFINITY; m + 1];
        let mut used = vec![false; m + 1];
        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0;
            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let current = cost[[i0 - 1, j - 1]] - u[i0] - v[j];
                if current < minv[j] {
                    minv[j] = current;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }
            for j in 0..=m {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }
        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }
    let mut assignment = vec![0; n];
    for j in 1..=m {
        if p[j] != 0 {
            assignment[p[j] - 1] = j - 1;
        }
    }
    assignment
}

/// Pair source and target descriptors by minimum total chi-square cost.
pub fn match_descriptors(
    source: &[ShapeContextHistogram],
    target: &[ShapeContextHistogram],
) -> Result<Vec<(usize, usize)>, RegistrationError> {
    let cost = cost_matrix(source, target)?;
    let assignment = hungarian(&cost)?;
    Ok(assignment
        .into_iter()
        .enumerate()
        .filter_map(|(i, j)| j.map(|j| (i, j)))
        .collect())
}
