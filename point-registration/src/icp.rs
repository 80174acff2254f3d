use std::time::Instant;

use itertools::Itertools;
use slog::info;

use crate::affine::{fit_transform, mean_residual, AffineTransform, TransformKind};
use crate::error::RegistrationError;
use crate::utils::{set_log_config, Point};
use crate::IS_DEBUG;

/// IcpParameter
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IcpParameter {
    pub iterations: usize,
    /// Stop once the mean residual changes by less than this.
    pub tolerance: Option<f64>,
    pub kind: TransformKind,
}

impl Default for IcpParameter {
    fn default() -> Self {
        Self {
            iterations: 50,
            tolerance: None,
            kind: TransformKind::Affine,
        }
    }
}

#[derive(Clone, Debug)]
pub struct IcpResult {
    /// Accumulated map from the input source points.
    pub transform: AffineTransform,
    /// Mean residual after each iteration.
    pub residuals: Vec<f64>,
    /// Target index matched to each source point in the last iteration.
    pub correspondences: Vec<usize>,
}

/// Index of the nearest `fixed` point for every `moving` point. 2-D
/// searches ignore z.
pub fn nearest_neighbours(
    moving: &[Point],
    fixed: &[Point],
    dims: usize,
) -> Result<Vec<usize>, RegistrationError> {
    if fixed.is_empty() {
        return Err(RegistrationError::InvalidInput(
            "nearest neighbours in an empty point set".to_string(),
        ));
    }
    let key = |p: &Point| if dims == 2 { [p[0], p[1], 0.0] } else { *p };
    let data = fixed.iter().map(key).collect_vec();
    let kd_tree = kd_tree::KdIndexTree::build_by_ordered_float(&data);
    moving
        .iter()
        .map(|p| {
            kd_tree
                .nearest(&key(p))
                .map(|res| *(res.item))
                .ok_or_else(|| RegistrationError::InvalidInput("no nearest neighbour".to_string()))
        })
        .collect()
}

/// Iterative closest point: match every moving point to its nearest target,
/// refit, move, repeat.
pub fn icp(
    source: &[Point],
    target: &[Point],
    param: &IcpParameter,
    dims: usize,
) -> Result<IcpResult, RegistrationError> {
    let log = set_log_config();
    let tick = Instant::now();
    let mut transform = AffineTransform::identity(dims)?;
    let mut moving = source.to_vec();
    let mut residuals = Vec::with_capacity(param.iterations);
    let mut correspondences = Vec::new();
    for iteration in 0..param.iterations {
        correspondences = nearest_neighbours(&moving, target, dims)?;
        let matched = correspondences.iter().map(|&j| target[j]).collect_vec();
        let step = fit_transform(param.kind, &moving, &matched, dims)?;
        moving = step.apply_all(&moving);
        transform = step.compose(&transform)?;
        let residual = mean_residual(&moving, &matched)?;
        if IS_DEBUG {
            info!(log, "icp iteration {}: mean residual {}", iteration, residual);
        }
        let previous = residuals.last().copied();
        residuals.push(residual);
        if let (Some(tolerance), Some(previous)) = (param.tolerance, previous) {
            if (previous - residual).abs() < tolerance {
                break;
            }
        }
    }
    if let Some(residual) = residuals.last() {
        info!(
            log,
            "icp ran {} iterations, mean residual {}, took {:.3}s",
            residuals.len(),
            residual,
            tick.elapsed().as_millis() as f64 / 1000.0
        );
    }
    Ok(IcpResult {
        transform,
        residuals,
        correspondences,
    })
}
