use std::collections::BTreeSet;
use std::time::Instant;

use itertools::Itertools;
use rand::Rng;
use slog::{info, warn};

use crate::affine::{fit_transform, mean_residual, AffineTransform, TransformKind};
use crate::assignment::match_descriptors;
use crate::error::RegistrationError;
use crate::icp::{icp, IcpParameter};
use crate::landmark::{centroid, mean_pairwise_distance, principal_axis, LandmarkSet};
use crate::ransac::{ransac, RansacParameter, RansacResult};
use crate::shape_context::{shape_contexts, ShapeContextHistogram, ShapeContextParameter};
use crate::utils::{set_log_config, Point};
use crate::IS_DEBUG;

/// Voxel spacing of a point set: `axis` is `factor` times coarser than the
/// others.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sampling {
    pub axis: usize,
    pub factor: f64,
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            axis: 2,
            factor: 1.0,
        }
    }
}

impl Sampling {
    pub fn validate(&self) -> Result<(), RegistrationError> {
        if self.axis > 2 || !(self.factor > 0.0 && self.factor.is_finite()) {
            return Err(RegistrationError::InvalidParameter(format!(
                "sampling factor {} along axis {}",
                self.factor, self.axis
            )));
        }
        Ok(())
    }

    pub fn transform(&self, dims: usize) -> Result<AffineTransform, RegistrationError> {
        let mut factors = [1.0; 3];
        factors[self.axis] = self.factor;
        AffineTransform::scaling(dims, factors)
    }
}

/// RegistrationParameter
#[derive(Clone, Copy, Debug)]
pub struct RegistrationParameter {
    pub dims: usize,
    pub shape_context: ShapeContextParameter,
    pub ransac: RansacParameter,
    /// `None` skips the ICP refinement.
    pub icp: Option<IcpParameter>,
    pub source_sampling: Sampling,
    pub target_sampling: Sampling,
}

impl Default for RegistrationParameter {
    fn default() -> Self {
        Self {
            dims: 3,
            shape_context: ShapeContextParameter::default(),
            ransac: RansacParameter::default(),
            icp: Some(IcpParameter::default()),
            source_sampling: Sampling::default(),
            target_sampling: Sampling::default(),
        }
    }
}

impl RegistrationParameter {
    /// Same model for RANSAC and ICP.
    #[allow(clippy::field_reassign_with_default)]
    pub fn with_kind(kind: TransformKind) -> RegistrationParameter {
        let mut ret = RegistrationParameter::default();
        ret.ransac.kind = kind;
        ret.icp = ret.icp.map(|icp| IcpParameter { kind, ..icp });
        ret
    }

    pub fn validate(&self) -> Result<(), RegistrationError> {
        if self.dims != 2 && self.dims != 3 {
            return Err(RegistrationError::InvalidParameter(format!(
                "registration is 2-D or 3-D, got {}",
                self.dims
            )));
        }
        self.shape_context.validate()?;
        self.ransac.validate(self.dims)?;
        self.source_sampling.validate()?;
        self.target_sampling.validate()?;
        if let Some(icp) = &self.icp {
            if icp.kind == TransformKind::Similar && self.dims != 3 {
                return Err(RegistrationError::InvalidParameter(
                    "similarity transforms are 3-D only".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct RegistrationResult {
    /// From raw source coordinates into the target's pre-transformed,
    /// physical frame: `icp · ransac · pre_source · source_sampling`.
    pub transform: AffineTransform,
    /// From raw source coordinates to raw target coordinates.
    pub to_target: AffineTransform,
    /// Descriptor matches `(source, target)`.
    pub matches: Vec<(usize, usize)>,
    /// Matches within the RANSAC inlier threshold.
    pub inliers: Vec<(usize, usize)>,
    /// Whether the target descriptors used the flipped principal axis.
    pub flipped_axis: bool,
    pub icp_residuals: Vec<f64>,
}

impl RegistrationResult {
    pub fn num_inliers(&self) -> usize {
        self.inliers.len()
    }
}

fn descriptors(
    points: &[Point],
    param: &ShapeContextParameter,
    flip: bool,
) -> Result<Vec<ShapeContextHistogram>, RegistrationError> {
    let c = centroid(points)?;
    let mean = mean_pairwise_distance(points)?;
    let mut axis = principal_axis(points)?;
    if flip {
        axis = axis.map(|v| -v);
    }
    shape_contexts(points, &c, mean, &axis, param)
}

fn prepare(
    points: &[Point],
    sampling: &Sampling,
    pre: Option<&AffineTransform>,
    dims: usize,
) -> Result<(AffineTransform, Vec<Point>), RegistrationError> {
    let mut to_frame = sampling.transform(dims)?;
    if let Some(pre) = pre {
        to_frame = pre.compose(&to_frame)?;
    }
    let moved = to_frame.apply_all(points);
    Ok((to_frame, moved))
}

/// Register two unlabelled point sets: shape-context descriptors matched by
/// the Hungarian method, a RANSAC fit on the matches (trying both signs of
/// the target's principal axis) and ICP refinement over all points.
pub fn register_point_sets<R: Rng + ?Sized>(
    source: &[Point],
    target: &[Point],
    source_pre: Option<&AffineTransform>,
    target_pre: Option<&AffineTransform>,
    param: &RegistrationParameter,
    rng: &mut R,
) -> Result<RegistrationResult, RegistrationError> {
    let log = set_log_config();
    param.validate()?;
    let dims = param.dims;
    let (source_frame, moving) = prepare(source, &param.source_sampling, source_pre, dims)?;
    let (target_frame, fixed) = prepare(target, &param.target_sampling, target_pre, dims)?;

    let tick = Instant::now();
    let source_descriptors = descriptors(&moving, &param.shape_context, false)?;
    let mut best: Option<(bool, Vec<(usize, usize)>, RansacResult)> = None;
    for flip in [false, true] {
        let target_descriptors = descriptors(&fixed, &param.shape_context, flip)?;
        let matches = match_descriptors(&source_descriptors, &target_descriptors)?;
        let matched_source = matches.iter().map(|&(i, _)| moving[i]).collect_vec();
        let matched_target = matches.iter().map(|&(_, j)| fixed[j]).collect_vec();
        let fit = match ransac(&matched_source, &matched_target, &param.ransac, dims, rng) {
            Ok(fit) => fit,
            Err(RegistrationError::Singular(message)) => {
                warn!(log, "no model with flipped axis {}: {}", flip, message);
                continue;
            }
            Err(e) => return Err(e),
        };
        if IS_DEBUG {
            info!(
                log,
                "flipped axis {}: {} matches, {} inliers",
                flip,
                matches.len(),
                fit.num_inliers()
            );
        }
        if best
            .as_ref()
            .map_or(true, |(_, _, b)| fit.num_inliers() > b.num_inliers())
        {
            best = Some((flip, matches, fit));
        }
    }
    let (flipped_axis, matches, fit) = best.ok_or_else(|| {
        RegistrationError::Singular("no RANSAC model for either axis sign".to_string())
    })?;
    let inliers = fit.inliers.iter().map(|&k| matches[k]).collect_vec();
    info!(
        log,
        "{} of {} matches are inliers, took {:.3}s",
        inliers.len(),
        matches.len(),
        tick.elapsed().as_millis() as f64 / 1000.0
    );

    let mut estimate = fit.transform;
    let mut icp_residuals = Vec::new();
    if let Some(icp_param) = &param.icp {
        let refined = icp(&estimate.apply_all(&moving), &fixed, icp_param, dims)?;
        estimate = refined.transform.compose(&estimate)?;
        icp_residuals = refined.residuals;
    }

    let transform = estimate.compose(&source_frame)?;
    let to_target = target_frame.inverse()?.compose(&transform)?;
    Ok(RegistrationResult {
        transform,
        to_target,
        matches,
        inliers,
        flipped_axis,
        icp_residuals,
    })
}

/// Fit directly to landmarks that share a label.
pub fn register_landmarks(
    source: &LandmarkSet,
    target: &LandmarkSet,
    kind: TransformKind,
    dims: usize,
) -> Result<(AffineTransform, BTreeSet<String>), RegistrationError> {
    let overlap = source.overlap(target);
    let transform = fit_transform(kind, &source.subset(&overlap), &target.subset(&overlap), dims)?;
    Ok((transform, overlap))
}

/// Mean distance between landmark pairs after mapping source landmarks
/// through `net · inverse(source_landmark_transform)` and target landmarks
/// through `inverse(target_landmark_transform)`.
pub fn landmark_registration_error(
    source: &LandmarkSet,
    target: &LandmarkSet,
    net: &AffineTransform,
    source_landmark_transform: &AffineTransform,
    target_landmark_transform: &AffineTransform,
) -> Result<f64, RegistrationError> {
    let overlap = source.overlap(target);
    if overlap.is_empty() {
        return Err(RegistrationError::InvalidInput(
            "no landmark labels in common".to_string(),
        ));
    }
    let source_map = net.compose(&source_landmark_transform.inverse()?)?;
    let target_map = target_landmark_transform.inverse()?;
    mean_residual(
        &source_map.apply_all(&source.subset(&overlap)),
        &target_map.apply_all(&target.subset(&overlap)),
    )
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;
    use ndarray::{array, s, Array2};
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::landmark::LandmarkPoint;

    fn cloud(seed: u64, n: usize) -> Vec<Point> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                [
                    rng.gen_range(0.0..120.0),
                    rng.gen_range(0.0..60.0),
                    rng.gen_range(0.0..25.0),
                ]
            })
            .collect()
    }

    fn similarity() -> AffineTransform {
        let (a, scale) = (0.4_f64, 1.3);
        let r = array![[a.cos(), -a.sin(), 0.0], [a.sin(), a.cos(), 0.0], [0.0, 0.0, 1.0]] * scale;
        let mut m = Array2::eye(4);
        m.slice_mut(s![..3, ..3]).assign(&r);
        m[[0, 3]] = 40.0;
        m[[1, 3]] = -15.0;
        m[[2, 3]] = 6.0;
        AffineTransform::from_matrix(m).unwrap()
    }

    fn assert_matrix_close(a: &AffineTransform, b: &AffineTransform, eps: f64) {
        for (x, y) in a.matrix().iter().zip(b.matrix().iter()) {
            assert_approx_eq!(x, y, eps);
        }
    }

    fn quick_parameter() -> RegistrationParameter {
        let mut param = RegistrationParameter::default();
        param.ransac.iterations = 300;
        param.ransac.inlier_threshold = 1.0;
        param.icp = Some(IcpParameter {
            iterations: 5,
            ..IcpParameter::default()
        });
        param
    }

    #[test]
    fn test_register_similar_point_sets() {
        let source = cloud(41, 40);
        let target = similarity().apply_all(&source);
        let mut rng = StdRng::seed_from_u64(0);
        let result = register_point_sets(&source, &target, None, None, &quick_parameter(), &mut rng).unwrap();
        assert!(result.num_inliers() >= 30, "{} inliers", result.num_inliers());
        assert_matrix_close(&result.to_target, &similarity(), 1e-6);
        assert_matrix_close(&result.transform, &result.to_target, 1e-9);
        assert_approx_eq!(*result.icp_residuals.last().unwrap(), 0.0, 1e-6);
    }

    #[test]
    fn test_register_with_pre_transforms() {
        let source = cloud(42, 40);
        let target = similarity().apply_all(&source);
        let shift = |x: f64| {
            AffineTransform::from_matrix(array![
                [1.0, 0.0, 0.0, x],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0]
            ])
            .unwrap()
        };
        let (source_pre, target_pre) = (shift(-20.0), shift(100.0));
        let mut param = quick_parameter();
        param.icp = None;
        let mut rng = StdRng::seed_from_u64(1);
        let result =
            register_point_sets(&source, &target, Some(&source_pre), Some(&target_pre), &param, &mut rng).unwrap();
        assert!(result.icp_residuals.is_empty());
        assert_matrix_close(&result.to_target, &similarity(), 1e-6);
        assert_matrix_close(&result.transform, &target_pre.compose(&similarity()).unwrap(), 1e-6);
    }

    #[test]
    fn test_register_anisotropic_sampling() {
        let source = cloud(43, 40);
        // target sampled twice as coarsely along z
        let target = similarity()
            .apply_all(&source)
            .into_iter()
            .map(|p| [p[0], p[1], p[2] / 2.0])
            .collect_vec();
        let mut param = quick_parameter();
        param.target_sampling = Sampling { axis: 2, factor: 2.0 };
        let mut rng = StdRng::seed_from_u64(2);
        let result = register_point_sets(&source, &target, None, None, &param, &mut rng).unwrap();
        let expected = AffineTransform::scaling(3, [1.0, 1.0, 0.5])
            .unwrap()
            .compose(&similarity())
            .unwrap();
        assert_matrix_close(&result.to_target, &expected, 1e-6);
    }

    #[test]
    fn test_invalid_registration_parameter() {
        let mut param = RegistrationParameter::default();
        param.dims = 4;
        assert!(param.validate().is_err());
        let mut param = RegistrationParameter::with_kind(TransformKind::Similar);
        assert_eq!(param.icp.unwrap().kind, TransformKind::Similar);
        param.dims = 2;
        assert!(param.validate().is_err());
        let mut param = RegistrationParameter::default();
        param.source_sampling.factor = 0.0;
        assert!(param.validate().is_err());
        let mut rng = StdRng::seed_from_u64(3);
        let points = cloud(44, 3);
        assert!(register_point_sets(&points, &points, None, None, &quick_parameter(), &mut rng).is_err());
    }

    fn landmarks(points: &[(&str, Point)]) -> LandmarkSet {
        LandmarkSet::new(
            points
                .iter()
                .map(|(l, p)| LandmarkPoint::new(l, p[0], p[1], p[2]))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_register_landmarks_by_label() {
        let truth = similarity();
        let source = landmarks(&[
            ("d", [0.0, 0.0, 10.0]),
            ("a", [0.0, 0.0, 0.0]),
            ("b", [10.0, 0.0, 0.0]),
            ("c", [0.0, 10.0, 0.0]),
            ("extra", [5.0, 5.0, 5.0]),
        ]);
        let target = LandmarkSet::new(
            source
                .points
                .iter()
                .filter(|p| p.label != "extra")
                .rev()
                .map(|p| LandmarkPoint {
                    label: p.label.clone(),
                    position: truth.apply(&p.position),
                })
                .collect(),
        )
        .unwrap();
        let (fitted, labels) = register_landmarks(&source, &target, TransformKind::Affine, 3).unwrap();
        assert_eq!(labels.len(), 4);
        assert_matrix_close(&fitted, &truth, 1e-9);
        let (fitted, _) = register_landmarks(&source, &target, TransformKind::Similar, 3).unwrap();
        assert_matrix_close(&fitted, &truth, 1e-9);
    }

    #[test]
    fn test_landmark_registration_error() {
        let identity = AffineTransform::identity(3).unwrap();
        let source = landmarks(&[("a", [0.0, 0.0, 0.0]), ("b", [4.0, 0.0, 0.0]), ("c", [1.0, 1.0, 1.0])]);
        let target = landmarks(&[("b", [4.0, 3.0, 0.0]), ("a", [0.0, 0.0, 0.0])]);
        let error = landmark_registration_error(&source, &target, &identity, &identity, &identity).unwrap();
        assert_approx_eq!(error, 1.5);

        // landmark transforms are inverted before use
        let double = AffineTransform::scaling(3, [2.0, 2.0, 2.0]).unwrap();
        let error = landmark_registration_error(&source, &source, &identity, &double, &double).unwrap();
        assert_approx_eq!(error, 0.0);
        let error = landmark_registration_error(&source, &source, &double, &double, &identity).unwrap();
        assert_approx_eq!(error, 0.0);

        let flat = AffineTransform::scaling(3, [1.0, 1.0, 0.0]).unwrap();
        assert!(landmark_registration_error(&source, &target, &identity, &flat, &identity).is_err());
        let other = landmarks(&[("z", [0.0, 0.0, 0.0])]);
        assert!(landmark_registration_error(&source, &other, &identity, &identity, &identity).is_err());
    }
}
