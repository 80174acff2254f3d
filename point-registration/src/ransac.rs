use itertools::Itertools;
use rand::seq::IteratorRandom;
use rand::Rng;

use crate::affine::{fit_transform, AffineTransform, TransformKind};
use crate::error::RegistrationError;
use crate::utils::{distance, Point};

/// RansacParameter
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RansacParameter {
    pub iterations: usize,
    pub min_samples: usize,
    /// Residual (in the target frame) below which a pair is an inlier.
    pub inlier_threshold: f64,
    pub kind: TransformKind,
}

impl Default for RansacParameter {
    fn default() -> Self {
        Self {
            iterations: 20000,
            min_samples: 4,
            inlier_threshold: 15.0,
            kind: TransformKind::Affine,
        }
    }
}

impl RansacParameter {
    pub fn validate(&self, dims: usize) -> Result<(), RegistrationError> {
        if self.iterations == 0 {
            return Err(RegistrationError::InvalidParameter(
                "RANSAC needs at least one iteration".to_string(),
            ));
        }
        let needed = self.kind.min_points(dims);
        if self.min_samples < needed {
            return Err(RegistrationError::InvalidParameter(format!(
                "{:?} fit in {}-D needs samples of at least {}, got {}",
                self.kind, dims, needed, self.min_samples
            )));
        }
        if !(self.inlier_threshold > 0.0) {
            return Err(RegistrationError::InvalidParameter(format!(
                "inlier threshold must be positive, got {}",
                self.inlier_threshold
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct RansacResult {
    pub transform: AffineTransform,
    /// Indices of the correspondences within the inlier threshold.
    pub inliers: Vec<usize>,
}

impl RansacResult {
    pub fn num_inliers(&self) -> usize {
        self.inliers.len()
    }
}

pub fn inlier_indices(
    transform: &AffineTransform,
    source: &[Point],
    target: &[Point],
    threshold: f64,
) -> Vec<usize> {
    std::iter::zip(transform.apply_all(source), target)
        .enumerate()
        .filter(|(_, (p, q))| distance(p, q) < threshold)
        .map(|(i, _)| i)
        .collect()
}

pub fn ransac<R: Rng + ?Sized>(
    source: &[Point],
    target: &[Point],
    param: &RansacParameter,
    dims: usize,
    rng: &mut R,
) -> Result<RansacResult, RegistrationError> {
    /* Robust fit of `source[i] -> target[i]`.

    Each iteration fits the model to `min_samples` distinct pairs drawn
    without replacement and counts the pairs whose residual is below the
    inlier threshold. Degenerate samples are skipped. The model with the
    most inliers is returned as fitted to its sample; ties keep the earlier
    one.

    Args:
        source: points to find the transform from.
        target: points to find the transform to, paired by index.
        param: iterations, sample size, threshold and model.
        dims: 2 or 3.
        rng: drives the sampling.
    */
    param.validate(dims)?;
    RegistrationError::check_same_length(source.len(), target.len())?;
    if source.len() < param.min_samples {
        return Err(RegistrationError::InvalidInput(format!(
            "{} correspondences, fewer than the sample size {}",
            source.len(),
            param.min_samples
        )));
    }

    let mut best: Option<RansacResult> = None;
    for _ in 0..param.iterations {
        let indices = (0..source.len()).choose_multiple(rng, param.min_samples);
        let source_sample = indices.iter().map(|&i| source[i]).collect_vec();
        let target_sample = indices.iter().map(|&i| target[i]).collect_vec();
        let transform = match fit_transform(param.kind, &source_sample, &target_sample, dims) {
            Ok(transform) => transform,
            Err(RegistrationError::Singular(_)) => continue,
            Err(e) => return Err(e),
        };
        let inliers = inlier_indices(&transform, source, target, param.inlier_threshold);
        if best.as_ref().map_or(true, |b| inliers.len() > b.inliers.len()) {
            best = Some(RansacResult { transform, inliers });
        }
    }
    best.ok_or_else(|| {
        RegistrationError::Singular(format!(
            "all {} RANSAC samples were degenerate",
            param.iterations
        ))
    })
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;
    use ndarray::array;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;

    fn truth() -> AffineTransform {
        AffineTransform::from_matrix(array![
            [0.9, -0.2, 0.1, 30.0],
            [0.25, 1.1, 0.0, -8.0],
            [-0.1, 0.05, 0.8, 12.0],
            [0.0, 0.0, 0.0, 1.0]
        ])
        .unwrap()
    }

    fn correspondences(rng: &mut StdRng, n: usize, outliers: usize) -> (Vec<Point>, Vec<Point>) {
        let source = (0..n)
            .map(|_| {
                [
                    rng.gen_range(0.0..200.0),
                    rng.gen_range(0.0..200.0),
                    rng.gen_range(0.0..100.0),
                ]
            })
            .collect_vec();
        let mut target = truth().apply_all(&source);
        for t in target.iter_mut().take(outliers) {
            for v in t.iter_mut() {
                *v += rng.gen_range(50.0..150.0);
            }
        }
        (source, target)
    }

    #[test]
    fn test_recovers_affine_with_outliers() {
        let mut rng = StdRng::seed_from_u64(21);
        let (source, target) = correspondences(&mut rng, 60, 15);
        let param = RansacParameter {
            iterations: 500,
            ..RansacParameter::default()
        };
        let result = ransac(&source, &target, &param, 3, &mut rng).unwrap();
        assert_eq!(result.inliers, (15..60).collect_vec());
        for (x, y) in result.transform.matrix().iter().zip(truth().matrix().iter()) {
            assert_approx_eq!(x, y, 1e-6);
        }
    }

    #[test]
    fn test_returns_a_sampled_model() {
        let mut rng = StdRng::seed_from_u64(9);
        let (source, mut target) = correspondences(&mut rng, 12, 0);
        for t in target.iter_mut() {
            for v in t.iter_mut() {
                *v += rng.gen_range(-0.2..0.2);
            }
        }
        let param = RansacParameter {
            iterations: 40,
            inlier_threshold: 5.0,
            ..RansacParameter::default()
        };
        let result = ransac(&source, &target, &param, 3, &mut StdRng::seed_from_u64(9)).unwrap();

        // replay the draws: the winner is the first sample with the most inliers
        let mut replay = StdRng::seed_from_u64(9);
        let sampled = (0..param.iterations)
            .filter_map(|_| {
                let indices = (0..source.len()).choose_multiple(&mut replay, param.min_samples);
                let s = indices.iter().map(|&i| source[i]).collect_vec();
                let t = indices.iter().map(|&i| target[i]).collect_vec();
                fit_transform(param.kind, &s, &t, 3).ok()
            })
            .collect_vec();
        let counts = sampled
            .iter()
            .map(|model| inlier_indices(model, &source, &target, param.inlier_threshold).len())
            .collect_vec();
        let most = counts.iter().copied().max().unwrap();
        let first = counts.iter().position(|&c| c == most).unwrap();
        assert_eq!(result.num_inliers(), most);
        let sampled = sampled[first].clone();
        assert_eq!(result.transform, sampled);

        let least_squares = fit_transform(param.kind, &source, &target, 3).unwrap();
        assert_ne!(result.transform, least_squares);
    }

    #[test]
    fn test_deterministic_for_a_seed() {
        let mut rng = StdRng::seed_from_u64(22);
        let (source, target) = correspondences(&mut rng, 30, 10);
        let param = RansacParameter {
            iterations: 50,
            ..RansacParameter::default()
        };
        let a = ransac(&source, &target, &param, 3, &mut StdRng::seed_from_u64(5)).unwrap();
        let b = ransac(&source, &target, &param, 3, &mut StdRng::seed_from_u64(5)).unwrap();
        assert_eq!(a.transform, b.transform);
        assert_eq!(a.inliers, b.inliers);
    }

    #[test]
    fn test_degenerate_samples_fail() {
        let mut rng = StdRng::seed_from_u64(23);
        let line = (0..10).map(|i| [i as f64, 2.0 * i as f64, 0.0]).collect_vec();
        let param = RansacParameter {
            iterations: 20,
            ..RansacParameter::default()
        };
        match ransac(&line, &line, &param, 3, &mut rng) {
            Err(RegistrationError::Singular(_)) => {}
            other => panic!("expected singular error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_parameters() {
        let mut rng = StdRng::seed_from_u64(24);
        let (source, target) = correspondences(&mut rng, 10, 0);
        let param = RansacParameter {
            min_samples: 3,
            ..RansacParameter::default()
        };
        assert!(ransac(&source, &target, &param, 3, &mut rng).is_err());
        let param = RansacParameter {
            inlier_threshold: 0.0,
            ..RansacParameter::default()
        };
        assert!(ransac(&source, &target, &param, 3, &mut rng).is_err());
        let param = RansacParameter::default();
        assert!(ransac(&source[..3], &target[..3], &param, 3, &mut rng).is_err());
        assert!(ransac(&source, &target[..9], &param, 3, &mut rng).is_err());
    }
}
