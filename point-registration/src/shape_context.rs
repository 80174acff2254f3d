use std::f64::consts::PI;

use nalgebra::Vector3;

use crate::error::RegistrationError;
use crate::utils::Point;

/// Neighbour counts, indexed `radial * theta_bins * phi_bins + theta * phi_bins + phi`.
pub type ShapeContextHistogram = Vec<u32>;

/// ShapeContextParameter
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShapeContextParameter {
    pub radial_bins: usize,
    pub theta_bins: usize,
    pub phi_bins: usize,
    /// Innermost and outermost radial edges, as fractions of the mean
    /// pairwise distance.
    pub r_inner: f64,
    pub r_outer: f64,
}

impl Default for ShapeContextParameter {
    fn default() -> Self {
        Self {
            radial_bins: 5,
            theta_bins: 6,
            phi_bins: 12,
            r_inner: 0.125,
            r_outer: 2.0,
        }
    }
}

impl ShapeContextParameter {
    pub fn num_bins(&self) -> usize {
        self.radial_bins * self.theta_bins * self.phi_bins
    }

    pub fn validate(&self) -> Result<(), RegistrationError> {
        if self.radial_bins == 0 || self.theta_bins == 0 || self.phi_bins == 0 {
            return Err(RegistrationError::InvalidParameter(format!(
                "shape context bins must be positive, got {}x{}x{}",
                self.radial_bins, self.theta_bins, self.phi_bins
            )));
        }
        if !(self.r_inner > 0.0 && self.r_inner < self.r_outer) {
            return Err(RegistrationError::InvalidParameter(format!(
                "shape context radii must satisfy 0 < inner < outer, got {} and {}",
                self.r_inner, self.r_outer
            )));
        }
        Ok(())
    }

    /// Radial edges, geometric from `r_inner` to `r_outer`.
    pub fn radial_edges(&self) -> Vec<f64> {
        if self.radial_bins == 1 {
            return vec![self.r_outer];
        }
        let ratio = (self.r_outer / self.r_inner).ln() / (self.radial_bins - 1) as f64;
        (0..self.radial_bins)
            .map(|i| self.r_inner * (ratio * i as f64).exp())
            .collect()
    }

    /// Bin of a neighbour at normalised radius `r` and angles `theta` in
    /// `[0, pi]`, `phi` in `[0, 2pi)`. Neighbours beyond the last edge fall
    /// in the outermost ring.
    pub fn bin_index(&self, edges: &[f64], r: f64, theta: f64, phi: f64) -> usize {
        let r_index = edges
            .iter()
            .position(|&edge| r < edge)
            .unwrap_or(self.radial_bins - 1);
        let theta_index = ((theta / (PI / self.theta_bins as f64)).floor() as usize).min(self.theta_bins - 1);
        let phi_index = ((phi / (2.0 * PI / self.phi_bins as f64)).floor() as usize).min(self.phi_bins - 1);
        r_index * self.theta_bins * self.phi_bins + theta_index * self.phi_bins + phi_index
    }
}

fn perpendicular(v: &Vector3<f64>) -> Vector3<f64> {
    let helper = if v.x.abs() <= v.y.abs() && v.x.abs() <= v.z.abs() {
        Vector3::x()
    } else if v.y.abs() <= v.z.abs() {
        Vector3::y()
    } else {
        Vector3::z()
    };
    v.cross(&helper).normalize()
}

/// Rows `x, y, z` of the local frame at `point`: z points away from the
/// centroid, x is the principal axis made orthogonal to z.
pub fn local_frame(point: &Point, centroid: &Point, axis: &Point) -> [Vector3<f64>; 3] {
    let axis = Vector3::from(*axis);
    let outward = Vector3::from(*point) - Vector3::from(*centroid);
    let z = if outward.norm() > 1e-12 {
        outward.normalize()
    } else {
        perpendicular(&axis)
    };
    let x = axis - z * axis.dot(&z);
    let x = if x.norm() > 1e-12 {
        x.normalize()
    } else {
        perpendicular(&z)
    };
    let y = z.cross(&x).normalize();
    [x, y, z]
}

/// One histogram per point over all other points, in the local frame and
/// normalised by `mean_distance`.
pub fn shape_contexts(
    points: &[Point],
    centroid: &Point,
    mean_distance: f64,
    axis: &Point,
    param: &ShapeContextParameter,
) -> Result<Vec<ShapeContextHistogram>, RegistrationError> {
    param.validate()?;
    if points.len() < 2 {
        return Err(RegistrationError::InvalidInput(format!(
            "shape contexts need at least 2 points, got {}",
            points.len()
        )));
    }
    if !(mean_distance > 0.0 && mean_distance.is_finite()) {
        return Err(RegistrationError::InvalidInput(format!(
            "mean distance must be positive, got {}",
            mean_distance
        )));
    }
    let edges = param.radial_edges();
    let histograms = points
        .iter()
        .enumerate()
        .map(|(i, point)| {
            let [x, y, z] = local_frame(point, centroid, axis);
            let origin = Vector3::from(*point);
            let mut histogram = vec![0; param.num_bins()];
            for (j, other) in points.iter().enumerate() {
                if j == i {
                    continue;
                }
                let v = Vector3::from(*other) - origin;
                let local = Vector3::new(v.dot(&x), v.dot(&y), v.dot(&z));
                let r = local.norm();
                let (theta, phi) = if r > 0.0 {
                    let phi = local.y.atan2(local.x);
                    let phi = if phi < 0.0 { phi + 2.0 * PI } else { phi };
                    ((local.z / r).clamp(-1.0, 1.0).acos(), phi)
                } else {
                    (0.0, 0.0)
                };
                histogram[param.bin_index(&edges, r / mean_distance, theta, phi)] += 1;
            }
            histogram
        })
        .collect();
    Ok(histograms)
}
