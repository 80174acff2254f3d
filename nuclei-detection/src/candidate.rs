use std::collections::BTreeMap;
use std::f64::consts::PI;

use rand::Rng;

use crate::error::DetectionError;
use crate::scale_space::ScaleRange;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const SELECTED: Rgb = Rgb(0, 255, 0);

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Rgb {
        Rgb(rng.gen(), rng.gen(), rng.gen())
    }
}

/// A detected blob: grid position, scale index and LoG response.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    /// `[x, y, z]` in voxels; `z` is `-1` for 2-D images.
    pub position: [i64; 3],
    pub scale: usize,
    pub value: f32,
    pub color: Rgb,
    pub original_color: Rgb,
    pub selected: bool,
    pub label: Option<i64>,
    pub annotations: BTreeMap<String, f64>,
}

impl Candidate {
    pub fn new(position: [i64; 3], scale: usize, value: f32, color: Rgb) -> Candidate {
        Candidate {
            position,
            scale,
            value,
            color,
            original_color: color,
            selected: false,
            label: None,
            annotations: BTreeMap::new(),
        }
    }

    pub fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
        self.color = if selected {
            Rgb::SELECTED
        } else {
            self.original_color
        };
    }

    pub fn toggle_selected(&mut self) {
        let selected = !self.selected;
        self.set_selected(selected);
    }
}

/// Geometry shared by every candidate of one detection run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScaleParameters {
    pub scales: ScaleRange,
    pub sampling_factor: f64,
    pub anisotropic_axis: usize,
    pub num_dims: usize,
}

impl ScaleParameters {
    pub fn new(
        scales: ScaleRange,
        sampling_factor: f64,
        anisotropic_axis: usize,
        num_dims: usize,
    ) -> Result<ScaleParameters, DetectionError> {
        scales.validate()?;
        if num_dims != 2 && num_dims != 3 {
            return Err(DetectionError::InvalidParameter(format!(
                "expected 2 or 3 spatial dimensions, got {}",
                num_dims
            )));
        }
        if anisotropic_axis >= num_dims {
            return Err(DetectionError::InvalidParameter(format!(
                "anisotropic axis {} out of range for {} dimensions",
                anisotropic_axis, num_dims
            )));
        }
        if !(sampling_factor > 0.0) {
            return Err(DetectionError::InvalidParameter(format!(
                "sampling factor must be positive, got {}",
                sampling_factor
            )));
        }
        Ok(ScaleParameters {
            scales,
            sampling_factor,
            anisotropic_axis,
            num_dims,
        })
    }

    pub fn num_scales(&self) -> usize {
        self.scales.num_scales()
    }

    pub fn scale_of(&self, candidate: &Candidate) -> f64 {
        self.scales.scale_at(candidate.scale)
    }

    /// `sqrt(numDims) * (minScale + stepScale * scaleIndex)`
    pub fn radius(&self, candidate: &Candidate) -> f64 {
        (self.num_dims as f64).sqrt() * self.scale_of(candidate)
    }

    /// Area (2-D) or volume (3-D) of the candidate's disc/ball.
    pub fn measure(&self, candidate: &Candidate) -> f64 {
        let r = self.radius(candidate);
        if self.num_dims == 2 {
            PI * r * r
        } else {
            4.0 / 3.0 * PI * r * r * r
        }
    }

    /// Euclidean distance with the anisotropic axis stretched by the sampling
    /// factor.
    pub fn physical_distance(&self, a: &[f64; 3], b: &[f64; 3]) -> f64 {
        (0..self.num_dims)
            .map(|d| {
                let delta = a[d] - b[d];
                if d == self.anisotropic_axis {
                    self.sampling_factor * self.sampling_factor * delta * delta
                } else {
                    delta * delta
                }
            })
            .sum::<f64>()
            .sqrt()
    }

    pub fn distance(&self, a: &Candidate, b: &Candidate) -> f64 {
        self.physical_distance(&position_f64(a), &position_f64(b))
    }

    pub fn check_scale(&self, candidate: &Candidate) -> Result<(), DetectionError> {
        if candidate.scale >= self.num_scales() {
            return Err(DetectionError::InvalidParameter(format!(
                "scale index {} outside [0, {})",
                candidate.scale,
                self.num_scales()
            )));
        }
        Ok(())
    }
}

pub fn position_f64(candidate: &Candidate) -> [f64; 3] {
    [
        candidate.position[0] as f64,
        candidate.position[1] as f64,
        candidate.position[2] as f64,
    ]
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;
    use rand::{rngs::StdRng, SeedableRng};

    use super::{Candidate, Rgb, ScaleParameters};
    use crate::scale_space::ScaleRange;

    fn params() -> ScaleParameters {
        ScaleParameters::new(ScaleRange::new(2.0, 1.0, 6.0), 4.0, 2, 3).unwrap()
    }

    #[test]
    fn test_radius() {
        let c = Candidate::new([0, 0, 0], 2, -1.0, Rgb(1, 2, 3));
        assert_approx_eq!(params().radius(&c), 3.0_f64.sqrt() * 4.0);
        assert!(params().check_scale(&c).is_ok());
        let c = Candidate::new([0, 0, 0], 5, -1.0, Rgb(1, 2, 3));
        assert!(params().check_scale(&c).is_err());
    }

    #[test]
    fn test_anisotropic_distance() {
        let a = Candidate::new([0, 0, 0], 0, 0.0, Rgb(0, 0, 0));
        let b = Candidate::new([3, 0, 1], 0, 0.0, Rgb(0, 0, 0));
        assert_approx_eq!(params().distance(&a, &b), 5.0);
    }

    #[test]
    fn test_selection_restores_colour() {
        let mut rng = StdRng::seed_from_u64(3);
        let color = Rgb::random(&mut rng);
        let mut c = Candidate::new([1, 2, 3], 0, -2.0, color);
        c.toggle_selected();
        assert!(c.selected);
        assert_eq!(c.color, Rgb::SELECTED);
        c.toggle_selected();
        assert!(!c.selected);
        assert_eq!(c.color, color);
    }

    #[test]
    fn test_rejects_bad_geometry() {
        let scales = ScaleRange::new(2.0, 1.0, 6.0);
        assert!(ScaleParameters::new(scales, 1.0, 3, 3).is_err());
        assert!(ScaleParameters::new(scales, 1.0, 0, 4).is_err());
        assert!(ScaleParameters::new(scales, -1.0, 0, 3).is_err());
    }
}
