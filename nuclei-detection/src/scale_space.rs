use ndarray::{stack, ArrayD, ArrayViewD, Axis};
use rayon::prelude::*;

use crate::error::DetectionError;
use crate::filters::{gaussian_kernel, separable_convolution};
use crate::volume::ScalarVolume;

/// Blob scales tested by the detector: `min_scale + i * step_scale` for every
/// `i` whose scale does not exceed `max_scale`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScaleRange {
    pub min_scale: f64,
    pub step_scale: f64,
    pub max_scale: f64,
}

impl ScaleRange {
    pub fn new(min_scale: f64, step_scale: f64, max_scale: f64) -> ScaleRange {
        ScaleRange {
            min_scale,
            step_scale,
            max_scale,
        }
    }

    pub fn validate(&self) -> Result<(), DetectionError> {
        if !(self.step_scale > 0.0) {
            return Err(DetectionError::InvalidParameter(format!(
                "step scale must be positive, got {}",
                self.step_scale
            )));
        }
        if !(self.min_scale > 0.0) || !(self.max_scale > 0.0) {
            return Err(DetectionError::InvalidParameter(format!(
                "scales must be positive, got min {} max {}",
                self.min_scale, self.max_scale
            )));
        }
        if self.min_scale > self.max_scale {
            return Err(DetectionError::InvalidParameter(format!(
                "min scale {} exceeds max scale {}",
                self.min_scale, self.max_scale
            )));
        }
        Ok(())
    }

    /// `floor((max - min) / step) + 1`, tolerant to representation error in
    /// the quotient.
    pub fn num_scales(&self) -> usize {
        ((self.max_scale - self.min_scale) / self.step_scale + 1e-9).floor() as usize + 1
    }

    pub fn scale_at(&self, index: usize) -> f64 {
        self.min_scale + self.step_scale * index as f64
    }

    pub fn scales(&self) -> Vec<f64> {
        (0..self.num_scales()).map(|i| self.scale_at(i)).collect()
    }
}

/// Normalised LoG responses with the scale index on the trailing axis.
#[derive(Clone, Debug)]
pub struct ScaleResponseStack {
    pub data: ArrayD<f32>,
    pub scales: ScaleRange,
}

impl ScaleResponseStack {
    pub fn num_scales(&self) -> usize {
        self.data.shape()[self.data.ndim() - 1]
    }

    pub fn spatial_ndim(&self) -> usize {
        self.data.ndim() - 1
    }
}

/// Sum of the Gaussian second derivatives along every axis at blob scale
/// `scale`.
pub fn laplacian_of_gaussian(volume: &ScalarVolume, scale: f64) -> ArrayD<f32> {
    let ndim = volume.ndim();
    let smoothing: Vec<Vec<f32>> = (0..ndim)
        .map(|axis| gaussian_kernel(volume.sigma_along(axis, scale), 0))
        .collect();
    let mut sum = ArrayD::<f32>::zeros(volume.data().raw_dim());
    for derivative_axis in 0..ndim {
        let mut kernels = smoothing.clone();
        kernels[derivative_axis] = gaussian_kernel(volume.sigma_along(derivative_axis, scale), 2);
        sum += &separable_convolution(volume.data(), &kernels);
    }
    sum
}

/// Build the scale-normalised LoG stack. With `bright_blobs` the response is
/// multiplied by `s^2`, so bright structures become minima; otherwise by
/// `-s^2`, so dark structures do.
pub fn multi_scale_laplacian(
    volume: &ScalarVolume,
    scales: &ScaleRange,
    bright_blobs: bool,
) -> Result<ScaleResponseStack, DetectionError> {
    scales.validate()?;
    let sign = if bright_blobs { 1.0 } else { -1.0 };
    let responses: Vec<ArrayD<f32>> = scales
        .scales()
        .into_par_iter()
        .map(|s| {
            let factor = (sign * s * s) as f32;
            laplacian_of_gaussian(volume, s).mapv_into(|v| v * factor)
        })
        .collect();
    let views: Vec<ArrayViewD<f32>> = responses.iter().map(|r| r.view()).collect();
    let data = stack(Axis(volume.ndim()), &views)
        .map_err(|e| DetectionError::InvalidVolume(e.to_string()))?;
    Ok(ScaleResponseStack {
        data,
        scales: *scales,
    })
}
