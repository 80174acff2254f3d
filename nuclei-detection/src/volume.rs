use ndarray::{ArrayD, IxDyn};

use crate::error::DetectionError;

/// A 2-D or 3-D grid of samples. One axis may be sampled more coarsely than
/// the others; `sampling_factor` is the ratio of the physical voxel size along
/// `anisotropic_axis` to the voxel size along the remaining axes.
#[derive(Clone, Debug)]
pub struct ScalarVolume {
    data: ArrayD<f32>,
    anisotropic_axis: usize,
    sampling_factor: f64,
}

impl ScalarVolume {
    pub fn new(
        data: ArrayD<f32>,
        anisotropic_axis: usize,
        sampling_factor: f64,
    ) -> Result<ScalarVolume, DetectionError> {
        let ndim = data.ndim();
        if ndim != 2 && ndim != 3 {
            return Err(DetectionError::InvalidVolume(format!(
                "expected 2 or 3 dimensions, got {}",
                ndim
            )));
        }
        if data.shape().iter().any(|&len| len == 0) {
            return Err(DetectionError::InvalidVolume(format!(
                "empty axis in shape {:?}",
                data.shape()
            )));
        }
        if anisotropic_axis >= ndim {
            return Err(DetectionError::InvalidParameter(format!(
                "anisotropic axis {} out of range for a {}-D volume",
                anisotropic_axis, ndim
            )));
        }
        if !(sampling_factor > 0.0) {
            return Err(DetectionError::InvalidParameter(format!(
                "sampling factor must be positive, got {}",
                sampling_factor
            )));
        }
        Ok(ScalarVolume {
            data,
            anisotropic_axis,
            sampling_factor,
        })
    }

    /// Isotropic volume; the anisotropic axis is the last one with factor 1.
    pub fn isotropic(data: ArrayD<f32>) -> Result<ScalarVolume, DetectionError> {
        let axis = data.ndim().saturating_sub(1);
        ScalarVolume::new(data, axis, 1.0)
    }

    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn anisotropic_axis(&self) -> usize {
        self.anisotropic_axis
    }

    pub fn sampling_factor(&self) -> f64 {
        self.sampling_factor
    }

    /// Gaussian sigma used along `axis` for a blob scale `scale`.
    pub fn sigma_along(&self, axis: usize, scale: f64) -> f64 {
        if axis == self.anisotropic_axis {
            scale / self.sampling_factor
        } else {
            scale
        }
    }

    pub fn get(&self, index: &[usize]) -> Option<f32> {
        self.data.get(IxDyn(index)).copied()
    }
}
