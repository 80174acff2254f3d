use ndarray::Array1;
use ndarray_stats::QuantileExt;

use crate::candidate::Candidate;
use crate::error::DetectionError;

pub const OTSU_BINS: usize = 256;

/// Otsu's threshold over a 256-bin histogram of `values`.
///
/// Returns the centre of the bin that maximises the between-class variance;
/// values `<=` the threshold form the lower class. A constant input returns
/// its only value.
pub fn otsu_threshold(values: &[f32]) -> Result<f32, DetectionError> {
    if values.is_empty() {
        return Err(DetectionError::InvalidParameter(
            "cannot threshold an empty set of responses".to_string(),
        ));
    }
    let values = Array1::from_vec(values.to_vec());
    let min = *values
        .min()
        .map_err(|e| DetectionError::InvalidParameter(format!("response values: {}", e)))?;
    let max = *values
        .max()
        .map_err(|e| DetectionError::InvalidParameter(format!("response values: {}", e)))?;
    if !min.is_finite() || !max.is_finite() {
        return Err(DetectionError::InvalidParameter(
            "response values must be finite".to_string(),
        ));
    }
    if min == max {
        return Ok(min);
    }

    let (min, max) = (min as f64, max as f64);
    let width = (max - min) / OTSU_BINS as f64;
    let mut histogram = [0.0_f64; OTSU_BINS];
    for &v in values.iter() {
        let bin = (((v as f64 - min) / width) as usize).min(OTSU_BINS - 1);
        histogram[bin] += 1.0;
    }
    let centres: Vec<f64> = (0..OTSU_BINS)
        .map(|i| min + width * (i as f64 + 0.5))
        .collect();

    let total: f64 = histogram.iter().sum();
    let total_sum: f64 = histogram.iter().zip(&centres).map(|(h, c)| h * c).sum();
    let mut weight_low = 0.0;
    let mut sum_low = 0.0;
    let mut best = (f64::NEG_INFINITY, 0);
    for split in 0..OTSU_BINS - 1 {
        weight_low += histogram[split];
        sum_low += histogram[split] * centres[split];
        let weight_high = total - weight_low;
        if weight_low == 0.0 || weight_high == 0.0 {
            continue;
        }
        let mean_low = sum_low / weight_low;
        let mean_high = (total_sum - sum_low) / weight_high;
        let variance = weight_low * weight_high * (mean_low - mean_high).powi(2);
        if variance > best.0 {
            best = (variance, split);
        }
    }
    Ok(centres[best.1] as f32)
}

/// Candidates whose response is at or below `threshold`.
pub fn apply_threshold(candidates: &[Candidate], threshold: f32) -> Vec<Candidate> {
    candidates
        .iter()
        .filter(|c| c.value <= threshold)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::{apply_threshold, otsu_threshold};
    use crate::candidate::{Candidate, Rgb};

    #[test]
    fn test_bimodal_split() {
        let values = std::iter::repeat(-10.0_f32)
            .take(40)
            .chain(std::iter::repeat(-1.0).take(60))
            .collect_vec();
        let threshold = otsu_threshold(&values).unwrap();
        assert!(threshold >= -10.0 && threshold < -1.0);
        assert_eq!(values.iter().filter(|&&v| v <= threshold).count(), 40);
    }

    #[test]
    fn test_spread_clusters() {
        let values = (0..50)
            .map(|i| -20.0 + i as f32 * 0.02)
            .chain((0..50).map(|i| -2.0 + i as f32 * 0.02))
            .collect_vec();
        let threshold = otsu_threshold(&values).unwrap();
        assert!(threshold > -19.1 && threshold < -2.0);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(otsu_threshold(&[]).is_err());
        assert!(otsu_threshold(&[1.0, f32::NAN]).is_err());
        assert_eq!(otsu_threshold(&[-3.0, -3.0]).unwrap(), -3.0);
    }

    #[test]
    fn test_apply_threshold_is_inclusive() {
        let candidates = [-5.0, -2.0, -1.0, 0.5]
            .iter()
            .map(|&v| Candidate::new([0, 0, 0], 0, v, Rgb(0, 0, 0)))
            .collect_vec();
        let kept = apply_threshold(&candidates, -2.0);
        assert_eq!(kept.iter().map(|c| c.value).collect_vec(), vec![-5.0, -2.0]);
    }
}
