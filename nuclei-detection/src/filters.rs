use itertools::Itertools;
use ndarray::{ArrayD, Axis, Zip};

/// Sampled Gaussian (`order == 0`) or its second derivative (`order == 2`).
///
/// The smoothing kernel sums to one. The second derivative kernel is shifted
/// to zero mean so a constant signal has no response.
pub fn gaussian_kernel(sigma: f64, order: usize) -> Vec<f32> {
    assert!(sigma > 0.0, "gaussian sigma must be positive");
    assert!(order == 0 || order == 2, "only orders 0 and 2 are supported");
    let radius = (4.0 * sigma).ceil().max(1.0) as i64;
    let var = sigma * sigma;
    let phi = (-radius..=radius)
        .map(|x| (-((x * x) as f64) / (2.0 * var)).exp())
        .collect_vec();
    let total: f64 = phi.iter().sum();
    let phi = phi.iter().map(|p| p / total).collect_vec();
    if order == 0 {
        return phi.iter().map(|&p| p as f32).collect();
    }
    let second = (-radius..=radius)
        .zip(&phi)
        .map(|(x, p)| p * ((x * x) as f64 / (var * var) - 1.0 / var))
        .collect_vec();
    let mean = second.iter().sum::<f64>() / second.len() as f64;
    second.iter().map(|v| (v - mean) as f32).collect()
}

/// Correlate every lane along `axis` with an odd-length `kernel`, replicating
/// the edge sample for reads past either end.
pub fn convolve_axis(input: &ArrayD<f32>, axis: usize, kernel: &[f32]) -> ArrayD<f32> {
    assert!(kernel.len() % 2 == 1, "kernel length must be odd");
    let radius = (kernel.len() / 2) as i64;
    let mut out = ArrayD::<f32>::zeros(input.raw_dim());
    let mut buffer = Vec::new();
    Zip::from(input.lanes(Axis(axis)))
        .and(out.lanes_mut(Axis(axis)))
        .for_each(|lane, mut out_lane| {
            buffer.clear();
            buffer.extend(lane.iter().copied());
            let last = buffer.len() as i64 - 1;
            for (i, o) in out_lane.iter_mut().enumerate() {
                let mut acc = 0.0_f32;
                for (k, w) in kernel.iter().enumerate() {
                    let j = (i as i64 + k as i64 - radius).max(0).min(last);
                    acc += w * buffer[j as usize];
                }
                *o = acc;
            }
        });
    out
}

/// Apply one kernel per axis in sequence.
pub fn separable_convolution(input: &ArrayD<f32>, kernels: &[Vec<f32>]) -> ArrayD<f32> {
    assert_eq!(
        kernels.len(),
        input.ndim(),
        "need exactly one kernel per axis"
    );
    kernels
        .iter()
        .enumerate()
        .fold(input.clone(), |acc, (axis, kernel)| {
            convolve_axis(&acc, axis, kernel)
        })
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;
    use ndarray::{ArrayD, IxDyn};

    use super::{convolve_axis, gaussian_kernel, separable_convolution};

    #[test]
    fn test_gaussian_kernel_normalised() {
        let kernel = gaussian_kernel(1.5, 0);
        assert_eq!(kernel.len(), 2 * 6 + 1);
        assert_approx_eq!(kernel.iter().sum::<f32>(), 1.0, 1e-5);
        assert!(kernel[6] > kernel[5] && kernel[5] > kernel[4]);
    }

    #[test]
    fn test_second_derivative_kernel() {
        let kernel = gaussian_kernel(2.0, 2);
        assert_approx_eq!(kernel.iter().sum::<f32>(), 0.0, 1e-5);
        // negative at the centre, symmetric
        assert!(kernel[8] < 0.0);
        assert_approx_eq!(kernel[0], kernel[16], 1e-7);
        // second moment of d2 gaussian is 2
        let moment: f32 = kernel
            .iter()
            .enumerate()
            .map(|(i, k)| {
                let x = i as f32 - 8.0;
                k * x * x
            })
            .sum();
        assert_approx_eq!(moment, 2.0, 0.05);
    }

    #[test]
    fn test_tiny_sigma_keeps_three_taps() {
        assert_eq!(gaussian_kernel(0.1, 0).len(), 3);
    }

    #[test]
    fn test_convolve_replicates_border() {
        let input = ArrayD::from_shape_vec(IxDyn(&[1, 4]), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let out = convolve_axis(&input, 1, &[1.0, 0.0, 0.0]);
        // out[i] = in[i - 1], clamped at the left edge
        assert_eq!(out.as_slice().unwrap(), &[1.0, 1.0, 2.0, 3.0]);
        let out = convolve_axis(&input, 1, &[0.0, 0.0, 1.0]);
        assert_eq!(out.as_slice().unwrap(), &[2.0, 3.0, 4.0, 4.0]);
    }

    #[test]
    fn test_constant_image_has_no_curvature() {
        let input = ArrayD::from_elem(IxDyn(&[6, 7, 5]), 3.0_f32);
        let kernels = vec![
            gaussian_kernel(1.0, 2),
            gaussian_kernel(1.0, 0),
            gaussian_kernel(1.0, 0),
        ];
        let out = separable_convolution(&input, &kernels);
        assert!(out.iter().all(|v| v.abs() < 1e-5));
    }
}
