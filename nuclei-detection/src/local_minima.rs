use itertools::Itertools;
use ndarray::ArrayD;

use crate::scale_space::ScaleResponseStack;

/// Offsets of the full 1-connectivity neighbourhood in `ndim` dimensions,
/// centre excluded.
fn neighbourhood_offsets(ndim: usize) -> Vec<Vec<i64>> {
    (0..ndim)
        .map(|_| -1_i64..=1)
        .multi_cartesian_product()
        .filter(|offset| offset.iter().any(|&o| o != 0))
        .collect_vec()
}

/// Positions strictly smaller than every neighbour, reads outside the array
/// returning `+inf`. Ties disqualify the centre.
pub fn find_local_minima(data: &ArrayD<f32>) -> Vec<Vec<usize>> {
    let data = data.as_standard_layout();
    let shape = data.shape().to_vec();
    let ndim = shape.len();
    let values = match data.as_slice() {
        Some(values) => values,
        None => return Vec::new(),
    };
    if values.is_empty() {
        return Vec::new();
    }

    let mut strides = vec![1_i64; ndim];
    for d in (0..ndim.saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1] as i64;
    }
    let offsets = neighbourhood_offsets(ndim);
    let flat_offsets = offsets
        .iter()
        .map(|o| o.iter().zip(&strides).map(|(a, b)| a * b).sum::<i64>())
        .collect_vec();

    let mut minima = Vec::new();
    let mut index = vec![0_usize; ndim];
    for (flat, &center) in values.iter().enumerate() {
        let is_minimum = offsets.iter().zip(&flat_offsets).all(|(offset, step)| {
            let inside = index
                .iter()
                .zip(offset)
                .zip(&shape)
                .all(|((&i, &o), &len)| {
                    let j = i as i64 + o;
                    j >= 0 && j < len as i64
                });
            let neighbour = if inside {
                values[(flat as i64 + step) as usize]
            } else {
                f32::INFINITY
            };
            center < neighbour
        });
        if is_minimum {
            minima.push(index.clone());
        }
        // advance the multi-index in row-major order
        for d in (0..ndim).rev() {
            index[d] += 1;
            if index[d] < shape[d] {
                break;
            }
            index[d] = 0;
        }
    }
    minima
}

/// Local minima of a response stack in (space..., scale) coordinates.
pub fn stack_local_minima(stack: &ScaleResponseStack) -> Vec<Vec<usize>> {
    find_local_minima(&stack.data)
}
