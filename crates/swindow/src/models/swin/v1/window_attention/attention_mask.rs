//! # SW-MSA Shift Masking
//!
//! After a cyclic shift, a window can contain cells that wrapped around
//! from spatially unrelated regions of the grid. Attention between cells
//! with different origin regions is suppressed with a large negative
//! additive score.
//!
//! See: <https://arxiv.org/pdf/2103.14030>

use crate::models::swin::v1::windowing::window_partition;
use burn::prelude::{Backend, Int, Tensor};

/// Additive score for suppressed (cross-origin) attention pairs.
pub const ATTENTION_MASK_VALUE: f64 = -100.0;

/// Label every grid cell with its origin-region id.
///
/// The rows and columns are each split at ``len - window_size`` and
/// ``len - shift_size``, giving a 3x3 partition of the grid and 9 region
/// ids. Cells sharing an id may attend to each other after the shift.
///
/// ## Arguments
///
/// - `input_shape`: The grid shape ``[height, width]``.
/// - `window_size`: The size of the window.
/// - `shift_size`: The size of the cyclic shift.
/// - `device`: The device on which the tensor will be created.
///
/// ## Returns
///
/// An ``(height, width)`` integer label grid.
fn shift_region_labels<B: Backend>(
    input_shape: [usize; 2],
    window_size: usize,
    shift_size: usize,
    device: &B::Device,
) -> Tensor<B, 2, Int> {
    let [h, w] = input_shape;
    assert!(
        window_size <= h && window_size <= w,
        "window size {window_size} exceeds the grid {input_shape:?}",
    );
    assert!(
        shift_size < window_size,
        "shift size {shift_size} must be smaller than the window size {window_size}",
    );

    let mut labels = Tensor::<B, 2, Int>::zeros([h, w], device);

    let h_slices = [
        0..h - window_size,
        h - window_size..h - shift_size,
        h - shift_size..h,
    ];
    let w_slices = [
        0..w - window_size,
        w - window_size..w - shift_size,
        w - shift_size..w,
    ];

    let mut region: i64 = 0;
    for rows in h_slices.iter() {
        for cols in w_slices.iter() {
            if !rows.is_empty() && !cols.is_empty() {
                let val: Tensor<B, 1, Int> = Tensor::from_data([region], device);
                let val = val.unsqueeze::<2>().expand([rows.len(), cols.len()]);

                labels = labels.slice_assign([rows.clone(), cols.clone()], val);
            }
            region += 1;
        }
    }

    labels
}

/// Build the additive attention mask for a shifted-window block.
///
/// Entry ``(window, i, j)`` is 0 when cells `i` and `j` of that window
/// originate from the same region, and [`ATTENTION_MASK_VALUE`] otherwise.
/// The mask depends only on static shape configuration and is reused
/// unchanged across every forward call and batch element.
///
/// ## Arguments
///
/// - `input_shape`: The grid shape ``[height, width]``.
/// - `window_size`: The size of the window.
/// - `shift_size`: The size of the cyclic shift.
/// - `device`: The device on which the tensor will be created.
///
/// ## Returns
///
/// A ``(num_windows, window_size^2, window_size^2)`` additive mask.
#[must_use]
pub fn shift_attention_mask<B: Backend>(
    input_shape: [usize; 2],
    window_size: usize,
    shift_size: usize,
    device: &B::Device,
) -> Tensor<B, 3> {
    let labels = shift_region_labels::<B>(input_shape, window_size, shift_size, device);
    // (h, w)

    let labels = labels.unsqueeze_dim::<3>(2).unsqueeze::<4>();
    // (1, h, w, 1)

    let label_windows = window_partition(labels, window_size);
    // (num_windows, ws, ws, 1)

    let area = window_size * window_size;
    let label_windows = label_windows.reshape([-1, area as i32]);
    // (num_windows, ws * ws)

    let diff = label_windows.clone().unsqueeze_dim::<3>(1) - label_windows.unsqueeze_dim::<3>(2);
    // (num_windows, ws * ws, ws * ws)

    diff.not_equal_elem(0)
        .float()
        .mul_scalar(ATTENTION_MASK_VALUE)
}

/// Add a per-window attention mask to a batch of attention scores.
///
/// The scores are reshaped to expose the window-group axis, the mask is
/// broadcast over batch and heads, and the result is flattened back.
///
/// ## Arguments
///
/// - `batch_windows`: Batch size times number of windows.
/// - `num_positions`: Number of positions in each window (ws * ws).
/// - `num_heads`: Number of attention heads.
/// - `attn`: Scores of shape (`batch_windows`, `num_heads`, ws*ws, ws*ws).
/// - `mask`: Additive mask of shape (`num_windows`, ws*ws, ws*ws).
///
/// ## Returns
///
/// Masked scores of shape (`batch_windows`, `num_heads`, ws*ws, ws*ws).
#[must_use]
pub fn apply_attention_mask<B: Backend>(
    batch_windows: usize,
    num_positions: usize,
    num_heads: usize,
    attn: Tensor<B, 4>,
    mask: Tensor<B, 3>,
) -> Tensor<B, 4> {
    let [num_windows, mask_h, mask_w] = mask.dims();
    assert_eq!(
        [mask_h, mask_w],
        [num_positions, num_positions],
        "mask shape does not match the window area {num_positions}",
    );
    assert_eq!(
        batch_windows % num_windows,
        0,
        "{batch_windows} batched windows do not group into {num_windows} mask windows",
    );
    let batch = batch_windows / num_windows;

    let attn = attn.reshape([batch, num_windows, num_heads, num_positions, num_positions]);
    let mask = mask.reshape([1, num_windows, 1, num_positions, num_positions]);

    (attn + mask).reshape([batch_windows, num_heads, num_positions, num_positions])
}

#[cfg(test)]
mod tests {
    use super::*;

    use burn::backend::NdArray;
    use burn::prelude::TensorData;
    use burn::tensor::Distribution;

    #[test]
    fn test_shift_attention_mask_4x4() {
        let device = Default::default();

        const O: f32 = 0.0;
        const X: f32 = ATTENTION_MASK_VALUE as f32;

        shift_attention_mask::<NdArray>([4, 4], 2, 1, &device)
            .to_data()
            .assert_eq(
                &TensorData::from([
                    [
                        [O, O, O, O],
                        [O, O, O, O],
                        [O, O, O, O],
                        [O, O, O, O],
                    ],
                    [
                        [O, X, O, X],
                        [X, O, X, O],
                        [O, X, O, X],
                        [X, O, X, O],
                    ],
                    [
                        [O, O, X, X],
                        [O, O, X, X],
                        [X, X, O, O],
                        [X, X, O, O],
                    ],
                    [
                        [O, X, X, X],
                        [X, O, X, X],
                        [X, X, O, X],
                        [X, X, X, O],
                    ],
                ]),
                false,
            );
    }

    #[test]
    fn test_mask_is_deterministic() {
        let device = Default::default();

        let a = shift_attention_mask::<NdArray>([6, 6], 3, 1, &device);
        let b = shift_attention_mask::<NdArray>([6, 6], 3, 1, &device);

        a.to_data().assert_eq(&b.to_data(), true);
    }

    #[test]
    fn test_mask_value_set() {
        let device = Default::default();

        for (shape, ws, ss) in [([6, 6], 3, 1), ([6, 6], 3, 2), ([8, 8], 4, 2)] {
            let mask = shift_attention_mask::<NdArray>(shape, ws, ss, &device);
            let area = ws * ws;
            assert_eq!(
                mask.dims(),
                [(shape[0] / ws) * (shape[1] / ws), area, area],
            );

            let value_set = mask
                .to_data()
                .iter::<f32>()
                .all(|v| v == 0.0 || v == ATTENTION_MASK_VALUE as f32);
            assert!(value_set);
        }
    }

    #[test]
    fn test_mask_diagonal_is_zero() {
        // A cell always shares its own origin region.
        let device = Default::default();

        let mask = shift_attention_mask::<NdArray>([8, 8], 4, 2, &device);
        let [num_windows, area, _] = mask.dims();

        let data = mask.to_data();
        let values = data.iter::<f32>().collect::<Vec<_>>();
        for w in 0..num_windows {
            for i in 0..area {
                assert_eq!(values[w * area * area + i * area + i], 0.0);
            }
        }
    }

    #[test]
    fn test_single_window_grid_mask() {
        // window == grid: the shift wraps the whole grid, and the mask
        // still partitions it into 9 origin regions.
        let device = Default::default();

        let mask = shift_attention_mask::<NdArray>([4, 4], 4, 2, &device);
        assert_eq!(mask.dims(), [1, 16, 16]);
    }

    #[test]
    fn test_apply_attention_mask() {
        let device = Default::default();

        let batch = 2;
        let num_heads = 3;
        let mask = shift_attention_mask::<NdArray>([4, 4], 2, 1, &device);
        let [num_windows, area, _] = mask.dims();

        let attn = Tensor::<NdArray, 4>::random(
            [batch * num_windows, num_heads, area, area],
            Distribution::Uniform(0.0, 1.0),
            &device,
        );

        let masked = apply_attention_mask(
            batch * num_windows,
            area,
            num_heads,
            attn.clone(),
            mask,
        );
        assert_eq!(masked.dims(), attn.dims());

        // A zero mask is the identity.
        let zeros = Tensor::<NdArray, 3>::zeros([num_windows, area, area], &device);
        apply_attention_mask(batch * num_windows, area, num_heads, attn.clone(), zeros)
            .to_data()
            .assert_eq(&attn.to_data(), true);
    }
}
