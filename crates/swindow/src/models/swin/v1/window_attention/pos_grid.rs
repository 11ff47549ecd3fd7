//! # Relative Position Indexing
//!
//! Maps every ordered pair of positions inside a window to a row of the
//! relative position bias table. Pure function of the window shape;
//! computed host-side once and uploaded as an integer buffer.

use burn::prelude::{Backend, Int, Tensor};
use burn::tensor::TensorData;

/// Number of distinct relative (row, col) offsets within a window.
///
/// A ``(wh, ww)`` window has ``(2 * wh - 1) * (2 * ww - 1)`` of them.
#[must_use]
pub fn num_relative_offsets(window_shape: [usize; 2]) -> usize {
    let [wh, ww] = window_shape;
    (2 * wh - 1) * (2 * ww - 1)
}

/// Compute the relative position index for a window shape.
///
/// For each ordered (query, key) pair of in-window positions, the combined
/// index is ``(Δrow + wh - 1) * (2 * ww - 1) + (Δcol + ww - 1)``, where the
/// deltas are query coordinates minus key coordinates. The result is
/// row-major over ``(query, key)`` pairs.
///
/// ## Arguments
///
/// - `window_shape`: The window shape ``[height, width]``.
///
/// ## Returns
///
/// ``wh * ww * wh * ww`` indices, each in ``0..num_relative_offsets``.
#[must_use]
pub fn relative_position_index_data(window_shape: [usize; 2]) -> Vec<i64> {
    let [wh, ww] = window_shape;
    let area = wh * ww;

    let mut index = Vec::with_capacity(area * area);
    for q in 0..area {
        let (q_row, q_col) = (q / ww, q % ww);
        for k in 0..area {
            let (k_row, k_col) = (k / ww, k % ww);

            let d_row = q_row as i64 - k_row as i64 + (wh as i64 - 1);
            let d_col = q_col as i64 - k_col as i64 + (ww as i64 - 1);

            index.push(d_row * (2 * ww as i64 - 1) + d_col);
        }
    }

    index
}

/// The relative position index as an integer lookup tensor.
///
/// ## Arguments
///
/// - `window_shape`: The window shape ``[height, width]``.
/// - `device`: The device on which the tensor will be created.
///
/// ## Returns
///
/// A ``(wh * ww, wh * ww)`` integer tensor of bias table row indices.
#[must_use]
pub fn relative_position_index<B: Backend>(
    window_shape: [usize; 2],
    device: &B::Device,
) -> Tensor<B, 2, Int> {
    let [wh, ww] = window_shape;
    let area = wh * ww;

    Tensor::from_data(
        TensorData::new(relative_position_index_data(window_shape), [area, area]),
        device,
    )
}
