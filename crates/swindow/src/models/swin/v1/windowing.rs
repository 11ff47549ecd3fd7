//! # Windowing Operations
//!
//! Reshape-only transforms between spatial feature grids and stacks of
//! non-overlapping windows, plus the cyclic shift used between successive
//! window-attention blocks.
//!
//! See: <https://arxiv.org/pdf/2103.14030>

use burn::prelude::{Backend, Tensor};
use burn::tensor::BasicOps;

/// Partition a feature grid into non-overlapping windows.
///
/// Every grid cell maps to exactly one (window, position) pair; no data is
/// duplicated or dropped. Windows are ordered row-major over the window
/// grid, batch-major outermost.
///
/// ## Arguments
///
/// - `x`: Feature grid of shape ``(batch, height, width, channels)``.
/// - `window_size`: Side length of each square window.
///
/// ## Returns
///
/// Windows of shape
/// ``(batch * height/window_size * width/window_size, window_size, window_size, channels)``.
///
/// ## Panics
///
/// If `window_size` does not evenly divide the grid height and width.
#[must_use]
pub fn window_partition<B: Backend, K>(
    x: Tensor<B, 4, K>,
    window_size: usize,
) -> Tensor<B, 4, K>
where
    K: BasicOps<B>,
{
    let [b, h, w, c] = x.dims();
    assert_eq!(
        h % window_size,
        0,
        "grid height {h} must be a multiple of the window size {window_size}",
    );
    assert_eq!(
        w % window_size,
        0,
        "grid width {w} must be a multiple of the window size {window_size}",
    );

    let x = x.reshape([
        b,
        h / window_size,
        window_size,
        w / window_size,
        window_size,
        c,
    ]);

    x.permute([0, 1, 3, 2, 4, 5]).reshape([
        b * (h / window_size) * (w / window_size),
        window_size,
        window_size,
        c,
    ])
}

/// Reassemble windows into a feature grid.
///
/// Inverse of [`window_partition`]: partitioning and reversing with the
/// same parameters is the identity transform.
///
/// ## Arguments
///
/// - `windows`: Window stack of shape
///   ``(batch * num_windows, window_size, window_size, channels)``.
/// - `window_size`: Side length of each square window.
/// - `height`: Target grid height.
/// - `width`: Target grid width.
///
/// ## Returns
///
/// Feature grid of shape ``(batch, height, width, channels)``.
///
/// ## Panics
///
/// If `window_size` does not evenly divide `height` and `width`, or the
/// window stack does not tile a whole number of grids.
#[must_use]
pub fn window_reverse<B: Backend, K>(
    windows: Tensor<B, 4, K>,
    window_size: usize,
    height: usize,
    width: usize,
) -> Tensor<B, 4, K>
where
    K: BasicOps<B>,
{
    let [total_windows, wh, ww, c] = windows.dims();
    assert_eq!(
        [wh, ww],
        [window_size, window_size],
        "window stack shape {:?} does not match the window size {window_size}",
        [wh, ww],
    );
    assert_eq!(
        height % window_size,
        0,
        "grid height {height} must be a multiple of the window size {window_size}",
    );
    assert_eq!(
        width % window_size,
        0,
        "grid width {width} must be a multiple of the window size {window_size}",
    );

    let windows_per_grid = (height / window_size) * (width / window_size);
    assert_eq!(
        total_windows % windows_per_grid,
        0,
        "{total_windows} windows do not tile whole ({height}, {width}) grids",
    );
    let b = total_windows / windows_per_grid;

    let x = windows.reshape([
        b,
        height / window_size,
        width / window_size,
        window_size,
        window_size,
        c,
    ]);

    x.permute([0, 1, 3, 2, 4, 5])
        .reshape([b, height, width, c])
}

/// Cyclically shift a feature grid along its spatial axes.
///
/// Wrap-around translation; cells rolled off one edge reappear at the
/// opposite edge. Shifting by ``[-s, -s]`` and then ``[s, s]`` returns the
/// original grid exactly.
///
/// ## Arguments
///
/// - `x`: Feature grid of shape ``(batch, height, width, channels)``.
/// - `shift`: Signed roll amounts for the (row, col) axes.
///
/// ## Returns
///
/// Shifted grid of the same shape.
#[must_use]
pub fn cyclic_shift<B: Backend, K>(
    x: Tensor<B, 4, K>,
    shift: [i64; 2],
) -> Tensor<B, 4, K>
where
    K: BasicOps<B>,
{
    let x = roll_dim(x, shift[0], 1);
    roll_dim(x, shift[1], 2)
}

/// Roll one axis of a tensor with wrap-around.
fn roll_dim<B: Backend, K>(
    x: Tensor<B, 4, K>,
    shift: i64,
    dim: usize,
) -> Tensor<B, 4, K>
where
    K: BasicOps<B>,
{
    let size = x.dims()[dim];
    if size == 0 {
        return x;
    }

    let shift = shift.rem_euclid(size as i64) as usize;
    if shift == 0 {
        return x;
    }

    let head = x.clone().narrow(dim, 0, size - shift);
    let tail = x.narrow(dim, size - shift, shift);
    Tensor::cat(vec![tail, head], dim)
}

#[cfg(test)]
mod tests {
    use super::*;

    use burn::backend::NdArray;
    use burn::prelude::{Int, TensorData};

    fn index_grid(
        height: usize,
        width: usize,
        device: &<NdArray as Backend>::Device,
    ) -> Tensor<NdArray, 4, Int> {
        Tensor::arange(0..(height * width) as i64, device).reshape([1, height, width, 1])
    }

    #[test]
    fn test_window_partition_ordering() {
        let device = Default::default();
        let grid = index_grid(4, 4, &device);

        let windows = window_partition(grid, 2);
        assert_eq!(windows.dims(), [4, 2, 2, 1]);

        windows.reshape([4, 4]).to_data().assert_eq(
            &TensorData::from([
                [0_i64, 1, 4, 5],
                [2, 3, 6, 7],
                [8, 9, 12, 13],
                [10, 11, 14, 15],
            ]),
            false,
        );
    }

    #[test]
    fn test_window_round_trip() {
        let device = Default::default();

        for (h, w, ws) in [(4, 4, 2), (6, 6, 3), (4, 8, 2), (2, 2, 2), (1, 1, 1)] {
            let grid = index_grid(h, w, &device);

            let windows = window_partition(grid.clone(), ws);
            let restored = window_reverse(windows, ws, h, w);

            restored.to_data().assert_eq(&grid.to_data(), true);
        }
    }

    #[test]
    fn test_window_round_trip_batched() {
        let device = Default::default();
        let grid: Tensor<NdArray, 4, Int> =
            Tensor::arange(0..(3 * 4 * 6 * 2) as i64, &device).reshape([3, 4, 6, 2]);

        let windows = window_partition(grid.clone(), 2);
        assert_eq!(windows.dims(), [3 * 2 * 3, 2, 2, 2]);

        window_reverse(windows, 2, 4, 6)
            .to_data()
            .assert_eq(&grid.to_data(), true);
    }

    #[test]
    #[should_panic(expected = "must be a multiple of the window size")]
    fn test_window_partition_indivisible() {
        let device = Default::default();
        let grid = index_grid(4, 6, &device);
        let _ = window_partition(grid, 4);
    }

    #[test]
    fn test_cyclic_shift_values() {
        let device = Default::default();
        let grid = index_grid(3, 3, &device);

        let shifted = cyclic_shift(grid, [-1, -1]);
        shifted.reshape([3, 3]).to_data().assert_eq(
            &TensorData::from([[4_i64, 5, 3], [7, 8, 6], [1, 2, 0]]),
            false,
        );
    }

    #[test]
    fn test_cyclic_shift_inverts() {
        let device = Default::default();

        for s in 0..4 {
            let grid = index_grid(4, 4, &device);
            let out = cyclic_shift(cyclic_shift(grid.clone(), [-s, -s]), [s, s]);
            out.to_data().assert_eq(&grid.to_data(), true);
        }
    }

    #[test]
    fn test_cyclic_shift_full_period() {
        let device = Default::default();
        let grid = index_grid(4, 4, &device);

        let out = cyclic_shift(grid.clone(), [4, -4]);
        out.to_data().assert_eq(&grid.to_data(), true);
    }
}
