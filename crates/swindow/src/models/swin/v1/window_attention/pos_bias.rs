//! # Learned Relative Position Bias
//!
//! A single small table of per-head biases, one row per distinct in-window
//! offset, shared by every window and every batch element. Window-relative
//! position is translation invariant, so the table does not grow with
//! sequence length.

use crate::models::swin::v1::window_attention::pos_grid::{
    num_relative_offsets, relative_position_index,
};
use burn::config::Config;
use burn::module::{Module, Param, ParamId};
use burn::prelude::{Backend, Int, Tensor};
use burn::tensor::Distribution;

/// Standard deviation for the bias table initialization.
pub const BIAS_TABLE_INIT_STD: f64 = 0.02;

/// Configuration for the [`RelativePositionBias`] module.
#[derive(Config, Debug)]
pub struct RelativePositionBiasConfig {
    /// Number of attention heads.
    pub num_heads: usize,

    /// Window shape as [height, width].
    pub window_shape: [usize; 2],
}

impl RelativePositionBiasConfig {
    /// Initialize a [`RelativePositionBias`] module.
    ///
    /// The bias table is a trainable parameter; the position index is a
    /// constant buffer derived from the window shape.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> RelativePositionBias<B> {
        let table = Tensor::random(
            [num_relative_offsets(self.window_shape), self.num_heads],
            Distribution::Normal(0.0, BIAS_TABLE_INIT_STD),
            device,
        );

        RelativePositionBias {
            num_heads: self.num_heads,
            window_shape: self.window_shape,
            table: Param::initialized(ParamId::new(), table),
            index: relative_position_index(self.window_shape, device),
        }
    }
}

/// The `RelativePositionBias` module.
#[derive(Module, Debug)]
pub struct RelativePositionBias<B: Backend> {
    /// Number of attention heads.
    pub num_heads: usize,

    /// Window shape as [height, width].
    pub window_shape: [usize; 2],

    /// Learned bias table, ``(num_relative_offsets, num_heads)``.
    pub table: Param<Tensor<B, 2>>,

    /// Precomputed position-pair index, ``(Wh*Ww, Wh*Ww)``; read-only.
    pub index: Tensor<B, 2, Int>,
}

impl<B: Backend> RelativePositionBias<B> {
    /// Number of positions inside one window.
    #[must_use]
    pub fn num_positions(&self) -> usize {
        let [wh, ww] = self.window_shape;
        wh * ww
    }

    /// Gather the bias for every (query, key) position pair.
    ///
    /// ## Returns
    ///
    /// - Output tensor of shape (`num_heads`, Wh*Ww, Wh*Ww).
    #[must_use]
    pub fn forward(&self) -> Tensor<B, 3> {
        let n = self.num_positions();

        let flat: Tensor<B, 1, Int> = self.index.clone().reshape([n * n]);
        let bias = self.table.val().select(0, flat);
        // (n * n, num_heads)

        bias.reshape([n, n, self.num_heads]).permute([2, 0, 1])
        // (num_heads, n, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use burn::backend::NdArray;
    use burn::prelude::TensorData;

    #[test]
    fn test_init_shapes() {
        let device = Default::default();

        let rpb = RelativePositionBiasConfig::new(4, [3, 3]).init::<NdArray>(&device);

        assert_eq!(rpb.num_positions(), 9);
        assert_eq!(rpb.table.val().dims(), [25, 4]);
        assert_eq!(rpb.index.dims(), [9, 9]);
        assert_eq!(rpb.forward().dims(), [4, 9, 9]);
    }

    #[test]
    fn test_forward_gathers_table_rows() {
        let device = Default::default();

        // With one head and table row r holding the value r, the gathered
        // bias must reproduce the index matrix itself.
        let table: Tensor<NdArray, 2> =
            Tensor::arange(0..9, &device).float().reshape([9, 1]);
        let rpb = RelativePositionBias {
            num_heads: 1,
            window_shape: [2, 2],
            table: Param::initialized(ParamId::new(), table),
            index: relative_position_index([2, 2], &device),
        };

        rpb.forward().to_data().assert_eq(
            &TensorData::from([[
                [4.0_f32, 3.0, 1.0, 0.0],
                [5.0, 4.0, 2.0, 1.0],
                [7.0, 6.0, 4.0, 3.0],
                [8.0, 7.0, 5.0, 4.0],
            ]]),
            false,
        );
    }
}
