//! # Shifted-Window Transformer Block
//!
//! Pre-norm residual block: windowed self-attention over an optionally
//! cyclically shifted feature grid, followed by a position-wise
//! feed-forward sub-block. Shape preserving, so blocks stack freely.
//!
//! See: <https://arxiv.org/pdf/2103.14030>

use crate::layers::drop::drop_path::{DropPath, DropPathConfig};
use crate::models::swin::v1::window_attention::attention::{
    WindowAttention, WindowAttentionConfig,
};
use crate::models::swin::v1::window_attention::attention_mask::shift_attention_mask;
use crate::models::swin::v1::windowing::{cyclic_shift, window_partition, window_reverse};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Gelu, LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::prelude::{Backend, Tensor};

/// Configuration for the [`Mlp`] sub-block.
#[derive(Config, Debug)]
pub struct MlpConfig {
    /// Input and output dimension size.
    pub d_input: usize,

    /// Hidden (feed-forward) dimension size.
    pub d_hidden: usize,

    /// Dropout rate applied after each linear layer.
    #[config(default = 0.)]
    pub drop: f64,
}

impl MlpConfig {
    /// Initialize an [`Mlp`] sub-block.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Mlp<B> {
        Mlp {
            fc1: LinearConfig::new(self.d_input, self.d_hidden).init(device),
            act: Gelu::new(),
            fc2: LinearConfig::new(self.d_hidden, self.d_input).init(device),
            drop: DropoutConfig { prob: self.drop }.init(),
        }
    }
}

/// Position-wise feed-forward sub-block.
///
/// ``Linear -> Gelu -> Dropout -> Linear -> Dropout``.
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    /// Expansion linear layer.
    pub fc1: Linear<B>,

    /// Smooth nonlinearity between the linear layers.
    pub act: Gelu,

    /// Contraction linear layer.
    pub fc2: Linear<B>,

    /// Dropout applied after each linear layer.
    pub drop: Dropout,
}

impl<B: Backend> Mlp<B> {
    /// Forward pass; shape preserving over ``(batch, tokens, d_input)``.
    #[must_use]
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
    ) -> Tensor<B, 3> {
        let x = self.fc1.forward(x);
        let x = self.act.forward(x);
        let x = self.drop.forward(x);
        let x = self.fc2.forward(x);
        self.drop.forward(x)
    }
}

/// Common introspection interface for `SwinBlock`.
///
/// The window/shift accessors report *effective* values: a configured
/// window larger than the feature grid is clamped to the smaller grid
/// side, and shifting is disabled for such degenerate windows.
pub trait SwinBlockMeta {
    /// Get the input/channel dimension size.
    fn d_input(&self) -> usize;

    /// Get the feature grid resolution ``[height, width]`` in patches.
    fn input_resolution(&self) -> [usize; 2];

    /// Get the number of attention heads.
    fn num_heads(&self) -> usize;

    /// Get the effective window size.
    fn window_size(&self) -> usize;

    /// Get the effective shift size.
    fn shift_size(&self) -> usize;
}

/// Configuration for the [`SwinBlock`] module.
#[derive(Config, Debug)]
pub struct SwinBlockConfig {
    /// Input dimension size.
    pub d_input: usize,

    /// Feature grid resolution ``[height, width]`` in patches.
    pub input_resolution: [usize; 2],

    /// Number of attention heads.
    pub num_heads: usize,

    /// Feed-forward hidden dimension size.
    pub d_ffn: usize,

    /// Window size; clamped to ``min(height, width)`` when it exceeds the grid.
    #[config(default = 7)]
    pub window_size: usize,

    /// Cyclic shift size; 0 for W-MSA, ``window_size / 2`` for SW-MSA.
    #[config(default = 0)]
    pub shift_size: usize,

    /// Whether to enable bias for the Q/K/V projections.
    #[config(default = true)]
    pub enable_qkv_bias: bool,

    /// Dropout rate for projections and the feed-forward sub-block.
    #[config(default = 0.)]
    pub drop: f64,

    /// Dropout rate for attention weights.
    #[config(default = 0.)]
    pub attn_drop: f64,

    /// Stochastic depth rate for both residual branches.
    #[config(default = 0.)]
    pub drop_path: f64,
}

impl SwinBlockMeta for SwinBlockConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn input_resolution(&self) -> [usize; 2] {
        self.input_resolution
    }

    fn num_heads(&self) -> usize {
        self.num_heads
    }

    fn window_size(&self) -> usize {
        let [h, w] = self.input_resolution;
        self.window_size.min(h.min(w))
    }

    fn shift_size(&self) -> usize {
        let [h, w] = self.input_resolution;
        if self.window_size > h.min(w) {
            // Degenerate window: one window covers the grid, nothing to shift.
            0
        } else {
            self.shift_size
        }
    }
}

impl SwinBlockConfig {
    /// Initialize a [`SwinBlock`] module.
    ///
    /// The shift mask, when needed, is built here once from the static
    /// grid geometry and reused for every forward pass.
    ///
    /// ## Panics
    ///
    /// If the effective window size does not evenly divide the grid, or
    /// the shift size is not smaller than the window size.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> SwinBlock<B> {
        let [h, w] = self.input_resolution;
        let window_size = SwinBlockMeta::window_size(self);
        let shift_size = SwinBlockMeta::shift_size(self);

        assert_eq!(
            [h % window_size, w % window_size],
            [0, 0],
            "grid {:?} must be a multiple of the window size {window_size}",
            self.input_resolution,
        );
        assert!(
            shift_size < window_size,
            "shift size {shift_size} must be smaller than the window size {window_size}",
        );

        let attn_mask = match shift_size {
            0 => None,
            _ => Some(shift_attention_mask::<B>(
                self.input_resolution,
                window_size,
                shift_size,
                device,
            )),
        };

        SwinBlock {
            d_input: self.d_input,
            input_resolution: self.input_resolution,
            window_size,
            shift_size,
            norm1: LayerNormConfig::new(self.d_input).init(device),
            attn: WindowAttentionConfig::new(
                self.d_input,
                [window_size, window_size],
                self.num_heads,
            )
            .with_enable_qkv_bias(self.enable_qkv_bias)
            .with_attn_drop(self.attn_drop)
            .with_proj_drop(self.drop)
            .init(device),
            drop_path: DropPathConfig::new()
                .with_drop_prob(self.drop_path)
                .init(),
            norm2: LayerNormConfig::new(self.d_input).init(device),
            mlp: MlpConfig::new(self.d_input, self.d_ffn)
                .with_drop(self.drop)
                .init(device),
            attn_mask,
        }
    }
}

/// The `SwinBlock` module.
#[derive(Module, Debug)]
pub struct SwinBlock<B: Backend> {
    /// Input dimension size.
    pub d_input: usize,

    /// Feature grid resolution ``[height, width]`` in patches.
    pub input_resolution: [usize; 2],

    /// Effective window size.
    pub window_size: usize,

    /// Effective shift size.
    pub shift_size: usize,

    /// Pre-attention normalization.
    pub norm1: LayerNorm<B>,

    /// Windowed self-attention.
    pub attn: WindowAttention<B>,

    /// Stochastic depth on both residual branches.
    pub drop_path: DropPath,

    /// Pre-feed-forward normalization.
    pub norm2: LayerNorm<B>,

    /// Feed-forward sub-block.
    pub mlp: Mlp<B>,

    /// Precomputed additive shift mask; present iff `shift_size > 0`.
    pub attn_mask: Option<Tensor<B, 3>>,
}

impl<B: Backend> SwinBlockMeta for SwinBlock<B> {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn input_resolution(&self) -> [usize; 2] {
        self.input_resolution
    }

    fn num_heads(&self) -> usize {
        self.attn.num_heads
    }

    fn window_size(&self) -> usize {
        self.window_size
    }

    fn shift_size(&self) -> usize {
        self.shift_size
    }
}

impl<B: Backend> SwinBlock<B> {
    /// Forward pass of the `SwinBlock` module.
    ///
    /// ## Arguments
    ///
    /// - `x`: Input sequence of shape ``(batch, height * width, d_input)``.
    ///
    /// ## Returns
    ///
    /// - Output sequence of the same shape.
    #[must_use]
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
    ) -> Tensor<B, 3> {
        let [h, w] = self.input_resolution;
        let [batch] = unpack_shape_contract!(
            ["batch", "tokens" = "height" * "width", "channels"],
            &x,
            &["batch"],
            &[
                ("height", h),
                ("width", w),
                ("channels", self.d_input)
            ]
        );

        let shortcut = x.clone();
        let x = self.norm1.forward(x);
        let x = x.reshape([batch, h, w, self.d_input]);

        let shift = self.shift_size as i64;
        let x = match self.shift_size {
            0 => x,
            _ => cyclic_shift(x, [-shift, -shift]),
        };

        let windows = window_partition(x, self.window_size);
        let num_windows = windows.dims()[0];
        let area = self.window_size * self.window_size;
        let windows = windows.reshape([num_windows, area, self.d_input]);
        // (batch * num_windows, ws * ws, c)

        let windows = self.attn.forward(windows, self.attn_mask.clone());

        let windows =
            windows.reshape([num_windows, self.window_size, self.window_size, self.d_input]);
        let x = window_reverse(windows, self.window_size, h, w);

        let x = match self.shift_size {
            0 => x,
            _ => cyclic_shift(x, [shift, shift]),
        };

        let x = x.reshape([batch, h * w, self.d_input]);
        let x = shortcut + self.drop_path.forward(x);

        let x = x.clone()
            + self
                .drop_path
                .forward(self.mlp.forward(self.norm2.forward(x)));

        assert_shape_contract_periodically!(
            ["batch", "tokens", "channels"],
            &x,
            &[
                ("batch", batch),
                ("tokens", h * w),
                ("channels", self.d_input)
            ]
        );

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    #[test]
    fn test_mlp() {
        let device = Default::default();

        let mlp = MlpConfig::new(8, 32).init::<NdArray>(&device);

        let x = Tensor::<NdArray, 3>::random([2, 5, 8], Distribution::Uniform(0.0, 1.0), &device);
        assert_eq!(mlp.forward(x).dims(), [2, 5, 8]);
    }

    #[test]
    fn test_block_meta() {
        let config = SwinBlockConfig::new(8, [4, 4], 2, 32)
            .with_window_size(2)
            .with_shift_size(1);

        assert_eq!(config.d_input(), 8);
        assert_eq!(config.input_resolution(), [4, 4]);
        assert_eq!(config.num_heads(), 2);
        assert_eq!(SwinBlockMeta::window_size(&config), 2);
        assert_eq!(SwinBlockMeta::shift_size(&config), 1);
    }

    #[test]
    fn test_unshifted_block_shape() {
        let device = Default::default();

        let block = SwinBlockConfig::new(8, [4, 4], 2, 32)
            .with_window_size(2)
            .init::<NdArray>(&device);

        assert!(block.attn_mask.is_none());

        let x = Tensor::<NdArray, 3>::random([3, 16, 8], Distribution::Uniform(0.0, 1.0), &device);
        assert_eq!(block.forward(x).dims(), [3, 16, 8]);
    }

    #[test]
    fn test_shifted_block_shape_and_mask() {
        let device = Default::default();

        // Window size 2 over a 4x4 grid with shift 1: 4 windows of 4
        // positions, and a (4, 4, 4) additive mask.
        let block = SwinBlockConfig::new(8, [4, 4], 2, 32)
            .with_window_size(2)
            .with_shift_size(1)
            .init::<NdArray>(&device);

        assert_eq!(
            block.attn_mask.as_ref().map(|mask| mask.dims()),
            Some([4, 4, 4]),
        );

        let x = Tensor::<NdArray, 3>::random([1, 16, 8], Distribution::Uniform(0.0, 1.0), &device);
        assert_eq!(block.forward(x).dims(), [1, 16, 8]);
    }

    #[test]
    fn test_degenerate_window_clamps() {
        let device = Default::default();

        // A window larger than the grid is clamped to the grid and the
        // shift is disabled; a single window covers everything.
        let block = SwinBlockConfig::new(4, [1, 1], 2, 16)
            .with_window_size(2)
            .with_shift_size(1)
            .init::<NdArray>(&device);

        assert_eq!(block.window_size, 1);
        assert_eq!(block.shift_size, 0);
        assert!(block.attn_mask.is_none());

        let x = Tensor::<NdArray, 3>::random([2, 1, 4], Distribution::Uniform(0.0, 1.0), &device);
        assert_eq!(block.forward(x).dims(), [2, 1, 4]);
    }

    #[test]
    #[should_panic(expected = "must be a multiple of the window size")]
    fn test_indivisible_grid_fails_at_init() {
        let device = Default::default();

        let _ = SwinBlockConfig::new(8, [4, 6], 2, 32)
            .with_window_size(4)
            .init::<NdArray>(&device);
    }
}
