//! # Patch Merging
//!
//! Downsampling between stages: merges each 2x2 neighborhood of patches,
//! halving the spatial resolution and doubling the channel dimension.

use bimm_contracts::unpack_shape_contract;
use burn::config::Config;
use burn::module::Module;
use burn::nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::prelude::{Backend, Tensor};

/// [`PatchMerging`] Meta API.
pub trait PatchMergingMeta {
    /// Get the input/channel dimension size.
    fn d_input(&self) -> usize;

    /// Get the input grid resolution ``[height, width]``.
    fn input_resolution(&self) -> [usize; 2];

    /// Get the output channel dimension size.
    fn d_output(&self) -> usize {
        2 * self.d_input()
    }

    /// Get the output grid resolution.
    fn output_resolution(&self) -> [usize; 2] {
        let [h, w] = self.input_resolution();
        [h / 2, w / 2]
    }
}

/// Configuration for the [`PatchMerging`] layer.
#[derive(Config, Debug)]
pub struct PatchMergingConfig {
    /// Input dimension size.
    pub d_input: usize,

    /// Input grid resolution ``[height, width]``.
    pub input_resolution: [usize; 2],
}

impl PatchMergingMeta for PatchMergingConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn input_resolution(&self) -> [usize; 2] {
        self.input_resolution
    }
}

impl PatchMergingConfig {
    /// Initialize a [`PatchMerging`] layer.
    ///
    /// ## Panics
    ///
    /// If the input resolution is not even in both dimensions.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> PatchMerging<B> {
        let [h, w] = self.input_resolution;
        assert_eq!(
            [h % 2, w % 2],
            [0, 0],
            "input resolution {:?} must be even to merge 2x2 patches",
            self.input_resolution,
        );

        PatchMerging {
            d_input: self.d_input,
            input_resolution: self.input_resolution,
            norm: LayerNormConfig::new(4 * self.d_input).init(device),
            reduction: LinearConfig::new(4 * self.d_input, 2 * self.d_input)
                .with_bias(false)
                .init(device),
        }
    }
}

/// The `PatchMerging` layer.
///
/// Concatenates the four 2x2-neighbor sub-grids (C -> 4C), normalizes,
/// and reduces to 2C with a bias-free linear layer.
#[derive(Module, Debug)]
pub struct PatchMerging<B: Backend> {
    /// Input dimension size.
    pub d_input: usize,

    /// Input grid resolution ``[height, width]``.
    pub input_resolution: [usize; 2],

    /// Normalization over the concatenated 4C features.
    pub norm: LayerNorm<B>,

    /// Bias-free 4C -> 2C reduction.
    pub reduction: Linear<B>,
}

impl<B: Backend> PatchMergingMeta for PatchMerging<B> {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn input_resolution(&self) -> [usize; 2] {
        self.input_resolution
    }
}

impl<B: Backend> PatchMerging<B> {
    /// Forward pass.
    ///
    /// ## Arguments
    ///
    /// - `x`: Input sequence of shape ``(batch, height * width, d_input)``.
    ///
    /// ## Returns
    ///
    /// - Output sequence of shape ``(batch, height/2 * width/2, 2 * d_input)``.
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

        let x = x.reshape([batch, h, w, self.d_input]);
        let device = x.device();

        let top = Tensor::arange_step(0..h as i64, 2, &device);
        let bottom = Tensor::arange_step(1..h as i64, 2, &device);
        let left = Tensor::arange_step(0..w as i64, 2, &device);
        let right = Tensor::arange_step(1..w as i64, 2, &device);

        let x0 = x.clone().select(1, top.clone()).select(2, left.clone());
        let x1 = x.clone().select(1, bottom.clone()).select(2, left);
        let x2 = x.clone().select(1, top).select(2, right.clone());
        let x3 = x.select(1, bottom).select(2, right);

        let x = Tensor::cat(vec![x0, x1, x2, x3], 3);
        // (batch, h/2, w/2, 4 * c)

        let x = x.reshape([batch, (h / 2) * (w / 2), 4 * self.d_input]);

        let x = self.norm.forward(x);
        self.reduction.forward(x)
    }
}
