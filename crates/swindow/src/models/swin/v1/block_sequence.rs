//! # Block Sequence
//!
//! One resolution stage of the model: a run of [`SwinBlock`]s alternating
//! between unshifted (W-MSA) and shifted (SW-MSA) window attention, with
//! an optional trailing [`PatchMerging`] downsample.

use crate::models::swin::v1::patch_merge::{PatchMerging, PatchMergingConfig};
use crate::models::swin::v1::swin_block::{SwinBlock, SwinBlockConfig};
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};

/// [`BlockSequence`] Meta API.
pub trait BlockSequenceMeta {
    /// Get the input/channel dimension size.
    fn d_input(&self) -> usize;

    /// Get the input grid resolution ``[height, width]``.
    fn input_resolution(&self) -> [usize; 2];

    /// Get the number of blocks in the stage.
    fn depth(&self) -> usize;

    /// Whether the stage ends with a patch-merging downsample.
    fn has_downsample(&self) -> bool;

    /// Get the output channel dimension size.
    fn d_output(&self) -> usize {
        match self.has_downsample() {
            true => 2 * self.d_input(),
            false => self.d_input(),
        }
    }

    /// Get the output grid resolution.
    fn output_resolution(&self) -> [usize; 2] {
        let [h, w] = self.input_resolution();
        match self.has_downsample() {
            true => [h / 2, w / 2],
            false => [h, w],
        }
    }
}

/// Configuration for the [`BlockSequence`] module.
#[derive(Config, Debug)]
pub struct BlockSequenceConfig {
    /// Input dimension size.
    pub d_input: usize,

    /// Input grid resolution ``[height, width]``.
    pub input_resolution: [usize; 2],

    /// Number of blocks in the stage.
    pub depth: usize,

    /// Number of attention heads.
    pub num_heads: usize,

    /// Window size.
    #[config(default = 7)]
    pub window_size: usize,

    /// Ratio of the feed-forward width to the embedding dimension.
    #[config(default = 4.0)]
    pub mlp_ratio: f64,

    /// Whether to enable bias for the Q/K/V projections.
    #[config(default = true)]
    pub enable_qkv_bias: bool,

    /// Dropout rate for projections and feed-forward sub-blocks.
    #[config(default = 0.)]
    pub drop: f64,

    /// Dropout rate for attention weights.
    #[config(default = 0.)]
    pub attn_drop: f64,

    /// Per-block stochastic depth rates; empty means 0 for every block.
    #[config(default = "Vec::new()")]
    pub drop_path: Vec<f64>,

    /// Whether to downsample with patch merging after the blocks.
    #[config(default = false)]
    pub downsample: bool,
}

impl BlockSequenceMeta for BlockSequenceConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn input_resolution(&self) -> [usize; 2] {
        self.input_resolution
    }

    fn depth(&self) -> usize {
        self.depth
    }

    fn has_downsample(&self) -> bool {
        self.downsample
    }
}

impl BlockSequenceConfig {
    /// Initialize a [`BlockSequence`] module.
    ///
    /// Even-indexed blocks use unshifted windows; odd-indexed blocks shift
    /// by ``window_size / 2``.
    ///
    /// ## Panics
    ///
    /// If `depth` is zero, or `drop_path` is non-empty with a length other
    /// than `depth`.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> BlockSequence<B> {
        assert!(self.depth > 0, "a stage must contain at least one block");
        assert!(
            self.drop_path.is_empty() || self.drop_path.len() == self.depth,
            "expected {} drop_path rates, got {}",
            self.depth,
            self.drop_path.len(),
        );

        let d_ffn = (self.d_input as f64 * self.mlp_ratio) as usize;

        let blocks = (0..self.depth)
            .map(|i| {
                SwinBlockConfig::new(
                    self.d_input,
                    self.input_resolution,
                    self.num_heads,
                    d_ffn,
                )
                .with_window_size(self.window_size)
                .with_shift_size(match i % 2 {
                    0 => 0,
                    _ => self.window_size / 2,
                })
                .with_enable_qkv_bias(self.enable_qkv_bias)
                .with_drop(self.drop)
                .with_attn_drop(self.attn_drop)
                .with_drop_path(self.drop_path.get(i).copied().unwrap_or(0.0))
                .init(device)
            })
            .collect::<Vec<_>>();

        let downsample = match self.downsample {
            true => Some(
                PatchMergingConfig::new(self.d_input, self.input_resolution).init(device),
            ),
            false => None,
        };

        BlockSequence {
            d_input: self.d_input,
            input_resolution: self.input_resolution,
            blocks,
            downsample,
        }
    }
}

/// The `BlockSequence` module.
#[derive(Module, Debug)]
pub struct BlockSequence<B: Backend> {
    /// Input dimension size.
    pub d_input: usize,

    /// Input grid resolution ``[height, width]``.
    pub input_resolution: [usize; 2],

    /// The stage's transformer blocks.
    pub blocks: Vec<SwinBlock<B>>,

    /// Optional trailing downsample.
    pub downsample: Option<PatchMerging<B>>,
}

impl<B: Backend> BlockSequenceMeta for BlockSequence<B> {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn input_resolution(&self) -> [usize; 2] {
        self.input_resolution
    }

    fn depth(&self) -> usize {
        self.blocks.len()
    }

    fn has_downsample(&self) -> bool {
        self.downsample.is_some()
    }
}

impl<B: Backend> BlockSequence<B> {
    /// Forward pass of the `BlockSequence` module.
    ///
    /// ## Arguments
    ///
    /// - `x`: Input sequence of shape ``(batch, height * width, d_input)``.
    ///
    /// ## Returns
    ///
    /// - Output sequence of shape
    ///   ``(batch, output_tokens, d_output)``; downsampling halves the
    ///   resolution and doubles the channels.
    #[must_use]
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
    ) -> Tensor<B, 3> {
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));

        match &self.downsample {
            Some(downsample) => downsample.forward(x),
            None => x,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::models::swin::v1::swin_block::SwinBlockMeta;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    #[test]
    fn test_stage_alternates_shift() {
        let device = Default::default();

        let stage = BlockSequenceConfig::new(8, [4, 4], 4, 2)
            .with_window_size(2)
            .init::<NdArray>(&device);

        let shifts = stage
            .blocks
            .iter()
            .map(|block| block.shift_size())
            .collect::<Vec<_>>();
        assert_eq!(shifts, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_stage_forward_shape() {
        let device = Default::default();

        let stage = BlockSequenceConfig::new(8, [4, 4], 2, 2)
            .with_window_size(2)
            .init::<NdArray>(&device);
        assert_eq!(stage.d_output(), 8);
        assert_eq!(stage.output_resolution(), [4, 4]);

        let x = Tensor::<NdArray, 3>::random([2, 16, 8], Distribution::Uniform(0.0, 1.0), &device);
        assert_eq!(stage.forward(x).dims(), [2, 16, 8]);
    }

    #[test]
    fn test_stage_downsample_shape() {
        let device = Default::default();

        let stage = BlockSequenceConfig::new(8, [4, 4], 2, 2)
            .with_window_size(2)
            .with_downsample(true)
            .init::<NdArray>(&device);
        assert_eq!(stage.d_output(), 16);
        assert_eq!(stage.output_resolution(), [2, 2]);

        let x = Tensor::<NdArray, 3>::random([2, 16, 8], Distribution::Uniform(0.0, 1.0), &device);
        assert_eq!(stage.forward(x).dims(), [2, 4, 16]);
    }

    #[test]
    #[should_panic(expected = "drop_path rates")]
    fn test_drop_path_length_mismatch() {
        let device = Default::default();

        let _ = BlockSequenceConfig::new(8, [4, 4], 2, 2)
            .with_window_size(2)
            .with_drop_path(vec![0.1])
            .init::<NdArray>(&device);
    }
}
