//! # Swin Transformer V1 Model
//!
//! Hierarchical shifted-window transformer: patch embedding, a pyramid of
//! [`BlockSequence`] stages that double channels while halving resolution,
//! and a pooled classification head.
//!
//! See: <https://arxiv.org/pdf/2103.14030>

use crate::layers::patching::patch_embed::{PatchEmbed, PatchEmbedConfig, PatchEmbedMeta};
use crate::models::swin::v1::block_sequence::{BlockSequence, BlockSequenceConfig};
use burn::config::Config;
use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::prelude::{Backend, Tensor};

/// Per-stage depth / head-count configuration.
#[derive(Config, Debug)]
pub struct LayerConfig {
    /// Number of blocks in the stage.
    pub depth: usize,

    /// Number of attention heads in the stage.
    pub num_heads: usize,
}

/// Evenly spaced values from `start` to `end`, inclusive.
fn linspace(
    start: f64,
    end: f64,
    steps: usize,
) -> Vec<f64> {
    match steps {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step_size = (end - start) / (steps as f64 - 1.0);
            (0..steps)
                .map(|i| (i as f64).mul_add(step_size, start))
                .collect()
        }
    }
}

/// Configuration for the [`SwinTransformerV1`] model.
#[derive(Config, Debug)]
pub struct SwinTransformerV1Config {
    /// Input image dimensions ``[height, width]``.
    pub image_dimensions: [usize; 2],

    /// Side length of each square patch.
    pub patch_size: usize,

    /// Number of input image channels.
    pub image_channels: usize,

    /// Number of output classes.
    pub num_classes: usize,

    /// Embedding dimension of the first stage.
    pub d_embed: usize,

    /// Per-stage depth / head-count configurations.
    pub layers: Vec<LayerConfig>,

    /// Window size for every stage.
    #[config(default = 7)]
    pub window_size: usize,

    /// Ratio of the feed-forward width to the embedding dimension.
    #[config(default = 4.0)]
    pub mlp_ratio: f64,

    /// Whether to enable bias for the Q/K/V projections.
    #[config(default = true)]
    pub enable_qkv_bias: bool,

    /// Dropout rate for embeddings, projections, and feed-forward layers.
    #[config(default = 0.)]
    pub drop_rate: f64,

    /// Dropout rate for attention weights.
    #[config(default = 0.)]
    pub attn_drop_rate: f64,

    /// Peak stochastic depth rate; rates ramp linearly over the blocks.
    #[config(default = 0.)]
    pub drop_path_rate: f64,

    /// Whether to normalize patch tokens after embedding.
    #[config(default = true)]
    pub enable_patch_norm: bool,
}

impl SwinTransformerV1Config {
    /// Get the channel dimension of the final stage.
    pub fn d_output(&self) -> usize {
        self.d_embed << (self.layers.len() - 1)
    }

    /// Initialize a [`SwinTransformerV1`] model.
    ///
    /// ## Arguments
    ///
    /// - `device`: The backend device to use.
    ///
    /// ## Panics
    ///
    /// If no stages are configured, or the image, patch, and stage
    /// geometry are inconsistent.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> SwinTransformerV1<B> {
        let num_stages = self.layers.len();
        assert!(num_stages > 0, "at least one stage is required");

        let patch_embed = PatchEmbedConfig::new()
            .with_patch_size(self.patch_size)
            .with_d_input(self.image_channels)
            .with_d_embed(self.d_embed)
            .with_enable_norm(self.enable_patch_norm)
            .init(device);

        let patches_resolution = patch_embed.patch_resolution(self.image_dimensions);

        let total_depth = self.layers.iter().map(|layer| layer.depth).sum();
        let rates = linspace(0.0, self.drop_path_rate, total_depth);

        let mut stages = Vec::with_capacity(num_stages);
        let mut offset = 0;
        for (i, layer) in self.layers.iter().enumerate() {
            let stage = BlockSequenceConfig::new(
                self.d_embed << i,
                [patches_resolution[0] >> i, patches_resolution[1] >> i],
                layer.depth,
                layer.num_heads,
            )
            .with_window_size(self.window_size)
            .with_mlp_ratio(self.mlp_ratio)
            .with_enable_qkv_bias(self.enable_qkv_bias)
            .with_drop(self.drop_rate)
            .with_attn_drop(self.attn_drop_rate)
            .with_drop_path(rates[offset..offset + layer.depth].to_vec())
            .with_downsample(i + 1 < num_stages)
            .init(device);

            offset += layer.depth;
            stages.push(stage);
        }

        SwinTransformerV1 {
            patch_embed,
            drop: DropoutConfig {
                prob: self.drop_rate,
            }
            .init(),
            stages,
            norm: LayerNormConfig::new(self.d_output()).init(device),
            head: LinearConfig::new(self.d_output(), self.num_classes).init(device),
        }
    }
}

/// The `SwinTransformerV1` model.
#[derive(Module, Debug)]
pub struct SwinTransformerV1<B: Backend> {
    /// Patch embedding stem.
    pub patch_embed: PatchEmbed<B>,

    /// Embedding dropout.
    pub drop: Dropout,

    /// Resolution stages.
    pub stages: Vec<BlockSequence<B>>,

    /// Final feature normalization.
    pub norm: LayerNorm<B>,

    /// Classification head.
    pub head: Linear<B>,
}

impl<B: Backend> SwinTransformerV1<B> {
    /// Compute the final feature sequence.
    ///
    /// ## Arguments
    ///
    /// - `images`: Input tensor of shape ``(batch, channels, height, width)``.
    ///
    /// ## Returns
    ///
    /// - Normalized features of shape ``(batch, final_tokens, d_output)``.
    #[must_use]
    pub fn forward_features(
        &self,
        images: Tensor<B, 4>,
    ) -> Tensor<B, 3> {
        let x = self.patch_embed.forward(images);
        let x = self.drop.forward(x);

        let x = self.stages.iter().fold(x, |x, stage| stage.forward(x));

        self.norm.forward(x)
    }

    /// Classify a batch of images.
    ///
    /// ## Arguments
    ///
    /// - `images`: Input tensor of shape ``(batch, channels, height, width)``.
    ///
    /// ## Returns
    ///
    /// - Logits of shape ``(batch, num_classes)``.
    #[must_use]
    pub fn forward(
        &self,
        images: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let x = self.forward_features(images);

        let [batch, _tokens, channels] = x.dims();
        let x = x.mean_dim(1).reshape([batch, channels]);

        self.head.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    #[test]
    fn test_linspace() {
        assert_eq!(linspace(0.0, 1.0, 0), Vec::<f64>::new());
        assert_eq!(linspace(0.0, 1.0, 1), vec![0.0]);

        let rates = linspace(0.0, 0.3, 4);
        assert_eq!(rates.len(), 4);
        assert_eq!(rates[0], 0.0);
        assert!((rates[3] - 0.3).abs() < 1e-12);
        assert!(rates.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_tiny_model_forward() {
        let device = Default::default();

        let config = SwinTransformerV1Config::new(
            [16, 16],
            4,
            3,
            5,
            8,
            vec![LayerConfig::new(2, 2), LayerConfig::new(2, 4)],
        )
        .with_window_size(2)
        .with_drop_path_rate(0.1);

        assert_eq!(config.d_output(), 16);

        let model = config.init::<NdArray>(&device);
        assert_eq!(model.stages.len(), 2);
        assert!(model.stages[0].downsample.is_some());
        assert!(model.stages[1].downsample.is_none());

        let images = Tensor::<NdArray, 4>::random(
            [2, 3, 16, 16],
            Distribution::Uniform(0.0, 1.0),
            &device,
        );

        // 16/4 = 4x4 patches; one merge leaves a 2x2 grid of 16 channels.
        let features = model.forward_features(images.clone());
        assert_eq!(features.dims(), [2, 4, 16]);

        let logits = model.forward(images);
        assert_eq!(logits.dims(), [2, 5]);
    }
}
