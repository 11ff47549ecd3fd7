//! # 2D Patch Embedding
//!
//! Projects an image into a flat sequence of patch tokens with a
//! stride-`patch_size` convolution, optionally normalized.

use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{LayerNorm, LayerNormConfig};
use burn::prelude::{Backend, Tensor};

/// [`PatchEmbed`] Meta API.
pub trait PatchEmbedMeta {
    /// Number of input image channels.
    fn d_input(&self) -> usize;

    /// Embedding dimension of each patch token.
    fn d_embed(&self) -> usize;

    /// Side length of each square patch.
    fn patch_size(&self) -> usize;

    /// Get the patch grid resolution for an image resolution.
    ///
    /// ## Panics
    ///
    /// If the image resolution is not a multiple of the patch size.
    fn patch_resolution(
        &self,
        image_resolution: [usize; 2],
    ) -> [usize; 2] {
        let [h, w] = image_resolution;
        let p = self.patch_size();
        assert_eq!(
            [h % p, w % p],
            [0, 0],
            "image resolution {image_resolution:?} must be a multiple of the patch size {p}",
        );
        [h / p, w / p]
    }
}

/// Configuration for the [`PatchEmbed`] layer.
#[derive(Config, Debug)]
pub struct PatchEmbedConfig {
    /// Side length of each square patch.
    #[config(default = 4)]
    pub patch_size: usize,

    /// Number of input image channels.
    #[config(default = 3)]
    pub d_input: usize,

    /// Embedding dimension of each patch token.
    #[config(default = 96)]
    pub d_embed: usize,

    /// Whether to normalize the embedded tokens.
    #[config(default = false)]
    pub enable_norm: bool,
}

impl PatchEmbedMeta for PatchEmbedConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn d_embed(&self) -> usize {
        self.d_embed
    }

    fn patch_size(&self) -> usize {
        self.patch_size
    }
}

impl PatchEmbedConfig {
    /// Initialize a [`PatchEmbed`] layer.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> PatchEmbed<B> {
        PatchEmbed {
            patch_size: self.patch_size,
            d_embed: self.d_embed,
            proj: Conv2dConfig::new(
                [self.d_input, self.d_embed],
                [self.patch_size, self.patch_size],
            )
            .with_stride([self.patch_size, self.patch_size])
            .init(device),
            norm: match self.enable_norm {
                true => Some(LayerNormConfig::new(self.d_embed).init(device)),
                false => None,
            },
        }
    }
}

/// The `PatchEmbed` layer.
#[derive(Module, Debug)]
pub struct PatchEmbed<B: Backend> {
    /// Side length of each square patch.
    pub patch_size: usize,

    /// Embedding dimension of each patch token.
    pub d_embed: usize,

    /// Patch projection.
    pub proj: Conv2d<B>,

    /// Optional token normalization.
    pub norm: Option<LayerNorm<B>>,
}

impl<B: Backend> PatchEmbedMeta for PatchEmbed<B> {
    fn d_input(&self) -> usize {
        self.proj.weight.dims()[1]
    }

    fn d_embed(&self) -> usize {
        self.d_embed
    }

    fn patch_size(&self) -> usize {
        self.patch_size
    }
}

impl<B: Backend> PatchEmbed<B> {
    /// Forward pass.
    ///
    /// ## Arguments
    ///
    /// - `images`: Input tensor of shape ``(batch, channels, height, width)``.
    ///
    /// ## Returns
    ///
    /// Patch token sequence of shape
    /// ``(batch, height/patch_size * width/patch_size, d_embed)``.
    #[must_use]
    pub fn forward(
        &self,
        images: Tensor<B, 4>,
    ) -> Tensor<B, 3> {
        let [batch, grid_h, grid_w] = unpack_shape_contract!(
            [
                "batch",
                "channels",
                "height" = "grid_h" * "patch_size",
                "width" = "grid_w" * "patch_size"
            ],
            &images,
            &["batch", "grid_h", "grid_w"],
            &[
                ("channels", self.d_input()),
                ("patch_size", self.patch_size),
            ]
        );

        let x = self.proj.forward(images);
        // (batch, d_embed, grid_h, grid_w)

        let x: Tensor<B, 3> = x.flatten(2, 3).swap_dims(1, 2);
        // (batch, grid_h * grid_w, d_embed)

        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };

        assert_shape_contract_periodically!(
            ["batch", "tokens", "d_embed"],
            &x,
            &[
                ("batch", batch),
                ("tokens", grid_h * grid_w),
                ("d_embed", self.d_embed)
            ]
        );

        x
    }
}
