//! # Implementation of the Swin Transformer V1 model.
//! See: [SWIN](https://github.com/microsoft/Swin-Transformer/blob/main/models/swin_transformer.py)
//!
//! ## Example
//!
//! ```rust,no_run
//! use swindow::models::swin::v1::swin_model::{SwinTransformerV1, SwinTransformerV1Config};
//! use swindow::models::swin::v1::swin_model::LayerConfig;
//! use burn::backend::NdArray;
//!
//! let image_dimensions = [224, 224];
//! let patch_size = 4;
//! let image_channels = 3;
//! let num_classes = 10;
//! let d_embed = 96;
//! let window_size = 7;
//!
//! let device = Default::default();
//!
//! let swin_model: SwinTransformerV1<NdArray> = SwinTransformerV1Config::new(
//!     image_dimensions,
//!     patch_size,
//!     image_channels,
//!     num_classes,
//!     d_embed,
//!     vec![LayerConfig::new(2, 3), LayerConfig::new(2, 6), LayerConfig::new(6, 12), LayerConfig::new(2, 24)],
//! )
//! .with_window_size(window_size)
//! .with_attn_drop_rate(0.2)
//! .with_drop_rate(0.2)
//! .init(&device);
//! ```

pub mod block_sequence;
pub mod patch_merge;
pub mod swin_block;
pub mod swin_model;
pub mod window_attention;
pub mod windowing;
