//! # W-MSA
//!
//! Window Multi-Head Self-Attention: scaled dot-product attention
//! restricted to each window, with a learned relative position bias and an
//! optional additive shift mask.
//!
//! See: <https://arxiv.org/pdf/2103.14030>

use crate::models::swin::v1::window_attention::attention_mask::apply_attention_mask;
use crate::models::swin::v1::window_attention::pos_bias::{
    RelativePositionBias, RelativePositionBiasConfig,
};
use bimm_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::softmax;

/// Common introspection interface for `WindowAttention`.
pub trait WindowAttentionMeta {
    /// Get the input/channel dimension size.
    fn d_input(&self) -> usize;

    /// Get the window shape ``[height, width]``.
    fn window_shape(&self) -> [usize; 2];

    /// Get the height of the window.
    fn window_height(&self) -> usize {
        self.window_shape()[0]
    }

    /// Get the width of the window.
    fn window_width(&self) -> usize {
        self.window_shape()[1]
    }

    /// Get the number of attention heads.
    fn num_heads(&self) -> usize;

    /// Get the per-head channel dimension.
    fn head_dim(&self) -> usize {
        self.d_input() / self.num_heads()
    }

    /// Get the drop rate for attention.
    fn attn_drop(&self) -> f64;

    /// Get the drop rate for projection.
    fn proj_drop(&self) -> f64;

    /// Is the QKV bias enabled?
    fn enable_qkv_bias(&self) -> bool;
}

/// Configuration for the `WindowAttention` module.
#[derive(Config, Debug)]
pub struct WindowAttentionConfig {
    /// Input dimension size.
    pub d_input: usize,

    /// Window shape as [height, width].
    pub window_shape: [usize; 2],

    /// Number of attention heads.
    pub num_heads: usize,

    /// Whether to enable bias for the fused Q/K/V linear layer.
    #[config(default = true)]
    pub enable_qkv_bias: bool,

    /// Dropout rate for attention.
    #[config(default = 0.)]
    pub attn_drop: f64,

    /// Dropout rate for projection.
    #[config(default = 0.)]
    pub proj_drop: f64,
}

impl WindowAttentionMeta for WindowAttentionConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn window_shape(&self) -> [usize; 2] {
        self.window_shape
    }

    fn num_heads(&self) -> usize {
        self.num_heads
    }

    fn attn_drop(&self) -> f64 {
        self.attn_drop
    }

    fn proj_drop(&self) -> f64 {
        self.proj_drop
    }

    fn enable_qkv_bias(&self) -> bool {
        self.enable_qkv_bias
    }
}

impl WindowAttentionConfig {
    /// Initialize a [`WindowAttention`] module.
    ///
    /// ## Arguments
    ///
    /// - `device`: The backend device to use.
    ///
    /// ## Panics
    ///
    /// If `d_input` is not divisible by `num_heads`.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> WindowAttention<B> {
        assert_eq!(
            self.d_input % self.num_heads,
            0,
            "d_input {} must be divisible by num_heads {}",
            self.d_input,
            self.num_heads,
        );

        WindowAttention {
            d_input: self.d_input,
            num_heads: self.num_heads,
            scale: (self.head_dim() as f64).powf(-0.5),
            qkv: LinearConfig::new(self.d_input, 3 * self.d_input)
                .with_bias(self.enable_qkv_bias)
                .init(device),
            rpb: RelativePositionBiasConfig::new(self.num_heads, self.window_shape)
                .init(device),
            proj: LinearConfig::new(self.d_input, self.d_input).init(device),
            attn_drop: DropoutConfig {
                prob: self.attn_drop,
            }
            .init(),
            proj_drop: DropoutConfig {
                prob: self.proj_drop,
            }
            .init(),
        }
    }
}

/// The `WindowAttention` module.
#[derive(Module, Debug)]
pub struct WindowAttention<B: Backend> {
    /// Input dimension size.
    pub d_input: usize,

    /// Number of attention heads.
    pub num_heads: usize,

    /// Query scale factor, ``head_dim^(-1/2)``.
    pub scale: f64,

    /// Fused linear layer for Q, K, and V.
    pub qkv: Linear<B>,

    /// Relative position bias module.
    pub rpb: RelativePositionBias<B>,

    /// Linear layer for projection.
    pub proj: Linear<B>,

    /// Dropout for attention.
    pub attn_drop: Dropout,

    /// Dropout for projection.
    pub proj_drop: Dropout,
}

impl<B: Backend> WindowAttentionMeta for WindowAttention<B> {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn window_shape(&self) -> [usize; 2] {
        self.rpb.window_shape
    }

    fn num_heads(&self) -> usize {
        self.num_heads
    }

    fn attn_drop(&self) -> f64 {
        self.attn_drop.prob
    }

    fn proj_drop(&self) -> f64 {
        self.proj_drop.prob
    }

    fn enable_qkv_bias(&self) -> bool {
        self.qkv.bias.is_some()
    }
}

impl<B: Backend> WindowAttention<B> {
    /// Forward pass of the `WindowAttention` module.
    ///
    /// ## Arguments
    ///
    /// - `x`: Input tensor of shape (B*`num_windows`, `window_size` * `window_size`, C).
    /// - `mask`: Optional additive mask tensor of shape (`num_windows`, Wh*Ww, Wh*Ww).
    ///
    /// ## Returns
    ///
    /// - Output tensor of shape (B*`num_windows`, N=ws*ws, C).
    #[must_use]
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        mask: Option<Tensor<B, 3>>,
    ) -> Tensor<B, 3> {
        let [wh, ww] = self.window_shape();

        static CONTRACT: ShapeContract = shape_contract!["b_nw", "n", "c"];
        let [b_nw] = CONTRACT.unpack_shape(
            &x.shape().dims,
            &["b_nw"],
            &[("n", wh * ww), ("c", self.d_input)],
        );

        let n = wh * ww;
        let c = self.d_input;
        let c_per_head = c / self.num_heads;

        let qkv = self.qkv.forward(x);
        // (b_nw, n, 3 * c)

        let qkv = qkv
            .reshape([b_nw, n, 3, self.num_heads, c_per_head])
            .permute([2, 0, 3, 1, 4]);
        // (3, b_nw, num_heads, n, c_per_head)

        let [_, d1, d2, d3, d4] = qkv.dims();
        let q: Tensor<B, 4> = qkv
            .clone()
            .slice([0..1, 0..d1, 0..d2, 0..d3, 0..d4])
            .reshape([d1, d2, d3, d4]);
        let k: Tensor<B, 4> = qkv
            .clone()
            .slice([1..2, 0..d1, 0..d2, 0..d3, 0..d4])
            .reshape([d1, d2, d3, d4]);
        let v: Tensor<B, 4> = qkv
            .slice([2..3, 0..d1, 0..d2, 0..d3, 0..d4])
            .reshape([d1, d2, d3, d4]);
        // (b_nw, num_heads, n, c_per_head)

        let attn = self.attention(b_nw, n, q, k, mask);
        // (b_nw, num_heads, n, n)

        let x = attn.matmul(v);
        let x = x.swap_dims(1, 2).reshape([b_nw, n, c]);
        // (b_nw, n, c)

        let x = self.proj.forward(x);
        self.proj_drop.forward(x)
        // (b_nw, n, c)
    }

    /// Compute the attention weights.
    ///
    /// ## Arguments
    ///
    /// - `b_nw`: Batch size times number of windows.
    /// - `n`: Number of positions in each window.
    /// - `q`: Query tensor of shape (`b_nw`, `num_heads`, n, `c_per_head`).
    /// - `k`: Key tensor of shape (`b_nw`, `num_heads`, n, `c_per_head`).
    /// - `mask`: Optional additive mask tensor of shape (`num_windows`, n, n).
    ///
    /// ## Returns
    ///
    /// - Attention weights of shape (`b_nw`, `num_heads`, n, n).
    #[must_use]
    fn attention(
        &self,
        b_nw: usize,
        n: usize,
        q: Tensor<B, 4>,
        k: Tensor<B, 4>,
        mask: Option<Tensor<B, 3>>,
    ) -> Tensor<B, 4> {
        let q = q.mul_scalar(self.scale);

        let attn = q.matmul(k.swap_dims(2, 3));
        // (b_nw, num_heads, n, n)

        let attn = attn + self.rpb.forward().unsqueeze();
        // (b_nw, num_heads, n, n)

        let attn = match mask {
            None => attn,
            Some(mask) => apply_attention_mask(b_nw, n, self.num_heads, attn, mask),
        };

        let attn = softmax(attn, 3);
        run_every_nth!({
            static CONTRACT: ShapeContract =
                shape_contract!["b_nw", "num_heads", "Wh" * "Ww", "Wh" * "Ww"];
            CONTRACT.assert_shape(
                &attn,
                &[
                    ("b_nw", b_nw),
                    ("num_heads", self.num_heads()),
                    ("Wh", self.window_shape()[0]),
                    ("Ww", self.window_shape()[1]),
                ],
            );
        });

        self.attn_drop.forward(attn)
    }
}
