//! # Drop Path / Stochastic Depth
//!
//! Randomly zeroes an entire residual branch per sample during training,
//! rescaling the kept samples by ``1 / keep_prob``. An identity transform
//! at rate 0 and on non-autodiff (inference) backends.

use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};
use burn::tensor::Distribution;

/// Configuration for the [`DropPath`] layer.
#[derive(Config, Debug)]
pub struct DropPathConfig {
    /// Probability of dropping the branch for a sample.
    #[config(default = 0.)]
    pub drop_prob: f64,
}

impl DropPathConfig {
    /// Initialize a [`DropPath`] layer.
    ///
    /// ## Panics
    ///
    /// If `drop_prob` is not in ``[0, 1)``.
    pub fn init(&self) -> DropPath {
        assert!(
            (0.0..1.0).contains(&self.drop_prob),
            "drop_prob must be in [0, 1): {}",
            self.drop_prob,
        );
        DropPath {
            drop_prob: self.drop_prob,
        }
    }
}

/// The `DropPath` layer.
///
/// The sample axis is the first input dimension; each sample's branch is
/// kept or dropped as a whole.
#[derive(Module, Clone, Debug)]
pub struct DropPath {
    /// Probability of dropping the branch for a sample.
    pub drop_prob: f64,
}

impl DropPath {
    /// Forward pass.
    ///
    /// ## Arguments
    ///
    /// - `input`: Branch output of shape ``(batch, ...)``.
    ///
    /// ## Returns
    ///
    /// A tensor of the same shape; per-sample zeroed and rescaled when
    /// training, unchanged otherwise.
    #[must_use]
    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        if self.drop_prob == 0.0 || !B::ad_enabled() {
            return input;
        }

        let keep_prob = 1.0 - self.drop_prob;

        let mut mask_shape = [1; D];
        mask_shape[0] = input.dims()[0];

        let keep = Tensor::random(
            mask_shape,
            Distribution::Bernoulli(keep_prob),
            &input.device(),
        );

        input * keep.div_scalar(keep_prob)
    }
}
