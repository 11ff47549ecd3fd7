#![warn(missing_docs)]
//!# swindow - Shifted-Window Attention Models for Burn
//!
//! ## Notable Components
//!
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::drop`] - dropout layers.
//!     * [`layers::drop::drop_path`] - drop path / stochastic depth.
//!   * [`layers::patching`] - patching layers.
//!     * [`layers::patching::patch_embed`] - 2d patch embedding layer.
//! * [`models`] - complete model families.
//!   * [`models::swin`] - The SWIN Family.
//!     * [`models::swin::v1`] - The SWIN-V1 Model.
//!       * [`models::swin::v1::windowing`] - window partition / reverse / cyclic shift.
//!       * [`models::swin::v1::window_attention`] - W-MSA / SW-MSA attention.

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod layers;

pub mod models;
