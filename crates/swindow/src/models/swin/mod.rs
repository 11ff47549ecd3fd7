//! # The SWIN Family.
pub mod v1;
