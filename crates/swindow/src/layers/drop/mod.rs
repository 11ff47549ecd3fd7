//! Dropout-family regularization layers.
pub mod drop_path;
