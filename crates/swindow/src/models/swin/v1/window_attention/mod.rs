//! Window attention operations for Swin Transformer v1.
pub mod attention;
pub mod attention_mask;
pub mod pos_bias;
pub mod pos_grid;

pub use attention::*;
pub use attention_mask::*;
pub use pos_bias::*;
pub use pos_grid::*;
