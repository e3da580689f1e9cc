//! # deeproots-nn
//!
//! Layers, initializers and losses for deeproots.
//!
//! Every layer implements the [`Module`] trait:
//!
//! 1. **Conv2d** - 3×3 SAME convolution over NHWC input, no bias
//! 2. **BatchNorm2d** - per-channel normalization with learned offset and
//!    moving averages queued on an [`UpdateOps`] collector
//! 3. **LeakyReLU** - leaky rectification
//! 4. **Linear** - fully connected `y = xW + b`
//!
//! Layers are built for a fixed [`Mode`]: a model built for evaluation
//! never touches its running statistics.

pub mod activation;
pub mod batchnorm;
pub mod conv;
pub mod init;
pub mod linear;
pub mod loss;
pub mod mode;
pub mod module;
pub mod update_ops;

pub use activation::LeakyReLU;
pub use batchnorm::BatchNorm2d;
pub use conv::Conv2d;
pub use linear::Linear;
pub use loss::{l2_weight_decay, softmax_cross_entropy_loss};
pub use mode::Mode;
pub use module::Module;
pub use update_ops::{MomentUpdate, UpdateOps};
