//! # deeproots-optim
//!
//! Gradient descent for deeproots.
//!
//! - [`Optimizer`] - the trait a train step drives
//! - [`SGD`] - plain gradient descent with optional classical momentum
//! - [`OptimizerKind`] - the `"sgd"` / `"mom"` selector read from configuration
//!
//! Optimizers write new values straight into the parameters' shared storage,
//! so every layer holding a parameter sees the update.

pub mod kind;
pub mod optimizer;
pub mod sgd;

pub use kind::OptimizerKind;
pub use optimizer::Optimizer;
pub use sgd::SGD;
