//! The branching residual network.
//!
//! - [`residual`] - two-sublayer residual unit with a resizing shortcut
//! - [`stage`] - a stack of residual units sharing one filter count
//! - [`tree`] - the recursive binary channel-split tree of stages
//! - [`head`] - unify convolution, pooling and the fully connected layer
//! - [`resnet`] - the whole model, its cost and its training step

pub mod head;
pub mod residual;
pub mod resnet;
pub mod stage;
pub mod tree;

use deeproots_nn::{Mode, UpdateOps};
use rand::RngCore;

/// What every block needs while it creates its layers.
///
/// Passed down by mutable reference so one random stream initializes the
/// whole model in a fixed order, which makes construction reproducible
/// from a seed.
pub struct BuildContext<'a> {
    pub mode: Mode,
    pub relu_leakiness: f32,
    pub updates: &'a UpdateOps,
    pub rng: &'a mut dyn RngCore,
}
