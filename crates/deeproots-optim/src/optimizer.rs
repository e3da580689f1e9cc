use deeproots_core::{GradStore, Result};

/// An optimizer updates parameters in place from a set of gradients.
///
/// Parameters that received no gradient in `grads` are left untouched.
pub trait Optimizer {
    /// Apply one update step.
    fn step(&mut self, grads: &GradStore) -> Result<()>;

    /// The current learning rate.
    fn learning_rate(&self) -> f32;

    /// Replace the learning rate (for schedules).
    fn set_learning_rate(&mut self, lr: f32);
}
