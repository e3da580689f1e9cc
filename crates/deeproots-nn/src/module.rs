// Module trait - The interface every layer implements
//
// forward() maps an input tensor to an output tensor. named_parameters()
// lists the trainable tensors together with their scoped names
// ("block1/A/residual_0/sub1/conv1/weights"), which is how weight decay picks
// the tensors it penalizes and how parameter counts are grouped by scope.
//
// Composite blocks (residual units, stages, the branch tree) implement the
// same trait, so a whole network is just a Module made of Modules.

use deeproots_core::{Result, Tensor};

/// The trait shared by every layer and block.
///
/// # Example
/// ```ignore
/// struct Block {
///     conv: Conv2d,
///     relu: LeakyReLU,
/// }
///
/// impl Module for Block {
///     fn forward(&self, x: &Tensor) -> Result<Tensor> {
///         self.relu.forward(&self.conv.forward(x)?)
///     }
///     fn named_parameters(&self) -> Vec<(String, Tensor)> {
///         self.conv.named_parameters()
///     }
/// }
/// ```
pub trait Module {
    /// Compute the output tensor from the input tensor.
    fn forward(&self, x: &Tensor) -> Result<Tensor>;

    /// Trainable parameters with their fully scoped names.
    fn named_parameters(&self) -> Vec<(String, Tensor)>;

    /// Trainable parameters, in the same order as `named_parameters()`.
    fn parameters(&self) -> Vec<Tensor> {
        self.named_parameters().into_iter().map(|(_, t)| t).collect()
    }

    /// Total number of scalar parameters.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.elem_count()).sum()
    }
}
