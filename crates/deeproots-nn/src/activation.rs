use deeproots_core::{Result, Tensor};

use crate::module::Module;

/// Leaky rectification: `x` for `x >= 0`, `leakiness * x` otherwise.
///
/// With `leakiness = 0` this is a plain ReLU.
#[derive(Debug, Clone, Copy)]
pub struct LeakyReLU {
    leakiness: f32,
}

impl LeakyReLU {
    pub fn new(leakiness: f32) -> Self {
        LeakyReLU { leakiness }
    }

    pub fn leakiness(&self) -> f32 {
        self.leakiness
    }
}

impl Module for LeakyReLU {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        x.leaky_relu(self.leakiness)
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        vec![]
    }
}
