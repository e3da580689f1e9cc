// SGD - Stochastic Gradient Descent with optional momentum
//
// UPDATE RULES:
//
//   Plain (momentum = 0):
//     θ ← θ - lr · g
//
//   Classical momentum:
//     v ← μ · v + g
//     θ ← θ - lr · v
//
// The velocity buffers start at zero and live as long as the optimizer, one
// per parameter in the order the parameters were given.

use deeproots_core::{GradStore, Result, Tensor};

use crate::optimizer::Optimizer;

/// Gradient descent with optional momentum.
///
/// # Example
/// ```ignore
/// let mut opt = SGD::new(model.parameters(), 0.1, 0.9)?;
/// let grads = cost.backward()?;
/// opt.step(&grads)?;
/// ```
pub struct SGD {
    params: Vec<Tensor>,
    lr: f32,
    momentum: f32,
    velocities: Vec<Vec<f32>>,
}

impl SGD {
    /// # Arguments
    /// - `params`: trainable tensors to update
    /// - `lr`: learning rate
    /// - `momentum`: momentum factor μ (0 for plain gradient descent)
    pub fn new(params: Vec<Tensor>, lr: f32, momentum: f32) -> Result<Self> {
        if !lr.is_finite() || lr < 0.0 {
            deeproots_core::bail!("sgd: learning rate must be finite and non-negative, got {lr}");
        }
        if !(0.0..1.0).contains(&momentum) {
            deeproots_core::bail!("sgd: momentum must lie in [0, 1), got {momentum}");
        }
        let velocities = params.iter().map(|p| vec![0.0; p.elem_count()]).collect();
        Ok(SGD {
            params,
            lr,
            momentum,
            velocities,
        })
    }

    pub fn momentum(&self) -> f32 {
        self.momentum
    }

    pub fn params(&self) -> &[Tensor] {
        &self.params
    }
}

impl Optimizer for SGD {
    fn step(&mut self, grads: &GradStore) -> Result<()> {
        for (param, velocity) in self.params.iter().zip(self.velocities.iter_mut()) {
            let Some(grad) = grads.get(param) else {
                continue;
            };
            let g = grad.to_vec()?;
            let mut data = param.to_vec()?;

            if self.momentum > 0.0 {
                for ((v, gi), w) in velocity.iter_mut().zip(&g).zip(data.iter_mut()) {
                    *v = self.momentum * *v + gi;
                    *w -= self.lr * *v;
                }
            } else {
                for (w, gi) in data.iter_mut().zip(&g) {
                    *w -= self.lr * gi;
                }
            }
            param.update_data_inplace(&data)?;
        }
        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }
}
