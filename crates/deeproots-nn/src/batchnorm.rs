// BatchNorm2d - Per-channel batch normalization
//
// FORMULA (train):
//   x_hat = (x - mean_batch) / sqrt(var_batch + ε)
//   y     = x_hat + β
//
// Moments are taken per channel over (N, H, W); the variance is the biased
// population estimate. There is no learned scale, only the offset β.
//
// MOVING AVERAGES:
//   Each training forward queues, on the shared UpdateOps collector,
//     moving_mean     ← 0.9 · moving_mean     + 0.1 · mean_batch
//     moving_variance ← 0.9 · moving_variance + 0.1 · var_batch
//   which the train step applies after the parameter update.
//
// FORMULA (eval):
//   y = (x - moving_mean) / sqrt(moving_variance + ε) + β
//   with no side effects.
//
// SHAPES:
//   Input/Output: [N, H, W, C]
//   β, moving_mean, moving_variance: [C]

use deeproots_core::{Result, Tensor};

use crate::init;
use crate::mode::Mode;
use crate::module::Module;
use crate::update_ops::{MomentUpdate, UpdateOps};

pub const DEFAULT_EPS: f32 = 1e-3;
pub const DEFAULT_DECAY: f32 = 0.9;

/// Batch normalization with a learned offset and moving averages.
///
/// # Examples
/// ```ignore
/// let updates = UpdateOps::new();
/// let bn = BatchNorm2d::new("final/bn", 40, Mode::Train, &updates);
/// let y = bn.forward(&x)?; // same shape, queues two moving-average updates
/// ```
#[derive(Debug, Clone)]
pub struct BatchNorm2d {
    scope: String,
    /// Learned offset: [C]
    beta: Tensor,
    /// Running mean (not trainable): [C]
    moving_mean: Tensor,
    /// Running variance (not trainable): [C]
    moving_variance: Tensor,
    num_features: usize,
    eps: f32,
    decay: f32,
    mode: Mode,
    updates: UpdateOps,
}

impl BatchNorm2d {
    /// Create a layer whose offset is registered as `<scope>/beta`.
    ///
    /// `updates` receives the moving-average updates in `Mode::Train`.
    pub fn new(scope: &str, num_features: usize, mode: Mode, updates: &UpdateOps) -> Self {
        BatchNorm2d {
            scope: scope.to_string(),
            beta: init::zeros(num_features),
            moving_mean: init::constant(num_features, 0.0),
            moving_variance: init::constant(num_features, 1.0),
            num_features,
            eps: DEFAULT_EPS,
            decay: DEFAULT_DECAY,
            mode,
            updates: updates.clone(),
        }
    }

    /// The same layer in another mode.
    ///
    /// `beta` and both running statistics are shared with `self`, so an
    /// eval copy of a training layer reads the averages training has moved.
    pub fn with_mode(&self, mode: Mode, updates: &UpdateOps) -> Self {
        BatchNorm2d {
            mode,
            updates: updates.clone(),
            ..self.clone()
        }
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }
    pub fn mode(&self) -> Mode {
        self.mode
    }
    pub fn beta(&self) -> &Tensor {
        &self.beta
    }
    pub fn moving_mean(&self) -> &Tensor {
        &self.moving_mean
    }
    pub fn moving_variance(&self) -> &Tensor {
        &self.moving_variance
    }

    fn forward_train(&self, x: &Tensor) -> Result<Tensor> {
        let (x_hat, moments) = x.batch_norm_train(self.eps)?;
        self.updates.push(MomentUpdate::new(
            format!("{}/moving_mean", self.scope),
            &self.moving_mean,
            moments.mean,
            self.decay,
        )?)?;
        self.updates.push(MomentUpdate::new(
            format!("{}/moving_variance", self.scope),
            &self.moving_variance,
            moments.variance,
            self.decay,
        )?)?;
        x_hat.add_channel(&self.beta)
    }

    fn forward_eval(&self, x: &Tensor) -> Result<Tensor> {
        let mean = self.moving_mean.to_vec()?;
        let variance = self.moving_variance.to_vec()?;
        let scale: Vec<f32> = variance.iter().map(|v| 1.0 / (v + self.eps).sqrt()).collect();
        let shift: Vec<f32> = mean.iter().zip(&scale).map(|(m, s)| -m * s).collect();
        x.scale_shift_channel(&scale, &shift)?.add_channel(&self.beta)
    }
}

impl Module for BatchNorm2d {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let c = x.shape().channels()?;
        if c != self.num_features {
            deeproots_core::bail!(
                "batch norm {}: expected {} channels, got {c}",
                self.scope,
                self.num_features
            );
        }
        match self.mode {
            Mode::Train => self.forward_train(x),
            Mode::Eval => self.forward_eval(x),
        }
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        vec![(format!("{}/beta", self.scope), self.beta.clone())]
    }
}
