// Training step
//
// Building a Train graph produces a TrainOp: the gradients of the cost with
// respect to every trainable parameter plus the batch-norm moving-average
// updates queued while the graph was built. Running it
//
//   1. applies the optimizer step to the parameters,
//   2. applies the queued moving-average updates,
//   3. advances the global step by one,
//
// so parameters and normalization statistics always move together.

use deeproots_core::GradStore;
use deeproots_nn::MomentUpdate;
use deeproots_optim::{Optimizer, SGD};

use crate::error::Result;

/// Everything one training step applies.
pub struct TrainOp {
    grads: GradStore,
    updates: Vec<MomentUpdate>,
    cost: f32,
}

impl TrainOp {
    pub fn new(grads: GradStore, updates: Vec<MomentUpdate>, cost: f32) -> Self {
        TrainOp {
            grads,
            updates,
            cost,
        }
    }

    pub fn grads(&self) -> &GradStore {
        &self.grads
    }

    /// Moving-average updates bundled into this step.
    pub fn updates(&self) -> &[MomentUpdate] {
        &self.updates
    }

    /// Cost of the graph this op was built from.
    pub fn cost(&self) -> f32 {
        self.cost
    }
}

/// What a completed step reports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    /// Global step after this step.
    pub step: u64,
    pub cost: f32,
    pub learning_rate: f32,
}

/// Optimizer state and step counter of a model built for training.
pub struct TrainState {
    optimizer: SGD,
    global_step: u64,
    min_lrn_rate: f32,
}

impl TrainState {
    pub fn new(optimizer: SGD, min_lrn_rate: f32) -> Self {
        TrainState {
            optimizer,
            global_step: 0,
            min_lrn_rate,
        }
    }

    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    pub fn learning_rate(&self) -> f32 {
        self.optimizer.learning_rate()
    }

    /// Set the learning rate, never below `min_lrn_rate`. Returns the rate
    /// actually in effect.
    pub fn set_learning_rate(&mut self, lr: f32) -> f32 {
        let lr = if lr.is_nan() { self.min_lrn_rate } else { lr.max(self.min_lrn_rate) };
        self.optimizer.set_learning_rate(lr);
        lr
    }

    pub fn apply(&mut self, op: TrainOp) -> Result<StepReport> {
        self.optimizer.step(&op.grads)?;
        for update in &op.updates {
            update.apply()?;
        }
        self.global_step += 1;
        tracing::debug!(
            step = self.global_step,
            cost = op.cost,
            updates = op.updates.len(),
            "train step"
        );
        Ok(StepReport {
            step: self.global_step,
            cost: op.cost,
            learning_rate: self.learning_rate(),
        })
    }
}
