// UpdateOps - Side-effect updates gathered while building a training step
//
// Batch normalization in training mode must also move its running averages:
//
//   moving ← decay · moving + (1 - decay) · batch_value
//
// These updates are not part of the differentiable graph. Each BatchNorm2d
// built in Train mode holds a handle to one shared collector and pushes a
// MomentUpdate every time it runs forward. The train step drains the
// collector after the parameter update, so one step applies both.
//
// The running averages are ordinary (non-variable) tensors. Applying an
// update writes through their shared storage, so the layer sees the new
// values on its next forward without any re-wiring.

use std::sync::{Arc, Mutex, MutexGuard};

use deeproots_core::{Error, Result, Tensor};

/// One pending exponential-moving-average update.
#[derive(Debug, Clone)]
pub struct MomentUpdate {
    name: String,
    target: Tensor,
    value: Vec<f32>,
    decay: f32,
}

impl MomentUpdate {
    /// Queue `target ← decay · target + (1 - decay) · value`.
    pub fn new(name: impl Into<String>, target: &Tensor, value: Vec<f32>, decay: f32) -> Result<Self> {
        if value.len() != target.elem_count() {
            return Err(Error::ElementCountMismatch {
                shape: target.shape().clone(),
                expected: target.elem_count(),
                got: value.len(),
            });
        }
        Ok(MomentUpdate {
            name: name.into(),
            target: target.clone(),
            value,
            decay,
        })
    }

    /// Scoped name of the running statistic this update writes.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The running statistic this update writes.
    pub fn target(&self) -> &Tensor {
        &self.target
    }

    pub fn apply(&self) -> Result<()> {
        let current = self.target.to_vec()?;
        let updated: Vec<f32> = current
            .iter()
            .zip(&self.value)
            .map(|(m, v)| self.decay * m + (1.0 - self.decay) * v)
            .collect();
        self.target.update_data_inplace(&updated)
    }
}

/// Shared collector of pending [`MomentUpdate`]s.
///
/// Cloning yields another handle to the same queue.
#[derive(Debug, Clone, Default)]
pub struct UpdateOps {
    pending: Arc<Mutex<Vec<MomentUpdate>>>,
}

impl UpdateOps {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<MomentUpdate>>> {
        self.pending
            .lock()
            .map_err(|_| Error::msg("update collector lock poisoned"))
    }

    pub fn push(&self, update: MomentUpdate) -> Result<()> {
        self.lock()?.push(update);
        Ok(())
    }

    /// Number of queued updates.
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }

    /// Drop every queued update without applying it.
    pub fn clear(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }

    /// Take every queued update, leaving the collector empty.
    pub fn drain(&self) -> Result<Vec<MomentUpdate>> {
        Ok(std::mem::take(&mut *self.lock()?))
    }

    /// Apply and remove every queued update. Returns how many were applied.
    pub fn apply_all(&self) -> Result<usize> {
        let updates = self.drain()?;
        for update in &updates {
            update.apply()?;
        }
        Ok(updates.len())
    }
}
