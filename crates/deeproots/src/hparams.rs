// HParams - Hyperparameters of one model instance
//
// An immutable record built once before the model and never mutated. The
// defaults are the CIFAR-10 configuration. JSON files may set any subset of
// fields; missing fields take the defaults, unknown fields are rejected:
//
//   { "batch_size": 64, "optimizer": "sgd" }

use std::path::Path;

use deeproots_optim::OptimizerKind;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HParams {
    pub batch_size: usize,
    pub num_classes: usize,
    /// Floor for the learning rate when a schedule lowers it.
    pub min_lrn_rate: f32,
    /// Initial learning rate.
    pub lrn_rate: f32,
    /// Residual units per stage.
    pub num_residual_units: usize,
    /// Accepted for compatibility. Residual units never use a bottleneck.
    pub use_bottleneck: bool,
    pub weight_decay_rate: f32,
    /// Slope of the leaky rectifier for negative inputs.
    pub relu_leakiness: f32,
    pub optimizer: OptimizerKind,
}

impl Default for HParams {
    fn default() -> Self {
        HParams {
            batch_size: 128,
            num_classes: 10,
            min_lrn_rate: 1e-4,
            lrn_rate: 0.1,
            num_residual_units: 5,
            use_bottleneck: false,
            weight_decay_rate: 2e-4,
            relu_leakiness: 0.1,
            optimizer: OptimizerKind::Momentum,
        }
    }
}

impl HParams {
    /// Check every field, failing on the first invalid one.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("batch_size", self.batch_size),
            ("num_classes", self.num_classes),
            ("num_residual_units", self.num_residual_units),
        ] {
            if value == 0 {
                return Err(Error::config(format!("{name} must be positive")));
            }
        }
        for (name, value) in [
            ("min_lrn_rate", self.min_lrn_rate),
            ("lrn_rate", self.lrn_rate),
            ("weight_decay_rate", self.weight_decay_rate),
            ("relu_leakiness", self.relu_leakiness),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::config(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        if self.min_lrn_rate > self.lrn_rate {
            return Err(Error::config(format!(
                "min_lrn_rate {} exceeds lrn_rate {}",
                self.min_lrn_rate, self.lrn_rate
            )));
        }
        Ok(())
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let hps: HParams = serde_json::from_str(json)?;
        hps.validate()?;
        Ok(hps)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
