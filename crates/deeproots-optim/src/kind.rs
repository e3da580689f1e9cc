use std::fmt;
use std::str::FromStr;

use deeproots_core::{Error, Result, Tensor};
use serde::{Deserialize, Serialize};

use crate::sgd::SGD;

/// Momentum factor used by [`OptimizerKind::Momentum`].
pub const MOMENTUM: f32 = 0.9;

/// Which gradient-descent variant a model trains with.
///
/// Serialized as `"sgd"` or `"mom"`; any other name is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerKind {
    /// Plain gradient descent.
    #[serde(rename = "sgd")]
    Sgd,
    /// Gradient descent with classical momentum 0.9.
    #[serde(rename = "mom")]
    Momentum,
}

impl OptimizerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OptimizerKind::Sgd => "sgd",
            OptimizerKind::Momentum => "mom",
        }
    }

    pub fn momentum(self) -> f32 {
        match self {
            OptimizerKind::Sgd => 0.0,
            OptimizerKind::Momentum => MOMENTUM,
        }
    }

    /// Build the optimizer for `params` at learning rate `lr`.
    pub fn build(self, params: Vec<Tensor>, lr: f32) -> Result<SGD> {
        tracing::debug!(optimizer = self.as_str(), lr, params = params.len(), "building optimizer");
        SGD::new(params, lr, self.momentum())
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sgd" => Ok(OptimizerKind::Sgd),
            "mom" => Ok(OptimizerKind::Momentum),
            other => Err(Error::msg(format!(
                "unknown optimizer '{other}'. Supported: sgd, mom"
            ))),
        }
    }
}
