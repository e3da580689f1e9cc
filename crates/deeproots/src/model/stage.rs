use deeproots_core::Tensor;
use deeproots_nn::{Mode, Module, UpdateOps};

use super::residual::ResidualUnit;
use super::BuildContext;
use crate::error::{Error, Result};

/// A stack of `n` residual units with one output filter count.
///
/// The first unit applies `first_stride` and adapts the channel count; the
/// remaining `n - 1` units use stride 1. Units are scoped
/// `<scope>/residual_0 … <scope>/residual_{n-1}`.
#[derive(Debug, Clone)]
pub struct Stage {
    scope: String,
    units: Vec<ResidualUnit>,
}

impl Stage {
    pub fn new(
        scope: &str,
        in_filter: usize,
        num_units: usize,
        out_filter: usize,
        first_stride: usize,
        ctx: &mut BuildContext<'_>,
    ) -> Result<Self> {
        if num_units == 0 {
            return Err(Error::config(format!("stage {scope}: needs at least one residual unit")));
        }
        tracing::debug!(scope, in_filter, out_filter, first_stride, "stage");
        let mut units = Vec::with_capacity(num_units);
        units.push(ResidualUnit::new(
            &format!("{scope}/residual_0"),
            in_filter,
            out_filter,
            first_stride,
            ctx,
        )?);
        for i in 1..num_units {
            units.push(ResidualUnit::new(
                &format!("{scope}/residual_{i}"),
                out_filter,
                out_filter,
                1,
                ctx,
            )?);
        }
        Ok(Stage {
            scope: scope.to_string(),
            units,
        })
    }

    pub fn with_mode(&self, mode: Mode, updates: &UpdateOps) -> Self {
        Stage {
            scope: self.scope.clone(),
            units: self.units.iter().map(|u| u.with_mode(mode, updates)).collect(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Channels expected at the input of the first unit.
    pub fn in_filter(&self) -> usize {
        self.units[0].in_filter()
    }

    pub fn out_filter(&self) -> usize {
        self.units[0].out_filter()
    }

    pub fn units(&self) -> &[ResidualUnit] {
        &self.units
    }
}

impl Module for Stage {
    fn forward(&self, x: &Tensor) -> deeproots_core::Result<Tensor> {
        let mut h = x.clone();
        for unit in &self.units {
            h = unit.forward(&h)?;
        }
        tracing::debug!(scope = %self.scope, shape = %h.shape(), "stage output");
        Ok(h)
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        self.units.iter().flat_map(|u| u.named_parameters()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_stage_strides_first_unit_only() -> Result<()> {
        let updates = UpdateOps::new();
        let mut rng = StdRng::seed_from_u64(1);
        let mut ctx = BuildContext {
            mode: Mode::Eval,
            relu_leakiness: 0.1,
            updates: &updates,
            rng: &mut rng,
        };
        let stage = Stage::new("block2/AB", 4, 3, 8, 2, &mut ctx)?;
        let strides: Vec<usize> = stage.units().iter().map(|u| u.stride()).collect();
        assert_eq!(strides, vec![2, 1, 1]);
        assert_eq!(stage.in_filter(), 4);

        let y = stage.forward(&Tensor::ones((2, 8, 8, 4)))?;
        assert_eq!(y.dims(), &[2, 4, 4, 8]);
        assert!(stage
            .named_parameters()
            .iter()
            .any(|(n, _)| n == "block2/AB/residual_2/sub2/conv2/weights"));
        Ok(())
    }

    #[test]
    fn test_zero_units_rejected() {
        let updates = UpdateOps::new();
        let mut rng = StdRng::seed_from_u64(1);
        let mut ctx = BuildContext {
            mode: Mode::Eval,
            relu_leakiness: 0.1,
            updates: &updates,
            rng: &mut rng,
        };
        assert!(Stage::new("s", 4, 0, 8, 1, &mut ctx).is_err());
    }
}
