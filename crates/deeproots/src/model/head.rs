// Classification head
//
//   final/unify              3×3 conv to head_filters, stride 1
//   final/bn                 batch norm
//                            leaky relu
//                            global average pool  [B, H, W, C] → [B, C]
//   logit/fully_connected    linear to num_classes (raw logits)

use deeproots_core::Tensor;
use deeproots_nn::{BatchNorm2d, Conv2d, LeakyReLU, Linear, Mode, Module, UpdateOps};

use super::BuildContext;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct Head {
    unify: Conv2d,
    bn: BatchNorm2d,
    relu: LeakyReLU,
    fc: Linear,
}

impl Head {
    pub fn new(
        in_channels: usize,
        head_filters: usize,
        num_classes: usize,
        ctx: &mut BuildContext<'_>,
    ) -> Result<Self> {
        Ok(Head {
            unify: Conv2d::new("final/unify", in_channels, head_filters, 1, &mut *ctx.rng)?,
            bn: BatchNorm2d::new("final/bn", head_filters, ctx.mode, ctx.updates),
            relu: LeakyReLU::new(ctx.relu_leakiness),
            fc: Linear::new("logit/fully_connected", head_filters, num_classes, &mut *ctx.rng)?,
        })
    }

    pub fn with_mode(&self, mode: Mode, updates: &UpdateOps) -> Self {
        Head {
            bn: self.bn.with_mode(mode, updates),
            ..self.clone()
        }
    }

    /// Batch norm after the unify convolution, scoped `final/bn`.
    pub fn bn(&self) -> &BatchNorm2d {
        &self.bn
    }

    /// Pooled features `[B, head_filters]` before the fully connected layer.
    pub fn features(&self, x: &Tensor) -> deeproots_core::Result<Tensor> {
        let h = self.unify.forward(x)?;
        let h = self.bn.forward(&h)?;
        let h = self.relu.forward(&h)?;
        let pooled = h.mean_spatial()?;
        tracing::info!(shape = %pooled.shape(), "Final Layer Output");
        Ok(pooled)
    }
}

impl Module for Head {
    /// Logits `[B, num_classes]`.
    fn forward(&self, x: &Tensor) -> deeproots_core::Result<Tensor> {
        let flat = self.features(x)?.flatten()?;
        tracing::debug!(shape = %flat.shape(), "Flatten Output");
        self.fc.forward(&flat)
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        let mut params = self.unify.named_parameters();
        params.extend(self.bn.named_parameters());
        params.extend(self.fc.named_parameters());
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_head_logits_shape_and_eval_repeatability() -> Result<()> {
        let updates = UpdateOps::new();
        let mut rng = StdRng::seed_from_u64(2);
        let mut ctx = BuildContext {
            mode: Mode::Eval,
            relu_leakiness: 0.1,
            updates: &updates,
            rng: &mut rng,
        };
        let head = Head::new(64, 40, 10, &mut ctx)?;
        let x = Tensor::randn((3, 4, 4, 64), 0.0, 1.0, &mut StdRng::seed_from_u64(3))?;
        let a = head.forward(&x)?;
        assert_eq!(a.dims(), &[3, 10]);
        assert_eq!(a.to_vec()?, head.forward(&x)?.to_vec()?);
        assert!(updates.is_empty()?);
        Ok(())
    }
}
