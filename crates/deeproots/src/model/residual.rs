// Residual unit - two pre-activation sub-blocks plus a shortcut
//
//   sub1:  h = conv1(relu(bn(x)),  out_filter, stride)
//   sub2:  h = conv2(relu(bn(h)),  out_filter, 1)
//   add:   y = h + shortcut(x)
//
// SHORTCUT:
//   When the channel count or the spatial width changes, the input is
//   average pooled (window = stride = s, SAME geometry so the size matches
//   the conv path) and its channel axis is adjusted by
//
//     half = floor((out_filter - in_filter) / 2)
//
//   on each side: zero padding for half >= 0, cropping for half < 0. An odd
//   difference therefore leaves the shortcut one channel short (or long) and
//   the final addition fails with a shape mismatch.

use deeproots_core::Tensor;
use deeproots_nn::{BatchNorm2d, Conv2d, LeakyReLU, Mode, Module, UpdateOps};

use super::BuildContext;
use crate::error::Result;

/// One batch-norm → leaky relu → convolution sub-block.
#[derive(Debug, Clone)]
struct SubBlock {
    bn: BatchNorm2d,
    relu: LeakyReLU,
    conv: Conv2d,
}

impl SubBlock {
    fn new(
        scope: &str,
        conv_name: &str,
        in_filter: usize,
        out_filter: usize,
        stride: usize,
        ctx: &mut BuildContext<'_>,
    ) -> Result<Self> {
        Ok(SubBlock {
            bn: BatchNorm2d::new(&format!("{scope}/bn"), in_filter, ctx.mode, ctx.updates),
            relu: LeakyReLU::new(ctx.relu_leakiness),
            conv: Conv2d::new(
                &format!("{scope}/{conv_name}"),
                in_filter,
                out_filter,
                stride,
                &mut *ctx.rng,
            )?,
        })
    }

    fn with_mode(&self, mode: Mode, updates: &UpdateOps) -> Self {
        SubBlock {
            bn: self.bn.with_mode(mode, updates),
            ..self.clone()
        }
    }

    fn forward(&self, x: &Tensor) -> deeproots_core::Result<Tensor> {
        let h = self.bn.forward(x)?;
        let h = self.relu.forward(&h)?;
        self.conv.forward(&h)
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        let mut params = self.bn.named_parameters();
        params.extend(self.conv.named_parameters());
        params
    }
}

/// Residual unit with two sub layers.
#[derive(Debug, Clone)]
pub struct ResidualUnit {
    scope: String,
    sub1: SubBlock,
    sub2: SubBlock,
    in_filter: usize,
    out_filter: usize,
    stride: usize,
}

impl ResidualUnit {
    /// # Arguments
    /// - `scope`: e.g. `block2/AB/residual_0`
    /// - `in_filter`: channels of the input
    /// - `out_filter`: channels of the output
    /// - `stride`: stride of the first convolution (and of the shortcut pool)
    pub fn new(
        scope: &str,
        in_filter: usize,
        out_filter: usize,
        stride: usize,
        ctx: &mut BuildContext<'_>,
    ) -> Result<Self> {
        let sub1 = SubBlock::new(&format!("{scope}/sub1"), "conv1", in_filter, out_filter, stride, ctx)?;
        let sub2 = SubBlock::new(&format!("{scope}/sub2"), "conv2", out_filter, out_filter, 1, ctx)?;
        Ok(ResidualUnit {
            scope: scope.to_string(),
            sub1,
            sub2,
            in_filter,
            out_filter,
            stride,
        })
    }

    /// This unit in another mode, sharing every parameter and statistic.
    pub fn with_mode(&self, mode: Mode, updates: &UpdateOps) -> Self {
        ResidualUnit {
            sub1: self.sub1.with_mode(mode, updates),
            sub2: self.sub2.with_mode(mode, updates),
            ..self.clone()
        }
    }

    pub fn in_filter(&self) -> usize {
        self.in_filter
    }
    pub fn out_filter(&self) -> usize {
        self.out_filter
    }
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// The shortcut path alone: identity when `x` already matches `width`
    /// and `out_filter`, otherwise pooled and channel adjusted.
    pub fn shortcut(&self, x: &Tensor, out_width: usize) -> deeproots_core::Result<Tensor> {
        let (_, _, in_width, in_filter) = x.shape().nhwc("residual shortcut")?;
        if in_filter == self.out_filter && in_width == out_width {
            return Ok(x.clone());
        }
        let pooled = x.avg_pool2d_same(self.stride)?;
        let half = (self.out_filter as isize - in_filter as isize).div_euclid(2);
        let adjusted = if half >= 0 {
            pooled.pad_channels(half as usize, half as usize)?
        } else {
            let crop = half.unsigned_abs();
            let keep = in_filter.saturating_sub(2 * crop);
            pooled.narrow(3, crop.min(in_filter), keep)?
        };
        tracing::debug!(
            scope = %self.scope,
            shape = %adjusted.shape(),
            "avg pooling to fit dimensions"
        );
        Ok(adjusted)
    }
}

impl Module for ResidualUnit {
    fn forward(&self, x: &Tensor) -> deeproots_core::Result<Tensor> {
        let h = self.sub1.forward(x)?;
        let h = self.sub2.forward(&h)?;
        let out_width = h.shape().dim(2)?;
        let y = h.add(&self.shortcut(x, out_width)?)?;
        tracing::debug!(scope = %self.scope, shape = %y.shape(), "residual block output");
        Ok(y)
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        let mut params = self.sub1.named_parameters();
        params.extend(self.sub2.named_parameters());
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn unit(in_filter: usize, out_filter: usize, stride: usize) -> Result<ResidualUnit> {
        let updates = UpdateOps::new();
        let mut rng = StdRng::seed_from_u64(0);
        let mut ctx = BuildContext {
            mode: Mode::Train,
            relu_leakiness: 0.1,
            updates: &updates,
            rng: &mut rng,
        };
        ResidualUnit::new("unit", in_filter, out_filter, stride, &mut ctx)
    }

    #[test]
    fn test_shortcut_crops_sixteen_to_eight_with_stride_two() -> Result<()> {
        let u = unit(16, 8, 2)?;
        let x = Tensor::ones((2, 7, 7, 16));
        let s = u.shortcut(&x, 4)?;
        assert_eq!(s.dims(), &[2, 4, 4, 8]);
        assert_eq!(u.forward(&x)?.dims(), &[2, 4, 4, 8]);
        Ok(())
    }

    #[test]
    fn test_shortcut_pads_symmetrically() -> Result<()> {
        let u = unit(4, 8, 1)?;
        let x = Tensor::ones((1, 2, 2, 4));
        let s = u.shortcut(&x, 2)?.to_vec()?;
        // per position: [0, 0, 1, 1, 1, 1, 0, 0]
        assert_eq!(&s[..8], &[0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0]);
        Ok(())
    }

    #[test]
    fn test_identity_shortcut() -> Result<()> {
        let u = unit(8, 8, 1)?;
        let x = Tensor::ones((1, 4, 4, 8));
        assert_eq!(u.shortcut(&x, 4)?.id(), x.id());
        Ok(())
    }

    #[test]
    fn test_odd_channel_difference_fails_at_add() -> Result<()> {
        let u = unit(4, 7, 1)?;
        let x = Tensor::ones((1, 2, 2, 4));
        assert_eq!(u.shortcut(&x, 2)?.dims(), &[1, 2, 2, 6]);
        assert!(u.forward(&x).is_err());
        Ok(())
    }

    #[test]
    fn test_parameter_names() -> Result<()> {
        let names: Vec<String> = unit(4, 8, 2)?
            .named_parameters()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(
            names,
            vec![
                "unit/sub1/bn/beta",
                "unit/sub1/conv1/weights",
                "unit/sub2/bn/beta",
                "unit/sub2/conv2/weights",
            ]
        );
        Ok(())
    }
}
