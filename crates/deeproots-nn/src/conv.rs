// Conv2d - 3×3 convolution with SAME padding
//
// The only convolution the network needs: square 3×3 kernels, stride 1 or 2,
// SAME padding (output = ceil(input / stride)), and no bias since every
// convolution is followed, directly or through a residual sum, by batch
// normalization.
//
// SHAPES:
//   Input:  [N, H, W, C_in]
//   Weight: [3, 3, C_in, C_out]   (HWIO)
//   Output: [N, ceil(H/s), ceil(W/s), C_out]
//
// INITIALIZATION:
//   He-style normal with n = kernel_area * C_out:
//     W ~ N(0, sqrt(2 / (9 * C_out)))

use deeproots_core::{Result, Tensor};
use rand::Rng;

use crate::init;
use crate::module::Module;

/// Square kernel size used by every convolution in the network.
pub const KERNEL_SIZE: usize = 3;

/// A 3×3 SAME convolution without bias.
///
/// # Examples
/// ```ignore
/// let conv = Conv2d::new("init/init_conv", 3, 16, 1, &mut rng)?;
/// let y = conv.forward(&images)?; // [N, H, W, 16]
/// ```
#[derive(Debug, Clone)]
pub struct Conv2d {
    name: String,
    weight: Tensor,
    in_channels: usize,
    out_channels: usize,
    stride: usize,
}

impl Conv2d {
    /// Create a convolution whose kernel is registered as `<scope>/weights`.
    ///
    /// # Arguments
    /// - `scope`: parameter scope, e.g. `block1/A/residual_0/sub1/conv1`
    /// - `in_channels`, `out_channels`: channel counts
    /// - `stride`: 1 or 2 in this network; any positive value works
    /// - `rng`: source for the kernel initialization
    pub fn new<R: Rng + ?Sized>(
        scope: &str,
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if in_channels == 0 || out_channels == 0 || stride == 0 {
            deeproots_core::bail!(
                "conv {scope}: channels and stride must be positive (in {in_channels}, out {out_channels}, stride {stride})"
            );
        }
        tracing::debug!(scope, in_channels, out_channels, stride, "conv2d");
        let n = (KERNEL_SIZE * KERNEL_SIZE * out_channels) as f32;
        let weight = init::normal(
            (KERNEL_SIZE, KERNEL_SIZE, in_channels, out_channels),
            (2.0 / n).sqrt(),
            rng,
        )?;
        Ok(Conv2d {
            name: format!("{scope}/weights"),
            weight,
            in_channels,
            out_channels,
            stride,
        })
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }
    pub fn out_channels(&self) -> usize {
        self.out_channels
    }
    pub fn stride(&self) -> usize {
        self.stride
    }
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }
}

impl Module for Conv2d {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        x.conv2d_same(&self.weight, self.stride)
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        vec![(self.name.clone(), self.weight.clone())]
    }
}
