// Parameter initialization
//
// Two schemes are used by the network:
//
//   normal(shape, std)                 - N(0, std), convolution kernels
//   uniform_unit_scaling(shape, f)     - U(-sqrt(3/fan_in)·f, +sqrt(3/fan_in)·f),
//                                        the fully connected layer
//
// plus constants for offsets and biases. Every function returns a tensor
// with `set_variable()` already called, except `constant`, whose result is
// meant for non-trainable state such as running averages.

use deeproots_core::{Result, Shape, Tensor};
use rand::Rng;

/// Fan-in of a weight shape in the layouts used here.
///
/// - 2-D `[in, out]` (Linear): `dims[0]`
/// - 4-D HWIO `[kh, kw, in, out]` (Conv2d): `kh * kw * in`
/// - anything else: every dimension but the last
pub fn fan_in(shape: &Shape) -> usize {
    let dims = shape.dims();
    match dims.len() {
        0 => 1,
        1 => dims[0],
        n => dims[..n - 1].iter().product(),
    }
}

/// Trainable tensor drawn from N(0, std).
pub fn normal<R: Rng + ?Sized>(shape: impl Into<Shape>, std: f32, rng: &mut R) -> Result<Tensor> {
    Ok(Tensor::randn(shape, 0.0, std, rng)?.set_variable())
}

/// Trainable tensor drawn from the unit-scaling uniform distribution.
///
/// Keeps the activation scale constant through a linear layer: the bound is
/// `sqrt(3 / fan_in) * factor`.
pub fn uniform_unit_scaling<R: Rng + ?Sized>(
    shape: impl Into<Shape>,
    factor: f32,
    rng: &mut R,
) -> Result<Tensor> {
    let shape = shape.into();
    let bound = (3.0 / fan_in(&shape).max(1) as f32).sqrt() * factor;
    Ok(Tensor::rand_uniform(shape, -bound, bound, rng)?.set_variable())
}

/// Trainable tensor of zeros.
pub fn zeros(shape: impl Into<Shape>) -> Tensor {
    Tensor::zeros(shape).set_variable()
}

/// Non-trainable tensor filled with `val`.
pub fn constant(shape: impl Into<Shape>, val: f32) -> Tensor {
    Tensor::full(shape, val)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_fan_in_layouts() {
        assert_eq!(fan_in(&Shape::from((3, 3, 16, 8))), 144);
        assert_eq!(fan_in(&Shape::from((40, 10))), 40);
    }

    #[test]
    fn test_uniform_unit_scaling_bound() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(3);
        let w = uniform_unit_scaling((12, 5), 1.0, &mut rng)?;
        let bound = (3.0f32 / 12.0).sqrt();
        assert!(w.is_variable());
        assert!(w.to_vec()?.iter().all(|v| v.abs() <= bound));
        Ok(())
    }

    #[test]
    fn test_constant_is_not_trainable() {
        let m = constant(4, 1.0);
        assert!(!m.is_variable());
        assert!(zeros(4).is_variable());
    }
}
