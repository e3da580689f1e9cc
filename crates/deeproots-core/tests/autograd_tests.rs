// Gradient checks for the tensor engine
//
// Every differentiable op used by the network is checked against central
// finite differences. Inputs are small so the f32 round-off stays well below
// the tolerance.

use deeproots_core::{Result, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;

const H: f32 = 1e-2;

/// Compare backward() against finite differences for one variable.
///
/// `f` maps the variable to a scalar loss.
fn check_grad<F>(data: Vec<f32>, dims: &[usize], f: F) -> Result<()>
where
    F: Fn(&Tensor) -> Result<Tensor>,
{
    let var = Tensor::from_vec(data.clone(), dims)?.set_variable();
    let loss = f(&var)?;
    let grads = loss.backward()?;
    let analytic = grads
        .get(&var)
        .expect("variable should receive a gradient")
        .to_vec()?;

    for i in 0..data.len() {
        let mut plus = data.clone();
        plus[i] += H;
        let mut minus = data.clone();
        minus[i] -= H;
        let lp = f(&Tensor::from_vec(plus, dims)?)?.to_scalar()?;
        let lm = f(&Tensor::from_vec(minus, dims)?)?.to_scalar()?;
        let numeric = (lp - lm) / (2.0 * H);
        let tol = 3e-2 + 2e-2 * numeric.abs();
        assert!(
            (analytic[i] - numeric).abs() < tol,
            "index {i}: analytic {} numeric {numeric}",
            analytic[i]
        );
    }
    Ok(())
}

fn random(dims: &[usize], seed: u64) -> Result<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    Tensor::randn(dims, 0.0, 1.0, &mut rng)?.to_vec()
}

/// Sum of squares of `t + offset`, which has a non-trivial gradient for any t.
fn shifted_square(t: &Tensor, seed: u64) -> Result<Tensor> {
    let offset = Tensor::from_vec(random(t.dims(), seed)?, t.dims())?;
    t.add(&offset)?.sum_squares()
}

#[test]
fn test_conv2d_grad_wrt_input() -> Result<()> {
    let w = Tensor::from_vec(random(&[3, 3, 2, 3], 1)?, (3, 3, 2, 3))?;
    check_grad(random(&[1, 4, 5, 2], 2)?, &[1, 4, 5, 2], |x| {
        shifted_square(&x.conv2d_same(&w, 1)?, 3)
    })
}

#[test]
fn test_conv2d_strided_grad_wrt_weight() -> Result<()> {
    let x = Tensor::from_vec(random(&[2, 5, 5, 2], 4)?, (2, 5, 5, 2))?;
    check_grad(random(&[3, 3, 2, 2], 5)?, &[3, 3, 2, 2], |w| {
        shifted_square(&x.conv2d_same(w, 2)?, 6)
    })
}

#[test]
fn test_batch_norm_grad() -> Result<()> {
    check_grad(random(&[3, 2, 2, 2], 7)?, &[3, 2, 2, 2], |x| {
        let (y, _) = x.batch_norm_train(1e-3)?;
        shifted_square(&y, 8)
    })
}

#[test]
fn test_avg_pool_grad_odd_size() -> Result<()> {
    check_grad(random(&[1, 3, 5, 2], 9)?, &[1, 3, 5, 2], |x| {
        shifted_square(&x.avg_pool2d_same(2)?, 10)
    })
}

#[test]
fn test_pad_narrow_cat_grad() -> Result<()> {
    check_grad(random(&[1, 2, 2, 4], 11)?, &[1, 2, 2, 4], |x| {
        let parts = x.chunk(2, 3)?;
        let padded = parts[0].pad_channels(1, 1)?;
        let cropped = parts[1].narrow(3, 0, 1)?;
        let joined = Tensor::cat(&[padded, cropped, parts[1].clone()], 3)?;
        shifted_square(&joined, 12)
    })
}

#[test]
fn test_channel_bias_and_scale_grad() -> Result<()> {
    let x = Tensor::from_vec(random(&[2, 2, 2, 3], 13)?, (2, 2, 2, 3))?;
    check_grad(vec![0.5, -1.0, 2.0], &[3], |b| {
        let y = x.scale_shift_channel(&[2.0, 0.5, -1.0], &[0.1, 0.2, 0.3])?;
        shifted_square(&y.add_channel(b)?, 14)
    })
}

#[test]
fn test_leaky_relu_grad() -> Result<()> {
    // keep values away from the kink
    let data = vec![1.3, -0.7, 0.4, -2.1, 0.9, -0.2];
    check_grad(data, &[1, 1, 2, 3], |x| shifted_square(&x.leaky_relu(0.1)?, 15))
}

#[test]
fn test_head_grad_through_xent() -> Result<()> {
    let x = Tensor::from_vec(random(&[2, 2, 2, 3], 16)?, (2, 2, 2, 3))?;
    let labels = Tensor::from_vec(vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0], (2, 4))?;
    check_grad(random(&[3, 4], 17)?, &[3, 4], |w| {
        let pooled = x.mean_spatial()?;
        let logits = pooled.matmul(w)?;
        logits.softmax_cross_entropy(&labels)?.mean_all()
    })?;

    let w = Tensor::from_vec(random(&[3, 4], 18)?, (3, 4))?;
    check_grad(random(&[2, 2, 2, 3], 19)?, &[2, 2, 2, 3], |x| {
        let logits = x.mean_spatial()?.matmul(&w)?;
        logits.softmax_cross_entropy(&labels)?.mean_all()
    })
}

#[test]
fn test_reshape_and_affine_grad() -> Result<()> {
    check_grad(random(&[2, 1, 1, 3], 20)?, &[2, 1, 1, 3], |x| {
        shifted_square(&x.flatten()?.affine(-0.5, 1.0)?, 21)
    })
}

#[test]
fn test_shared_input_accumulates() -> Result<()> {
    // y = x + x  =>  dL/dx = 2 * dL/dy
    let x = Tensor::from_vec(vec![1.0, 2.0], (2,))?.set_variable();
    let loss = x.add(&x)?.sum_squares()?;
    let grads = loss.backward()?;
    let g = grads.get(&x).expect("gradient for x").to_vec()?;
    // L = sum (2x)^2 = 4 sum x^2, dL/dx = 8x
    assert_eq!(g, vec![8.0, 16.0]);
    Ok(())
}

#[test]
fn test_constants_get_no_gradient() -> Result<()> {
    let x = Tensor::ones((2,));
    let w = Tensor::ones((2,)).set_variable();
    let loss = x.add(&w)?.sum_squares()?;
    let grads = loss.backward()?;
    assert!(grads.get(&x).is_none());
    assert!(grads.get(&w).is_some());
    assert_eq!(grads.len(), 1);
    Ok(())
}

#[test]
fn test_backward_requires_scalar() {
    let w = Tensor::ones((2,)).set_variable();
    assert!(w.backward().is_err());
}
