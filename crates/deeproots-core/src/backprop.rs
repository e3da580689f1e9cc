// Backpropagation - Reverse-mode automatic differentiation
//
// backward() computes the gradient of a scalar loss with respect to every
// trainable variable that contributed to it.
//
// HOW IT WORKS:
//
//   1. Forward ops record an Op holding their inputs, building a DAG.
//
//   2. backward() orders the DAG topologically (leaves first, loss last).
//      The walk is iterative: a network with dozens of residual units
//      produces deep graphs and recursion would risk the stack.
//
//   3. Starting with dL/dL = 1, the graph is walked in reverse. Each node
//      applies its chain rule and adds the result into the gradients of the
//      inputs that require one.
//
// Intermediate gradients live as flat Vec<f32> buffers keyed by TensorId and
// are dropped as soon as the walk ends. Only gradients of variables are
// wrapped into tensors and returned.
//
// ACCUMULATION: a tensor consumed by several ops (a residual input feeds both
// the shortcut and the conv path) receives the SUM of all contributions.

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::kernels::{self, Window};
use crate::op::{Op, TensorId};
use crate::tensor::Tensor;

/// Gradients of the trainable variables reached by a backward pass.
///
/// Use `grads.get(&param)` to retrieve the gradient of a parameter.
#[derive(Clone, Default)]
pub struct GradStore {
    grads: HashMap<TensorId, Tensor>,
}

impl GradStore {
    pub fn new() -> Self {
        GradStore {
            grads: HashMap::new(),
        }
    }

    /// Gradient of a tensor, if it was reached.
    pub fn get(&self, tensor: &Tensor) -> Option<&Tensor> {
        self.grads.get(&tensor.id())
    }

    pub fn get_by_id(&self, id: &TensorId) -> Option<&Tensor> {
        self.grads.get(id)
    }

    /// Add `grad` to the stored gradient for `id` (or insert it).
    pub fn accumulate(&mut self, id: TensorId, grad: Tensor) -> Result<()> {
        let merged = match self.grads.get(&id) {
            Some(existing) => existing.add(&grad)?,
            None => grad,
        };
        self.grads.insert(id, merged);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.grads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grads.is_empty()
    }
}

/// Topological order of everything reachable from `root` that requires a
/// gradient. Leaves come first, `root` last.
fn build_topo(root: &Tensor) -> Vec<Tensor> {
    let mut visited: HashSet<TensorId> = HashSet::new();
    let mut order = Vec::new();
    // (tensor, children already pushed)
    let mut stack: Vec<(Tensor, bool)> = vec![(root.clone(), false)];

    while let Some((t, expanded)) = stack.pop() {
        if expanded {
            order.push(t);
            continue;
        }
        if !visited.insert(t.id()) {
            continue;
        }
        stack.push((t.clone(), true));
        for input in t.op().inputs() {
            if input.requires_grad() && !visited.contains(&input.id()) {
                stack.push((input.clone(), false));
            }
        }
    }
    order
}

/// Run backpropagation from a scalar `root`.
pub fn backward(root: &Tensor) -> Result<GradStore> {
    if root.elem_count() != 1 {
        return Err(Error::NotAScalar {
            shape: root.shape().clone(),
        });
    }
    let mut store = GradStore::new();
    if !root.requires_grad() {
        return Ok(store);
    }

    let order = build_topo(root);
    let mut grads: HashMap<TensorId, Vec<f32>> = HashMap::new();
    grads.insert(root.id(), vec![1.0]);

    for node in order.iter().rev() {
        let Some(grad) = grads.remove(&node.id()) else {
            continue;
        };
        if node.is_variable() {
            let g = Tensor::from_vec(grad.clone(), node.shape().clone())?;
            store.accumulate(node.id(), g)?;
        }
        for (input, input_grad) in input_grads(node, &grad)? {
            if !input.requires_grad() {
                continue;
            }
            match grads.get_mut(&input.id()) {
                Some(acc) => acc.iter_mut().zip(&input_grad).for_each(|(a, g)| *a += g),
                None => {
                    grads.insert(input.id(), input_grad);
                }
            }
        }
    }
    Ok(store)
}

/// Chain rule for one node: gradients for each differentiable input.
fn input_grads<'a>(node: &'a Tensor, grad: &[f32]) -> Result<Vec<(&'a Tensor, Vec<f32>)>> {
    let out = match node.op() {
        Op::None => vec![],

        Op::Add { lhs, rhs } => vec![(lhs, grad.to_vec()), (rhs, grad.to_vec())],

        Op::Affine { input, mul } => vec![(input, grad.iter().map(|g| g * mul).collect())],

        Op::LeakyRelu { input, alpha } => {
            let x = input.data()?;
            let dx = grad
                .iter()
                .zip(x.iter())
                .map(|(g, &v)| if v < 0.0 { g * alpha } else { *g })
                .collect();
            vec![(input, dx)]
        }

        Op::AddChannel { input, bias } => {
            let c = bias.elem_count();
            let mut db = vec![0.0f32; c];
            for row in grad.chunks(c) {
                db.iter_mut().zip(row).for_each(|(d, g)| *d += g);
            }
            vec![(input, grad.to_vec()), (bias, db)]
        }

        Op::ScaleChannel { input, scale } => {
            let c = scale.len();
            let dx = grad
                .chunks(c)
                .flat_map(|row| row.iter().zip(scale).map(|(g, s)| g * s))
                .collect();
            vec![(input, dx)]
        }

        Op::BatchNorm {
            input,
            x_hat,
            inv_std,
        } => vec![(input, batch_norm_grad(grad, x_hat, inv_std))],

        Op::Conv2d {
            input,
            weight,
            stride,
            padding,
        } => {
            let (n, h, w, c_in) = input.shape().nhwc("conv2d backward")?;
            let (kh, kw, _, c_out) = weight.shape().nhwc("conv2d backward")?;
            let geom = Window {
                h,
                w,
                c: c_in,
                kh,
                kw,
                stride: *stride,
                pad_h: padding[0],
                pad_w: padding[1],
                h_out: h.div_ceil(*stride),
                w_out: w.div_ceil(*stride),
            };
            let (dx, dw) = {
                let x = input.data()?;
                let k = weight.data()?;
                kernels::conv2d_backward(&x, &k, grad, n, c_out, &geom)
            };
            vec![(input, dx), (weight, dw)]
        }

        Op::AvgPool2d {
            input,
            window,
            padding,
        } => {
            let (n, h, w, c) = input.shape().nhwc("avg_pool2d backward")?;
            let geom = Window {
                h,
                w,
                c,
                kh: *window,
                kw: *window,
                stride: *window,
                pad_h: padding[0],
                pad_w: padding[1],
                h_out: h.div_ceil(*window),
                w_out: w.div_ceil(*window),
            };
            vec![(input, kernels::avg_pool_backward(grad, n, &geom))]
        }

        Op::PadChannels {
            input,
            before,
            after,
        } => {
            let c = input.shape().channels()?;
            let c_new = c + before + after;
            let outer = grad.len() / c_new.max(1);
            vec![(
                input,
                kernels::narrow_copy(grad, outer, c_new, 1, *before, c),
            )]
        }

        Op::Narrow {
            input,
            dim,
            start,
            len,
        } => {
            let (outer, inner) = input.shape().outer_inner(*dim)?;
            let size = input.dims()[*dim];
            let mut dx = vec![0.0f32; input.elem_count()];
            kernels::narrow_scatter_add(&mut dx, grad, outer, size, inner, *start, *len);
            vec![(input, dx)]
        }

        Op::Cat { inputs, dim, sizes } => {
            let (outer, inner) = node.shape().outer_inner(*dim)?;
            let total: usize = sizes.iter().sum();
            let mut start = 0;
            let mut parts = Vec::with_capacity(inputs.len());
            for (t, &size) in inputs.iter().zip(sizes) {
                parts.push((t, kernels::narrow_copy(grad, outer, total, inner, start, size)));
                start += size;
            }
            parts
        }

        Op::MeanSpatial { input } => {
            let (n, h, w, c) = input.shape().nhwc("mean_spatial backward")?;
            let hw = h * w;
            let scale = 1.0 / hw as f32;
            let mut dx = Vec::with_capacity(input.elem_count());
            for ni in 0..n {
                let g = &grad[ni * c..(ni + 1) * c];
                for _ in 0..hw {
                    dx.extend(g.iter().map(|v| v * scale));
                }
            }
            vec![(input, dx)]
        }

        Op::Matmul { lhs, rhs } => {
            let (m, k) = (lhs.dims()[0], lhs.dims()[1]);
            let n = rhs.dims()[1];
            let a = lhs.data()?;
            let b = rhs.data()?;
            // dA = G × Bᵀ, dB = Aᵀ × G
            let mut da = vec![0.0f32; m * k];
            kernels::gemm_a_bt(grad, &b, &mut da, m, k, n);
            let mut db = vec![0.0f32; k * n];
            kernels::gemm_at_b(&a, grad, &mut db, k, n, m);
            vec![(lhs, da), (rhs, db)]
        }

        Op::Reshape { input, src_shape } => {
            debug_assert_eq!(src_shape.elem_count(), grad.len());
            vec![(input, grad.to_vec())]
        }

        Op::SoftmaxXent {
            logits,
            labels,
            probs,
        } => {
            let k = logits.shape().channels()?;
            let y = labels.data()?;
            let dl = probs
                .chunks(k)
                .zip(y.chunks(k))
                .zip(grad)
                .flat_map(|((p, t), g)| p.iter().zip(t).map(move |(pv, tv)| g * (pv - tv)))
                .collect();
            vec![(logits, dl)]
        }

        Op::MeanAll { input } => {
            let n = input.elem_count();
            vec![(input, vec![grad[0] / n as f32; n])]
        }

        Op::SumSquares { input } => {
            let x = input.data()?;
            vec![(input, x.iter().map(|v| 2.0 * v * grad[0]).collect())]
        }
    };
    Ok(out)
}

/// Gradient of `x_hat = (x - mean) * inv_std` with batch statistics.
///
/// Per channel: `dx = inv_std * (g - mean(g) - x_hat * mean(g * x_hat))`.
fn batch_norm_grad(grad: &[f32], x_hat: &[f32], inv_std: &[f32]) -> Vec<f32> {
    let c = inv_std.len();
    let count = (grad.len() / c) as f32;
    let mut mean_g = vec![0.0f32; c];
    let mut mean_gx = vec![0.0f32; c];
    for (g_row, x_row) in grad.chunks(c).zip(x_hat.chunks(c)) {
        for ci in 0..c {
            mean_g[ci] += g_row[ci];
            mean_gx[ci] += g_row[ci] * x_row[ci];
        }
    }
    mean_g.iter_mut().for_each(|v| *v /= count);
    mean_gx.iter_mut().for_each(|v| *v /= count);

    grad.chunks(c)
        .zip(x_hat.chunks(c))
        .flat_map(|(g_row, x_row)| {
            (0..c).map(|ci| {
                inv_std[ci] * (g_row[ci] - mean_g[ci] - x_row[ci] * mean_gx[ci])
            })
        })
        .collect()
}

