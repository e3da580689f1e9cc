use std::sync::{Arc, RwLock, RwLockReadGuard};

use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};

use crate::error::{Error, Result};
use crate::kernels::{self, Window};
use crate::op::{Op, TensorId};
use crate::shape::Shape;

// Tensor - The fundamental data structure
//
// A Tensor is a contiguous f32 buffer plus a shape, optionally tracking the
// operation that produced it (for autograd). Feature maps are NHWC.
//
// MEMORY MODEL:
//
//   The handle is an Arc around the inner record, so cloning a Tensor is O(1).
//   The buffer itself sits behind Arc<RwLock<Vec<f32>>>: a parameter tensor is
//   shared by the layer that owns it, by the graph that used it, and by the
//   optimizer. Optimizer updates write through the lock, and every holder sees
//   the new values without re-wiring the model.
//
// GRADIENT TRACKING:
//
//   `requires_grad` is true for variables and for anything computed from a
//   variable. Ops built only from constants are recorded as Op::None, so
//   images, labels and running statistics never enter the backward walk.

struct TensorInner {
    id: TensorId,
    storage: Arc<RwLock<Vec<f32>>>,
    shape: Shape,
    op: Op,
    /// Trainable parameter: backward() reports its gradient.
    is_variable: bool,
    /// Variable, or computed from at least one variable.
    requires_grad: bool,
}

/// An n-dimensional `f32` array with automatic differentiation.
///
/// # Example
/// ```ignore
/// let x = Tensor::from_vec(vec![1.0, -2.0, 3.0, -4.0], (1, 2, 2, 1))?;
/// let y = x.leaky_relu(0.1)?;
/// assert_eq!(y.to_vec()?, vec![1.0, -0.2, 3.0, -0.4]);
/// ```
pub struct Tensor {
    inner: Arc<TensorInner>,
}

impl Clone for Tensor {
    fn clone(&self) -> Self {
        Tensor {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tensor(id={:?}, shape={}, op={}, variable={})",
            self.inner.id,
            self.inner.shape,
            self.inner.op.name(),
            self.inner.is_variable,
        )
    }
}

/// Per-channel statistics of one training batch, returned by
/// [`Tensor::batch_norm_train`] so callers can update running averages.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchMoments {
    pub mean: Vec<f32>,
    pub variance: Vec<f32>,
}

impl Tensor {
    // Internal constructors

    /// Wrap a freshly computed buffer, dropping the op if nothing upstream
    /// requires a gradient.
    pub(crate) fn from_op(data: Vec<f32>, shape: Shape, op: Op) -> Self {
        let requires_grad = op.inputs().iter().any(|t| t.requires_grad());
        let op = if requires_grad { op } else { Op::None };
        Tensor {
            inner: Arc::new(TensorInner {
                id: TensorId::new(),
                storage: Arc::new(RwLock::new(data)),
                shape,
                op,
                is_variable: false,
                requires_grad,
            }),
        }
    }

    fn checked(data: Vec<f32>, shape: Shape) -> Result<Self> {
        if data.len() != shape.elem_count() {
            return Err(Error::ElementCountMismatch {
                expected: shape.elem_count(),
                got: data.len(),
                shape,
            });
        }
        Ok(Self::from_op(data, shape, Op::None))
    }

    /// Read lock on the buffer, returning an error instead of panicking.
    pub(crate) fn data(&self) -> Result<RwLockReadGuard<'_, Vec<f32>>> {
        self.inner
            .storage
            .read()
            .map_err(|_| Error::msg("storage lock poisoned"))
    }

    // Accessors

    /// Unique tensor ID.
    pub fn id(&self) -> TensorId {
        self.inner.id
    }

    pub fn shape(&self) -> &Shape {
        &self.inner.shape
    }

    /// The dimensions as a slice (shortcut for shape().dims()).
    pub fn dims(&self) -> &[usize] {
        self.inner.shape.dims()
    }

    pub fn rank(&self) -> usize {
        self.inner.shape.rank()
    }

    pub fn elem_count(&self) -> usize {
        self.inner.shape.elem_count()
    }

    /// Whether this tensor is a trainable variable.
    pub fn is_variable(&self) -> bool {
        self.inner.is_variable
    }

    /// Whether gradients flow through this tensor.
    pub fn requires_grad(&self) -> bool {
        self.inner.requires_grad
    }

    /// The op that created this tensor.
    pub fn op(&self) -> &Op {
        &self.inner.op
    }

    // Creation

    /// Create a tensor from a flat buffer. The length must match the shape.
    pub fn from_vec(data: Vec<f32>, shape: impl Into<Shape>) -> Result<Self> {
        Self::checked(data, shape.into())
    }

    pub fn from_slice(data: &[f32], shape: impl Into<Shape>) -> Result<Self> {
        Self::checked(data.to_vec(), shape.into())
    }

    pub fn zeros(shape: impl Into<Shape>) -> Self {
        Self::full(shape, 0.0)
    }

    pub fn ones(shape: impl Into<Shape>) -> Self {
        Self::full(shape, 1.0)
    }

    /// Create a tensor with every element set to `val`.
    pub fn full(shape: impl Into<Shape>, val: f32) -> Self {
        let shape = shape.into();
        Self::from_op(vec![val; shape.elem_count()], shape, Op::None)
    }

    /// Samples from N(mean, std).
    pub fn randn<R: Rng + ?Sized>(
        shape: impl Into<Shape>,
        mean: f32,
        std: f32,
        rng: &mut R,
    ) -> Result<Self> {
        let shape = shape.into();
        let dist = Normal::new(mean, std)
            .map_err(|e| Error::msg(format!("invalid normal distribution: {e}")))?;
        let data = (0..shape.elem_count()).map(|_| dist.sample(rng)).collect();
        Ok(Self::from_op(data, shape, Op::None))
    }

    /// Samples from U(low, high).
    pub fn rand_uniform<R: Rng + ?Sized>(
        shape: impl Into<Shape>,
        low: f32,
        high: f32,
        rng: &mut R,
    ) -> Result<Self> {
        let shape = shape.into();
        if !(low < high) {
            return Err(Error::msg(format!(
                "rand_uniform: empty range [{low}, {high})"
            )));
        }
        let dist = Uniform::new(low, high);
        let data = (0..shape.elem_count()).map(|_| dist.sample(rng)).collect();
        Ok(Self::from_op(data, shape, Op::None))
    }

    /// Mark this tensor as a trainable variable. Keeps the same id and storage.
    pub fn set_variable(self) -> Self {
        Tensor {
            inner: Arc::new(TensorInner {
                id: self.inner.id,
                storage: Arc::clone(&self.inner.storage),
                shape: self.inner.shape.clone(),
                op: Op::None,
                is_variable: true,
                requires_grad: true,
            }),
        }
    }

    /// A constant view of the same storage, cut off from the graph.
    pub fn detach(&self) -> Self {
        Tensor {
            inner: Arc::new(TensorInner {
                id: TensorId::new(),
                storage: Arc::clone(&self.inner.storage),
                shape: self.inner.shape.clone(),
                op: Op::None,
                is_variable: false,
                requires_grad: false,
            }),
        }
    }

    // Reading and writing data

    /// Copy the data out as a flat vector.
    pub fn to_vec(&self) -> Result<Vec<f32>> {
        Ok(self.data()?.clone())
    }

    /// Read a single-element tensor.
    pub fn to_scalar(&self) -> Result<f32> {
        if self.elem_count() != 1 {
            return Err(Error::NotAScalar {
                shape: self.shape().clone(),
            });
        }
        Ok(self.data()?[0])
    }

    /// Overwrite the buffer in place. Every tensor sharing this storage
    /// (layers, optimizers) sees the new values.
    pub fn update_data_inplace(&self, new_data: &[f32]) -> Result<()> {
        if new_data.len() != self.elem_count() {
            return Err(Error::ElementCountMismatch {
                shape: self.shape().clone(),
                expected: self.elem_count(),
                got: new_data.len(),
            });
        }
        let mut guard = self
            .inner
            .storage
            .write()
            .map_err(|_| Error::msg("storage lock poisoned"))?;
        guard.copy_from_slice(new_data);
        Ok(())
    }

    // Element-wise ops

    /// Element-wise sum. Shapes must match exactly.
    pub fn add(&self, rhs: &Self) -> Result<Self> {
        if self.shape() != rhs.shape() {
            return Err(Error::ShapeMismatch {
                op: "add",
                expected: self.shape().clone(),
                got: rhs.shape().clone(),
            });
        }
        let data: Vec<f32> = {
            let a = self.data()?;
            let b = rhs.data()?;
            a.iter().zip(b.iter()).map(|(x, y)| x + y).collect()
        };
        Ok(Self::from_op(
            data,
            self.shape().clone(),
            Op::Add {
                lhs: self.clone(),
                rhs: rhs.clone(),
            },
        ))
    }

    /// result = self * mul + add
    pub fn affine(&self, mul: f32, add: f32) -> Result<Self> {
        let data = self.data()?.iter().map(|x| x * mul + add).collect();
        Ok(Self::from_op(
            data,
            self.shape().clone(),
            Op::Affine {
                input: self.clone(),
                mul,
            },
        ))
    }

    /// Leaky rectification: `x if x >= 0 else alpha * x`.
    pub fn leaky_relu(&self, alpha: f32) -> Result<Self> {
        let data = self
            .data()?
            .iter()
            .map(|&x| if x < 0.0 { alpha * x } else { x })
            .collect();
        Ok(Self::from_op(
            data,
            self.shape().clone(),
            Op::LeakyRelu {
                input: self.clone(),
                alpha,
            },
        ))
    }

    /// Add a `[C]` bias to every position of a `[..., C]` tensor.
    pub fn add_channel(&self, bias: &Self) -> Result<Self> {
        let c = self.shape().channels()?;
        if bias.dims() != [c] {
            return Err(Error::ShapeMismatch {
                op: "add_channel",
                expected: Shape::from(c),
                got: bias.shape().clone(),
            });
        }
        let data: Vec<f32> = {
            let x = self.data()?;
            let b = bias.data()?;
            x.chunks(c)
                .flat_map(|row| row.iter().zip(b.iter()).map(|(v, bv)| v + bv))
                .collect()
        };
        Ok(Self::from_op(
            data,
            self.shape().clone(),
            Op::AddChannel {
                input: self.clone(),
                bias: bias.clone(),
            },
        ))
    }

    /// `x * scale[c] + shift[c]` with constant per-channel vectors.
    pub fn scale_shift_channel(&self, scale: &[f32], shift: &[f32]) -> Result<Self> {
        let c = self.shape().channels()?;
        if scale.len() != c || shift.len() != c {
            return Err(Error::msg(format!(
                "scale_shift_channel: expected {c} channels, got scale {} / shift {}",
                scale.len(),
                shift.len()
            )));
        }
        let data = self
            .data()?
            .chunks(c)
            .flat_map(|row| {
                row.iter()
                    .zip(scale.iter().zip(shift))
                    .map(|(v, (s, t))| v * s + t)
            })
            .collect();
        Ok(Self::from_op(
            data,
            self.shape().clone(),
            Op::ScaleChannel {
                input: self.clone(),
                scale: scale.to_vec(),
            },
        ))
    }

    // Normalization

    /// Normalize each channel with the statistics of this batch.
    ///
    /// Moments are taken over every axis but the last (N, H, W for NHWC).
    /// The variance is the biased (population) estimate. Returns the
    /// normalized tensor `(x - mean) / sqrt(var + eps)` and the moments.
    pub fn batch_norm_train(&self, eps: f32) -> Result<(Self, BatchMoments)> {
        let c = self.shape().channels()?;
        let count = self.elem_count() / c.max(1);
        if c == 0 || count == 0 {
            return Err(Error::msg(format!(
                "batch_norm: cannot normalize empty tensor {}",
                self.shape()
            )));
        }

        let (x_hat, mean, variance, inv_std) = {
            let x = self.data()?;
            let mut mean = vec![0.0f32; c];
            for row in x.chunks(c) {
                for (m, v) in mean.iter_mut().zip(row) {
                    *m += v;
                }
            }
            mean.iter_mut().for_each(|m| *m /= count as f32);

            let mut variance = vec![0.0f32; c];
            for row in x.chunks(c) {
                for ((s, v), m) in variance.iter_mut().zip(row).zip(&mean) {
                    let d = v - m;
                    *s += d * d;
                }
            }
            variance.iter_mut().for_each(|s| *s /= count as f32);

            let inv_std: Vec<f32> = variance.iter().map(|v| 1.0 / (v + eps).sqrt()).collect();
            let x_hat: Vec<f32> = x
                .chunks(c)
                .flat_map(|row| {
                    row.iter()
                        .zip(mean.iter().zip(&inv_std))
                        .map(|(v, (m, s))| (v - m) * s)
                })
                .collect();
            (x_hat, mean, variance, inv_std)
        };

        let out = Self::from_op(
            x_hat.clone(),
            self.shape().clone(),
            Op::BatchNorm {
                input: self.clone(),
                x_hat,
                inv_std,
            },
        );
        Ok((out, BatchMoments { mean, variance }))
    }

    // Convolution and pooling

    /// 2D convolution over NHWC input with SAME padding and no bias.
    ///
    /// - `self`:   `[N, H, W, C_in]`
    /// - `weight`: `[kH, kW, C_in, C_out]`
    ///
    /// Returns `[N, ceil(H/s), ceil(W/s), C_out]`.
    pub fn conv2d_same(&self, weight: &Self, stride: usize) -> Result<Self> {
        let (n, h, w, c_in) = self.shape().nhwc("conv2d")?;
        let (kh, kw, wc_in, c_out) = weight.shape().nhwc("conv2d weight")?;
        if c_in != wc_in {
            return Err(Error::msg(format!(
                "conv2d: input channels {c_in} != weight channels {wc_in}"
            )));
        }
        if stride == 0 || n == 0 || h == 0 || w == 0 || c_in == 0 || c_out == 0 {
            return Err(Error::msg(format!(
                "conv2d: degenerate geometry input {} weight {} stride {stride}",
                self.shape(),
                weight.shape()
            )));
        }
        let (h_out, pad_h) = kernels::same_padding(h, kh, stride);
        let (w_out, pad_w) = kernels::same_padding(w, kw, stride);
        let geom = Window {
            h,
            w,
            c: c_in,
            kh,
            kw,
            stride,
            pad_h,
            pad_w,
            h_out,
            w_out,
        };

        let data = {
            let x = self.data()?;
            let k = weight.data()?;
            kernels::conv2d_forward(&x, &k, n, c_out, &geom)
        };
        Ok(Self::from_op(
            data,
            Shape::from((n, h_out, w_out, c_out)),
            Op::Conv2d {
                input: self.clone(),
                weight: weight.clone(),
                stride,
                padding: [pad_h, pad_w],
            },
        ))
    }

    /// Average pooling with window == stride == `window` and SAME geometry.
    ///
    /// Windows hanging over the edge average only their in-bounds cells, so
    /// the output is `[N, ceil(H/window), ceil(W/window), C]`.
    pub fn avg_pool2d_same(&self, window: usize) -> Result<Self> {
        let (n, h, w, c) = self.shape().nhwc("avg_pool2d")?;
        if window == 0 {
            return Err(Error::msg("avg_pool2d: window must be positive"));
        }
        let (h_out, pad_h) = kernels::same_padding(h, window, window);
        let (w_out, pad_w) = kernels::same_padding(w, window, window);
        let geom = Window {
            h,
            w,
            c,
            kh: window,
            kw: window,
            stride: window,
            pad_h,
            pad_w,
            h_out,
            w_out,
        };
        let data = kernels::avg_pool_forward(&self.data()?, n, &geom);
        Ok(Self::from_op(
            data,
            Shape::from((n, h_out, w_out, c)),
            Op::AvgPool2d {
                input: self.clone(),
                window,
                padding: [pad_h, pad_w],
            },
        ))
    }

    /// Mean over the spatial axes: `[N, H, W, C] -> [N, C]`.
    pub fn mean_spatial(&self) -> Result<Self> {
        let (n, h, w, c) = self.shape().nhwc("mean_spatial")?;
        let hw = h * w;
        if hw == 0 {
            return Err(Error::msg("mean_spatial: empty spatial extent"));
        }
        let mut out = vec![0.0f32; n * c];
        {
            let x = self.data()?;
            for ni in 0..n {
                let dst = &mut out[ni * c..(ni + 1) * c];
                for row in x[ni * hw * c..(ni + 1) * hw * c].chunks(c) {
                    for (d, v) in dst.iter_mut().zip(row) {
                        *d += v;
                    }
                }
                dst.iter_mut().for_each(|d| *d /= hw as f32);
            }
        }
        Ok(Self::from_op(
            out,
            Shape::from((n, c)),
            Op::MeanSpatial {
                input: self.clone(),
            },
        ))
    }

    // Shape manipulation (all copy into fresh contiguous storage)

    /// Zero-pad the channel (last) axis.
    pub fn pad_channels(&self, before: usize, after: usize) -> Result<Self> {
        let c = self.shape().channels()?;
        let c_new = c + before + after;
        let mut dims = self.dims().to_vec();
        if let Some(last) = dims.last_mut() {
            *last = c_new;
        }
        let mut out = vec![0.0f32; self.elem_count() / c.max(1) * c_new];
        if c > 0 {
            let x = self.data()?;
            for (row, dst) in x.chunks(c).zip(out.chunks_mut(c_new)) {
                dst[before..before + c].copy_from_slice(row);
            }
        }
        Ok(Self::from_op(
            out,
            Shape::new(dims),
            Op::PadChannels {
                input: self.clone(),
                before,
                after,
            },
        ))
    }

    /// Slice `len` entries of `dim` starting at `start`.
    pub fn narrow(&self, dim: usize, start: usize, len: usize) -> Result<Self> {
        let (outer, inner) = self.shape().outer_inner(dim)?;
        let size = self.dims()[dim];
        if start + len > size {
            return Err(Error::NarrowOutOfBounds {
                dim,
                start,
                len,
                dim_size: size,
            });
        }
        let data = kernels::narrow_copy(&self.data()?, outer, size, inner, start, len);
        let mut dims = self.dims().to_vec();
        dims[dim] = len;
        Ok(Self::from_op(
            data,
            Shape::new(dims),
            Op::Narrow {
                input: self.clone(),
                dim,
                start,
                len,
            },
        ))
    }

    /// Split into `n` equal parts along `dim`. Fails if `dim` is not divisible.
    pub fn chunk(&self, n: usize, dim: usize) -> Result<Vec<Self>> {
        let size = self.shape().dim(dim)?;
        if n == 0 || size % n != 0 {
            return Err(Error::msg(format!(
                "chunk: dim {dim} of size {size} cannot be split into {n} equal parts"
            )));
        }
        let part = size / n;
        (0..n).map(|i| self.narrow(dim, i * part, part)).collect()
    }

    /// Concatenate tensors along `dim`. All other dimensions must agree.
    pub fn cat(tensors: &[Self], dim: usize) -> Result<Self> {
        let first = tensors
            .first()
            .ok_or_else(|| Error::msg("cat: empty tensor list"))?;
        let (outer, inner) = first.shape().outer_inner(dim)?;
        let mut sizes = Vec::with_capacity(tensors.len());
        for t in tensors {
            let same_rank = t.rank() == first.rank();
            let same_other = same_rank
                && t.dims()
                    .iter()
                    .zip(first.dims())
                    .enumerate()
                    .all(|(i, (a, b))| i == dim || a == b);
            if !same_other {
                return Err(Error::ShapeMismatch {
                    op: "cat",
                    expected: first.shape().clone(),
                    got: t.shape().clone(),
                });
            }
            sizes.push(t.dims()[dim]);
        }
        let total: usize = sizes.iter().sum();

        let mut out = Vec::with_capacity(outer * total * inner);
        let guards = tensors
            .iter()
            .map(|t| t.data())
            .collect::<Result<Vec<_>>>()?;
        for o in 0..outer {
            for (g, &size) in guards.iter().zip(&sizes) {
                out.extend_from_slice(&g[o * size * inner..(o + 1) * size * inner]);
            }
        }
        drop(guards);

        let mut dims = first.dims().to_vec();
        dims[dim] = total;
        Ok(Self::from_op(
            out,
            Shape::new(dims),
            Op::Cat {
                inputs: tensors.to_vec(),
                dim,
                sizes,
            },
        ))
    }

    /// Reshape to a shape with the same element count.
    pub fn reshape(&self, new_shape: impl Into<Shape>) -> Result<Self> {
        let new_shape = new_shape.into();
        if new_shape.elem_count() != self.elem_count() {
            return Err(Error::ShapeMismatch {
                op: "reshape",
                expected: self.shape().clone(),
                got: new_shape,
            });
        }
        Ok(Self::from_op(
            self.to_vec()?,
            new_shape,
            Op::Reshape {
                input: self.clone(),
                src_shape: self.shape().clone(),
            },
        ))
    }

    /// Collapse everything after the batch axis: `[N, ...] -> [N, rest]`.
    pub fn flatten(&self) -> Result<Self> {
        let n = self.shape().dim(0)?;
        let rest = if n == 0 { 0 } else { self.elem_count() / n };
        self.reshape((n, rest))
    }

    // Linear algebra and reductions

    /// 2D matrix multiply: `[m, k] @ [k, n] -> [m, n]`.
    pub fn matmul(&self, rhs: &Self) -> Result<Self> {
        let (m, k) = match self.dims() {
            &[m, k] => (m, k),
            _ => {
                return Err(Error::RankMismatch {
                    op: "matmul",
                    expected: 2,
                    got: self.rank(),
                })
            }
        };
        let (k2, n) = match rhs.dims() {
            &[k2, n] => (k2, n),
            _ => {
                return Err(Error::RankMismatch {
                    op: "matmul",
                    expected: 2,
                    got: rhs.rank(),
                })
            }
        };
        if k != k2 {
            return Err(Error::msg(format!(
                "matmul shape mismatch: [{m}x{k}] @ [{k2}x{n}]"
            )));
        }
        let mut out = vec![0.0f32; m * n];
        kernels::gemm(&self.data()?, &rhs.data()?, &mut out, m, n, k);
        Ok(Self::from_op(
            out,
            Shape::from((m, n)),
            Op::Matmul {
                lhs: self.clone(),
                rhs: rhs.clone(),
            },
        ))
    }

    /// Mean of every element, as a scalar tensor.
    pub fn mean_all(&self) -> Result<Self> {
        let n = self.elem_count();
        if n == 0 {
            return Err(Error::msg("mean_all: empty tensor"));
        }
        let sum: f32 = self.data()?.iter().sum();
        Ok(Self::from_op(
            vec![sum / n as f32],
            Shape::from(()),
            Op::MeanAll {
                input: self.clone(),
            },
        ))
    }

    /// Sum of squared elements, as a scalar tensor.
    pub fn sum_squares(&self) -> Result<Self> {
        let sum: f32 = self.data()?.iter().map(|x| x * x).sum();
        Ok(Self::from_op(
            vec![sum],
            Shape::from(()),
            Op::SumSquares {
                input: self.clone(),
            },
        ))
    }

    // Softmax family

    /// Row-wise softmax of a `[batch, classes]` tensor. Not differentiable:
    /// the result is a constant used for reporting predictions.
    pub fn softmax(&self) -> Result<Self> {
        let (_, k) = self.rows_cols("softmax")?;
        let data = softmax_rows(&self.data()?, k);
        Ok(Self::from_op(data, self.shape().clone(), Op::None))
    }

    /// Per-example softmax cross-entropy: `-Σ_k labels[b,k] · log softmax(logits)[b,k]`.
    ///
    /// `self` holds logits `[batch, classes]`; returns `[batch]`.
    pub fn softmax_cross_entropy(&self, labels: &Self) -> Result<Self> {
        let (b, k) = self.rows_cols("softmax_cross_entropy")?;
        if labels.shape() != self.shape() {
            return Err(Error::ShapeMismatch {
                op: "softmax_cross_entropy",
                expected: self.shape().clone(),
                got: labels.shape().clone(),
            });
        }
        let (losses, probs) = {
            let logits = self.data()?;
            let y = labels.data()?;
            let mut losses = Vec::with_capacity(b);
            for (row, target) in logits.chunks(k).zip(y.chunks(k)) {
                let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let lse = max + row.iter().map(|v| (v - max).exp()).sum::<f32>().ln();
                let loss: f32 = row.iter().zip(target).map(|(v, t)| -t * (v - lse)).sum();
                losses.push(loss);
            }
            (losses, softmax_rows(&logits, k))
        };
        Ok(Self::from_op(
            losses,
            Shape::from(b),
            Op::SoftmaxXent {
                logits: self.clone(),
                labels: labels.clone(),
                probs,
            },
        ))
    }

    fn rows_cols(&self, op: &'static str) -> Result<(usize, usize)> {
        match self.dims() {
            &[b, k] if k > 0 => Ok((b, k)),
            &[_, _] => Err(Error::msg(format!("{op}: zero classes"))),
            _ => Err(Error::RankMismatch {
                op,
                expected: 2,
                got: self.rank(),
            }),
        }
    }

    // Autograd

    /// Gradients of this scalar with respect to every variable that feeds it.
    pub fn backward(&self) -> Result<crate::backprop::GradStore> {
        crate::backprop::backward(self)
    }
}

/// Numerically stable softmax over rows of width `k`.
pub(crate) fn softmax_rows(data: &[f32], k: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(data.len());
    for row in data.chunks(k) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = row.iter().map(|v| (v - max).exp()).collect();
        let sum: f32 = exps.iter().sum();
        out.extend(exps.into_iter().map(|e| e / sum));
    }
    out
}
