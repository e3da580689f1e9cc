// Op - Computational graph node for automatic differentiation
//
// Every tensor produced by a differentiable operation records HOW it was
// created. The recorded inputs are Arc-backed tensor handles, so the graph
// keeps exactly the values backward() needs alive, and dropping the loss
// drops the whole graph.
//
// Only operations whose inputs require a gradient keep their Op; everything
// computed purely from constants (images, labels, running statistics) is
// recorded as Op::None so it never enters the backward walk.
//
// Several variants carry data saved during the forward pass (normalized
// activations, softmax probabilities) so backward does not recompute them.

use crate::shape::Shape;
use crate::tensor::Tensor;

/// Unique identifier for a tensor. Used as keys in GradStore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorId(pub(crate) u64);

impl Default for TensorId {
    fn default() -> Self {
        Self::new()
    }
}

impl TensorId {
    /// Generate a new unique tensor ID (global atomic counter).
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        TensorId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Records the operation that produced a tensor, storing references to inputs.
pub enum Op {
    /// Leaf tensor: input data, constant, or trainable parameter.
    None,

    /// Element-wise sum of two same-shaped tensors.
    Add { lhs: Tensor, rhs: Tensor },

    /// result = input * mul + add (the additive term has no gradient)
    Affine { input: Tensor, mul: f32 },

    /// result = x if x >= 0 else alpha * x
    LeakyRelu { input: Tensor, alpha: f32 },

    /// Per-channel bias broadcast over every leading position.
    /// bias: [C], input: [..., C]
    AddChannel { input: Tensor, bias: Tensor },

    /// Per-channel constant scale (no gradient to the scale).
    ScaleChannel { input: Tensor, scale: Vec<f32> },

    /// Batch normalization with batch statistics over every axis but the last.
    /// `x_hat` is the normalized output, `inv_std` holds 1/sqrt(var + eps) per channel.
    BatchNorm {
        input: Tensor,
        x_hat: Vec<f32>,
        inv_std: Vec<f32>,
    },

    /// NHWC convolution with SAME padding.
    /// input: [N, H, W, C_in], weight: [kH, kW, C_in, C_out]
    Conv2d {
        input: Tensor,
        weight: Tensor,
        stride: usize,
        padding: [usize; 2],
    },

    /// NHWC average pooling (window == stride) averaging in-bounds cells only.
    AvgPool2d {
        input: Tensor,
        window: usize,
        padding: [usize; 2],
    },

    /// Zero padding of the channel axis.
    PadChannels {
        input: Tensor,
        before: usize,
        after: usize,
    },

    /// Slice along a dimension.
    Narrow {
        input: Tensor,
        dim: usize,
        start: usize,
        len: usize,
    },

    /// Concatenation along a dimension; `sizes` holds each input's extent.
    Cat {
        inputs: Vec<Tensor>,
        dim: usize,
        sizes: Vec<usize>,
    },

    /// Mean over H and W: [N, H, W, C] -> [N, C]
    MeanSpatial { input: Tensor },

    /// 2D matrix multiply: [m, k] @ [k, n]
    Matmul { lhs: Tensor, rhs: Tensor },

    /// Same data, different shape.
    Reshape { input: Tensor, src_shape: Shape },

    /// Per-example softmax cross-entropy; labels are treated as constants.
    SoftmaxXent {
        logits: Tensor,
        labels: Tensor,
        probs: Vec<f32>,
    },

    /// Mean of all elements -> scalar.
    MeanAll { input: Tensor },

    /// Sum of squared elements -> scalar.
    SumSquares { input: Tensor },
}

impl Op {
    /// The input tensors of this op (empty for leaves).
    pub fn inputs(&self) -> Vec<&Tensor> {
        match self {
            Op::None => vec![],
            Op::Add { lhs, rhs } | Op::Matmul { lhs, rhs } => vec![lhs, rhs],
            Op::AddChannel { input, bias } => vec![input, bias],
            Op::Conv2d { input, weight, .. } => vec![input, weight],
            Op::SoftmaxXent { logits, labels, .. } => vec![logits, labels],
            Op::Cat { inputs, .. } => inputs.iter().collect(),
            Op::Affine { input, .. }
            | Op::LeakyRelu { input, .. }
            | Op::ScaleChannel { input, .. }
            | Op::BatchNorm { input, .. }
            | Op::AvgPool2d { input, .. }
            | Op::PadChannels { input, .. }
            | Op::Narrow { input, .. }
            | Op::MeanSpatial { input }
            | Op::Reshape { input, .. }
            | Op::MeanAll { input }
            | Op::SumSquares { input } => vec![input],
        }
    }

    /// Short name for logging and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Op::None => "none",
            Op::Add { .. } => "add",
            Op::Affine { .. } => "affine",
            Op::LeakyRelu { .. } => "leaky_relu",
            Op::AddChannel { .. } => "add_channel",
            Op::ScaleChannel { .. } => "scale_channel",
            Op::BatchNorm { .. } => "batch_norm",
            Op::Conv2d { .. } => "conv2d",
            Op::AvgPool2d { .. } => "avg_pool2d",
            Op::PadChannels { .. } => "pad_channels",
            Op::Narrow { .. } => "narrow",
            Op::Cat { .. } => "cat",
            Op::MeanSpatial { .. } => "mean_spatial",
            Op::Matmul { .. } => "matmul",
            Op::Reshape { .. } => "reshape",
            Op::SoftmaxXent { .. } => "softmax_xent",
            Op::MeanAll { .. } => "mean_all",
            Op::SumSquares { .. } => "sum_squares",
        }
    }
}
