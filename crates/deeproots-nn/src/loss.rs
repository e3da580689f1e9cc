// Loss functions
//
//   softmax_cross_entropy_loss(logits, labels)
//     mean over the batch of  -Σ_k labels[b,k] · log softmax(logits)[b,k]
//
//   l2_weight_decay(params, rate)
//     rate · Σ ||w||²  over the parameters whose scoped name contains
//     "weights" (convolution kernels and fully connected weights; batch-norm
//     offsets and biases are not decayed)

use deeproots_core::{Result, Tensor};

/// Mean softmax cross-entropy of `[batch, classes]` logits against one-hot
/// (or any probability-distribution) labels of the same shape.
pub fn softmax_cross_entropy_loss(logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
    logits.softmax_cross_entropy(labels)?.mean_all()
}

/// Weight-decay penalty over every parameter named like `.../weights`.
///
/// Returns a scalar. With no matching parameter the penalty is a constant 0.
pub fn l2_weight_decay(params: &[(String, Tensor)], rate: f32) -> Result<Tensor> {
    let mut total: Option<Tensor> = None;
    for (_, w) in params.iter().filter(|(name, _)| name.contains("weights")) {
        let sq = w.sum_squares()?;
        total = Some(match total {
            Some(acc) => acc.add(&sq)?,
            None => sq,
        });
    }
    match total {
        Some(t) => t.affine(rate, 0.0),
        None => Ok(Tensor::zeros(())),
    }
}
