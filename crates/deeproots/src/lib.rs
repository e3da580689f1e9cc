//! # deeproots
//!
//! A branching residual network for image classification.
//!
//! The body recursively splits the feature channels into two halves per
//! level, runs an independent residual stage on every branch, and
//! concatenates the leaves before a convolution + pooling + fully connected
//! head. Training minimizes softmax cross-entropy plus L2 weight decay with
//! plain or momentum gradient descent.
//!
//! ## Usage
//!
//! ```ignore
//! use deeproots::{build, HParams, Mode};
//!
//! let hps = HParams { batch_size: 8, ..HParams::default() };
//! let (mut model, graph) = build(hps, &images, &labels, Mode::Train, 42)?;
//! println!("cost {}", graph.cost.to_scalar()?);
//! model.run_train_op(graph.train_op.expect("train mode"))?;
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|---------|
//! | `deeproots-core` | Tensor, Shape, autograd, CPU kernels |
//! | `deeproots-nn` | Conv2d, BatchNorm2d, LeakyReLU, Linear, losses |
//! | `deeproots-optim` | SGD with optional momentum |

pub mod error;
pub mod hparams;
pub mod model;
pub mod params;
pub mod summary;
pub mod train;

pub use deeproots_core::{GradStore, Shape, Tensor};
pub use error::{Error, Result};
pub use hparams::HParams;
pub use model::head::Head;
pub use model::residual::ResidualUnit;
pub use model::resnet::{Graph, ResNet};
pub use model::stage::Stage;
pub use model::tree::{Branch, BranchNode, BranchTree, Level, TreeConfig};
pub use params::ParamCount;
pub use summary::{ScalarSummary, Summaries};
pub use train::{StepReport, TrainOp};

/// Re-export neural network layers.
pub mod nn {
    pub use deeproots_nn::*;
}

/// Re-export optimizers.
pub mod optim {
    pub use deeproots_optim::*;
}

pub use deeproots_nn::Mode;
pub use deeproots_optim::OptimizerKind;

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Build the default architecture for `hps` and assemble the graph for one
/// batch.
///
/// Parameters are initialized from `seed`, so the same seed and
/// hyperparameters always give the same model.
pub fn build(
    hps: HParams,
    images: &Tensor,
    labels: &Tensor,
    mode: Mode,
    seed: u64,
) -> Result<(ResNet, Graph)> {
    build_with_tree(hps, TreeConfig::default(), images, labels, mode, seed)
}

/// [`build`] with a custom split tree.
pub fn build_with_tree(
    hps: HParams,
    tree: TreeConfig,
    images: &Tensor,
    labels: &Tensor,
    mode: Mode,
    seed: u64,
) -> Result<(ResNet, Graph)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let model = ResNet::new(hps, tree, mode, &mut rng)?;
    let graph = model.build_graph(images, labels)?;
    Ok((model, graph))
}
