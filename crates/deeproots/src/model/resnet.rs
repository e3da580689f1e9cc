// ResNet - the branching residual network
//
// Construction creates every layer once for a fixed Mode:
//
//   init/init_conv   3×3 conv, 3 → init_filters
//   block1..blockN   the branching tree of stages
//   final, logit     the classification head
//
// build_graph() then runs one batch through the model and assembles
//
//   cost = mean softmax cross-entropy + weight_decay_rate · Σ ||weights||²
//
// and, for Train models, the TrainOp holding the gradients of the cost and
// the batch-norm updates gathered during that forward pass.
//
// eval_view() wraps the same parameter and statistic tensors in Eval-mode
// layers, so a model evaluates with what its training has learned.

use deeproots_core::Tensor;
use deeproots_nn::{l2_weight_decay, softmax_cross_entropy_loss, Conv2d, Mode, Module, UpdateOps};
use rand::RngCore;

use super::head::Head;
use super::tree::{BranchTree, TreeConfig};
use super::BuildContext;
use crate::error::{Error, Result};
use crate::hparams::HParams;
use crate::params::ParamCount;
use crate::summary::Summaries;
use crate::train::{StepReport, TrainOp, TrainState};

/// Image channels the initial convolution expects.
pub const IMAGE_CHANNELS: usize = 3;

/// Everything one call to [`ResNet::build_graph`] produces.
pub struct Graph {
    /// `[batch, num_classes]`
    pub logits: Tensor,
    /// Softmax of the logits, `[batch, num_classes]`.
    pub predictions: Tensor,
    /// Scalar cost including weight decay.
    pub cost: Tensor,
    /// Present only for models built in `Mode::Train`.
    pub train_op: Option<TrainOp>,
    pub param_count: ParamCount,
    pub summaries: Summaries,
}

pub struct ResNet {
    hps: HParams,
    tree_config: TreeConfig,
    mode: Mode,
    init_conv: Conv2d,
    body: BranchTree,
    head: Head,
    updates: UpdateOps,
    param_count: ParamCount,
    train: Option<TrainState>,
}

impl ResNet {
    /// Validate the configuration and create every layer.
    ///
    /// The same `hps`, `tree` and random stream always produce the same
    /// parameters, whatever the mode.
    pub fn new<R: RngCore>(hps: HParams, tree: TreeConfig, mode: Mode, rng: &mut R) -> Result<Self> {
        hps.validate()?;
        tree.validate()?;
        if hps.use_bottleneck {
            tracing::warn!("use_bottleneck is set but residual units have no bottleneck variant; ignoring");
        }

        let updates = UpdateOps::new();
        let mut ctx = BuildContext {
            mode,
            relu_leakiness: hps.relu_leakiness,
            updates: &updates,
            rng,
        };
        let init_conv = Conv2d::new("init/init_conv", IMAGE_CHANNELS, tree.init_filters, 1, &mut *ctx.rng)?;
        let body = BranchTree::new(&tree, hps.num_residual_units, &mut ctx)?;
        let head = Head::new(tree.concat_channels(), tree.head_filters, hps.num_classes, &mut ctx)?;

        let mut model = ResNet {
            hps,
            tree_config: tree,
            mode,
            init_conv,
            body,
            head,
            updates,
            param_count: ParamCount::default(),
            train: None,
        };
        let params = model.named_parameters();
        model.param_count = ParamCount::from_named(&params);
        model.param_count.log();

        if mode.is_training() {
            let optimizer = model
                .hps
                .optimizer
                .build(params.into_iter().map(|(_, t)| t).collect(), model.hps.lrn_rate)?;
            model.train = Some(TrainState::new(optimizer, model.hps.min_lrn_rate));
        }
        Ok(model)
    }

    /// An evaluation model over this model's parameters.
    ///
    /// Weights, offsets and running statistics are shared, not copied: the
    /// view sees every later training step, and its batch norms normalize
    /// with the moving averages training maintains. The view never trains
    /// and queues no updates.
    pub fn eval_view(&self) -> ResNet {
        let updates = UpdateOps::new();
        ResNet {
            hps: self.hps.clone(),
            tree_config: self.tree_config.clone(),
            mode: Mode::Eval,
            init_conv: self.init_conv.clone(),
            body: self.body.with_mode(Mode::Eval, &updates),
            head: self.head.with_mode(Mode::Eval, &updates),
            updates,
            param_count: self.param_count.clone(),
            train: None,
        }
    }

    pub fn hps(&self) -> &HParams {
        &self.hps
    }
    pub fn tree_config(&self) -> &TreeConfig {
        &self.tree_config
    }
    pub fn mode(&self) -> Mode {
        self.mode
    }
    pub fn body(&self) -> &BranchTree {
        &self.body
    }
    pub fn head(&self) -> &Head {
        &self.head
    }

    /// Batch-norm updates queued and not yet bundled into a step.
    pub fn pending_updates(&self) -> Result<usize> {
        Ok(self.updates.len()?)
    }
    pub fn param_count(&self) -> &ParamCount {
        &self.param_count
    }

    /// Steps run so far (always 0 for eval models).
    pub fn global_step(&self) -> u64 {
        self.train.as_ref().map_or(0, |t| t.global_step())
    }

    /// Current learning rate, `None` for eval models.
    pub fn learning_rate(&self) -> Option<f32> {
        self.train.as_ref().map(|t| t.learning_rate())
    }

    /// Change the learning rate, clamped to `min_lrn_rate` from below.
    pub fn set_learning_rate(&mut self, lr: f32) -> Result<f32> {
        let state = self.train_state()?;
        Ok(state.set_learning_rate(lr))
    }

    fn train_state(&mut self) -> Result<&mut TrainState> {
        self.train
            .as_mut()
            .ok_or_else(|| Error::config("model was built for evaluation and cannot train"))
    }

    fn check_images(&self, images: &Tensor) -> Result<()> {
        let (n, h, w, c) = images.shape().nhwc("images")?;
        if c != IMAGE_CHANNELS {
            return Err(Error::input(format!(
                "images must have {IMAGE_CHANNELS} channels, got shape {}",
                images.shape()
            )));
        }
        if n != self.hps.batch_size {
            return Err(Error::input(format!(
                "batch of {n} images does not match batch_size {}",
                self.hps.batch_size
            )));
        }
        if h == 0 || w == 0 {
            return Err(Error::input(format!("empty images of shape {}", images.shape())));
        }
        Ok(())
    }

    fn check_labels(&self, labels: &Tensor) -> Result<()> {
        let expected = [self.hps.batch_size, self.hps.num_classes];
        if labels.dims() != expected {
            return Err(Error::input(format!(
                "labels must have shape [{}, {}], got {}",
                expected[0],
                expected[1],
                labels.shape()
            )));
        }
        Ok(())
    }

    /// Logits `[batch, num_classes]` for a batch of images.
    ///
    /// A Train model normalizes with batch statistics here but keeps none
    /// of the moving-average updates: only `build_graph` bundles them into
    /// a step.
    pub fn forward(&self, images: &Tensor) -> Result<Tensor> {
        self.check_images(images)?;
        let logits = Module::forward(self, images);
        self.updates.clear()?;
        Ok(logits?)
    }

    /// Run one batch through the model and assemble cost, predictions and,
    /// in train mode, the training op.
    pub fn build_graph(&self, images: &Tensor, labels: &Tensor) -> Result<Graph> {
        self.check_images(images)?;
        self.check_labels(labels)?;
        self.updates.clear()?;

        let logits = Module::forward(self, images)?;
        let predictions = logits.softmax()?;
        let xent = softmax_cross_entropy_loss(&logits, labels)?;
        let decay = l2_weight_decay(&self.named_parameters(), self.hps.weight_decay_rate)?;
        let cost = xent.add(&decay)?;
        let cost_value = cost.to_scalar()?;

        let step = self.global_step();
        let mut summaries = Summaries::new(self.mode);
        summaries.scalar("cost", cost_value, step);

        let train_op = match &self.train {
            Some(state) => {
                summaries.scalar("learning rate", state.learning_rate(), step);
                let grads = cost.backward()?;
                let updates = self.updates.drain()?;
                Some(TrainOp::new(grads, updates, cost_value))
            }
            None => None,
        };

        Ok(Graph {
            logits,
            predictions,
            cost,
            train_op,
            param_count: self.param_count.clone(),
            summaries,
        })
    }

    /// Apply a training op built by this model.
    pub fn run_train_op(&mut self, op: TrainOp) -> Result<StepReport> {
        self.train_state()?.apply(op)
    }

    /// Build the graph for one batch and run its training op.
    pub fn train_step(&mut self, images: &Tensor, labels: &Tensor) -> Result<StepReport> {
        if self.train.is_none() {
            return Err(Error::config("model was built for evaluation and cannot train"));
        }
        let graph = self.build_graph(images, labels)?;
        let op = graph
            .train_op
            .ok_or_else(|| Error::config("train graph has no training op"))?;
        self.run_train_op(op)
    }
}

impl Module for ResNet {
    fn forward(&self, images: &Tensor) -> deeproots_core::Result<Tensor> {
        tracing::info!(shape = %images.shape(), "Image Shape");
        let x = self.init_conv.forward(images)?;
        tracing::info!(shape = %x.shape(), "Initial Output");
        let x = self.body.forward(&x)?;
        self.head.forward(&x)
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        let mut params = self.init_conv.named_parameters();
        params.extend(self.body.named_parameters());
        params.extend(self.head.named_parameters());
        params
    }
}
