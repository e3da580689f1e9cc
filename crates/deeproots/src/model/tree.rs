// Branching network body
//
// The feature tensor is split in two equal halves along channels, and each
// half runs through its own stage. Every branch output is split again at the
// next level, so `levels.len()` levels give 2^levels independent leaves:
//
//                     init (16 ch)
//                 /                 \
//             A (8→8)              B (8→8)            block1, stride 1
//            /      \             /      \
//       AA (4→8)  AB (4→8)   BA (4→8)  BB (4→8)       block2, stride 2
//        / \        / \        / \       / \
//      AAA AAB    ABA ABB    BAA BAB   BBA BBB        block3, stride 2
//
// Branches never share parameters. Leaf outputs are concatenated along
// channels in lexicographic order (AAA, AAB, …, BBB).
//
// The tree is built once from a TreeConfig as an explicit recursive
// structure. The configuration is checked first, so an odd channel count at
// any split fails before a single parameter is created.

use deeproots_core::Tensor;
use deeproots_nn::{Mode, Module, UpdateOps};
use serde::{Deserialize, Serialize};

use super::stage::Stage;
use super::BuildContext;
use crate::error::{Error, Result};

/// One split level: the stage every branch of this level runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub out_filter: usize,
    /// Stride of the first residual unit of each stage.
    pub stride: usize,
}

impl Level {
    pub const fn new(out_filter: usize, stride: usize) -> Self {
        Level { out_filter, stride }
    }
}

/// Deepest tree `TreeConfig::validate` accepts.
pub const MAX_LEVELS: usize = 16;

/// Architecture constants of the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TreeConfig {
    /// Channels produced by the initial convolution.
    pub init_filters: usize,
    /// One entry per binary split level, outermost first.
    pub levels: Vec<Level>,
    /// Channels produced by the head's unify convolution.
    pub head_filters: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        TreeConfig {
            init_filters: 16,
            levels: vec![Level::new(8, 1), Level::new(8, 2), Level::new(8, 2)],
            head_filters: 40,
        }
    }
}

impl TreeConfig {
    /// Check sizes and walk the channel flow, requiring an even channel
    /// count at every split.
    pub fn validate(&self) -> Result<()> {
        if self.init_filters == 0 || self.head_filters == 0 {
            return Err(Error::config("init_filters and head_filters must be positive"));
        }
        if self.levels.is_empty() {
            return Err(Error::config("the tree needs at least one split level"));
        }
        if self.levels.len() > MAX_LEVELS {
            return Err(Error::config(format!(
                "{} split levels exceed the maximum of {MAX_LEVELS}",
                self.levels.len()
            )));
        }
        let mut channels = self.init_filters;
        for (depth, level) in self.levels.iter().enumerate() {
            if level.out_filter == 0 || level.stride == 0 {
                return Err(Error::config(format!(
                    "level {}: out_filter and stride must be positive",
                    depth + 1
                )));
            }
            if channels % 2 != 0 {
                return Err(Error::config(format!(
                    "level {}: cannot split {channels} channels into equal halves",
                    depth + 1
                )));
            }
            channels = level.out_filter;
        }
        Ok(())
    }

    /// Number of leaf branches, `2^levels`, saturating at `usize::MAX`.
    pub fn leaf_count(&self) -> usize {
        u32::try_from(self.levels.len())
            .ok()
            .and_then(|depth| 1usize.checked_shl(depth))
            .unwrap_or(usize::MAX)
    }

    /// Channels of the concatenated leaf outputs.
    pub fn concat_channels(&self) -> usize {
        let last = self.levels.last().map_or(self.init_filters, |l| l.out_filter);
        self.leaf_count().saturating_mul(last)
    }
}

/// A node of the tree: either a leaf or a split into two branches.
#[derive(Debug, Clone)]
pub enum BranchNode {
    Leaf,
    Split(Box<[Branch; 2]>),
}

/// One named branch: the stage it runs and what happens to its output.
#[derive(Debug, Clone)]
pub struct Branch {
    name: String,
    stage: Stage,
    children: BranchNode,
}

impl Branch {
    /// Path name, `A`, `AB`, `BBA`, …
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn children(&self) -> &BranchNode {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.children, BranchNode::Leaf)
    }
}

/// The whole branching body, from the initial features to the concatenation.
#[derive(Debug, Clone)]
pub struct BranchTree {
    root: BranchNode,
    in_channels: usize,
    depth: usize,
}

impl BranchTree {
    /// Build the tree for `config` with `num_units` residual units per stage.
    pub fn new(config: &TreeConfig, num_units: usize, ctx: &mut BuildContext<'_>) -> Result<Self> {
        config.validate()?;
        let root = build_node("", 0, config.init_filters, config, num_units, ctx)?;
        Ok(BranchTree {
            root,
            in_channels: config.init_filters,
            depth: config.levels.len(),
        })
    }

    /// The same tree in another mode. Every stage shares its parameters and
    /// running statistics with `self`.
    pub fn with_mode(&self, mode: Mode, updates: &UpdateOps) -> Self {
        BranchTree {
            root: node_with_mode(&self.root, mode, updates),
            in_channels: self.in_channels,
            depth: self.depth,
        }
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Every branch in depth-first order (A, AA, AAA, AAB, AB, …).
    pub fn branches(&self) -> Vec<&Branch> {
        let mut out = Vec::new();
        visit(&self.root, &mut |b| out.push(b));
        out
    }

    /// Leaf branches in concatenation order.
    pub fn leaves(&self) -> Vec<&Branch> {
        self.branches().into_iter().filter(|b| b.is_leaf()).collect()
    }

    /// Run every branch and return the leaf outputs in concatenation order.
    pub fn leaf_outputs(&self, x: &Tensor) -> deeproots_core::Result<Vec<Tensor>> {
        let mut out = Vec::with_capacity(1 << self.depth);
        run_node(&self.root, x, &mut out)?;
        Ok(out)
    }
}

fn build_node(
    prefix: &str,
    depth: usize,
    in_channels: usize,
    config: &TreeConfig,
    num_units: usize,
    ctx: &mut BuildContext<'_>,
) -> Result<BranchNode> {
    let Some(level) = config.levels.get(depth) else {
        return Ok(BranchNode::Leaf);
    };
    let half = in_channels / 2;
    let mut make = |suffix: char| -> Result<Branch> {
        let name = format!("{prefix}{suffix}");
        let stage = Stage::new(
            &format!("block{}/{name}", depth + 1),
            half,
            num_units,
            level.out_filter,
            level.stride,
            ctx,
        )?;
        let children = build_node(&name, depth + 1, level.out_filter, config, num_units, ctx)?;
        Ok(Branch {
            name,
            stage,
            children,
        })
    };
    let a = make('A')?;
    let b = make('B')?;
    Ok(BranchNode::Split(Box::new([a, b])))
}

fn node_with_mode(node: &BranchNode, mode: Mode, updates: &UpdateOps) -> BranchNode {
    match node {
        BranchNode::Leaf => BranchNode::Leaf,
        BranchNode::Split(pair) => {
            let [a, b] = &**pair;
            let convert = |branch: &Branch| Branch {
                name: branch.name.clone(),
                stage: branch.stage.with_mode(mode, updates),
                children: node_with_mode(&branch.children, mode, updates),
            };
            BranchNode::Split(Box::new([convert(a), convert(b)]))
        }
    }
}

fn visit<'a>(node: &'a BranchNode, f: &mut impl FnMut(&'a Branch)) {
    if let BranchNode::Split(pair) = node {
        for branch in pair.iter() {
            f(branch);
            visit(&branch.children, f);
        }
    }
}

fn run_node(node: &BranchNode, x: &Tensor, out: &mut Vec<Tensor>) -> deeproots_core::Result<()> {
    match node {
        BranchNode::Leaf => out.push(x.clone()),
        BranchNode::Split(pair) => {
            let halves = x.chunk(2, 3)?;
            for (branch, half) in pair.iter().zip(&halves) {
                tracing::debug!(branch = %branch.name, input = %half.shape(), "branch");
                let y = branch.stage.forward(half)?;
                run_node(&branch.children, &y, out)?;
            }
        }
    }
    Ok(())
}

impl Module for BranchTree {
    fn forward(&self, x: &Tensor) -> deeproots_core::Result<Tensor> {
        let leaves = self.leaf_outputs(x)?;
        let y = Tensor::cat(&leaves, 3)?;
        tracing::info!(shape = %y.shape(), "Concat Output");
        Ok(y)
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        self.branches()
            .into_iter()
            .flat_map(|b| b.stage.named_parameters())
            .collect()
    }
}
