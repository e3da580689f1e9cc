// Integration tests for the branching ResNet
//
// Models here are small (batch 2, 8×8 images, one residual unit per stage)
// but use the default three-level tree unless a test needs another shape.

use deeproots::nn::{Mode, Module, UpdateOps};
use deeproots::{
    build, build_with_tree, BranchTree, Error, HParams, Level, ResNet, ResidualUnit, Result,
    Tensor, TreeConfig,
};
use deeproots::model::BuildContext;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn small_hps() -> HParams {
    HParams {
        batch_size: 2,
        num_classes: 5,
        num_residual_units: 1,
        ..HParams::default()
    }
}

fn batch(hps: &HParams, size: usize, seed: u64) -> Result<(Tensor, Tensor)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let images = Tensor::randn((hps.batch_size, size, size, 3), 0.0, 1.0, &mut rng)?;
    let mut labels = vec![0.0f32; hps.batch_size * hps.num_classes];
    for row in labels.chunks_mut(hps.num_classes) {
        row[rng.gen_range(0..hps.num_classes)] = 1.0;
    }
    let labels = Tensor::from_vec(labels, (hps.batch_size, hps.num_classes))?;
    Ok((images, labels))
}

#[test]
fn test_logits_shape_and_predictions() -> Result<()> {
    let hps = small_hps();
    let (images, labels) = batch(&hps, 8, 0)?;
    let (_, graph) = build(hps.clone(), &images, &labels, Mode::Eval, 7)?;

    assert_eq!(graph.logits.dims(), &[hps.batch_size, hps.num_classes]);
    assert_eq!(graph.predictions.dims(), &[hps.batch_size, hps.num_classes]);
    for row in graph.predictions.to_vec()?.chunks(hps.num_classes) {
        assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }
    assert!(graph.train_op.is_none());
    assert!(graph.summaries.get("eval/cost").is_some());
    Ok(())
}

#[test]
fn test_cost_is_finite() -> Result<()> {
    let hps = small_hps();
    let (images, labels) = batch(&hps, 8, 1)?;
    let (_, graph) = build(hps, &images, &labels, Mode::Train, 3)?;
    let cost = graph.cost.to_scalar()?;
    assert!(cost.is_finite() && cost > 0.0, "cost {cost}");
    assert_eq!(graph.summaries.get("train/cost"), Some(cost));
    assert_eq!(graph.summaries.get("train/learning rate"), Some(0.1));
    Ok(())
}

#[test]
fn test_leaf_channels_are_an_eighth_of_init() -> Result<()> {
    for init in [8usize, 16, 32, 64] {
        let tree = TreeConfig {
            init_filters: init,
            levels: vec![
                Level::new(init / 2, 1),
                Level::new(init / 4, 2),
                Level::new(init / 8, 2),
            ],
            head_filters: 12,
        };
        let updates = UpdateOps::new();
        let mut rng = StdRng::seed_from_u64(init as u64);
        let mut ctx = BuildContext {
            mode: Mode::Eval,
            relu_leakiness: 0.1,
            updates: &updates,
            rng: &mut rng,
        };
        let body = BranchTree::new(&tree, 1, &mut ctx)?;
        for leaf in body.leaves() {
            assert_eq!(leaf.stage().in_filter(), init / 8, "leaf {}", leaf.name());
        }
    }
    Ok(())
}

#[test]
fn test_concat_has_eight_times_out_filter() -> Result<()> {
    let tree = TreeConfig {
        levels: vec![Level::new(8, 1), Level::new(8, 2), Level::new(6, 2)],
        ..TreeConfig::default()
    };
    let updates = UpdateOps::new();
    let mut rng = StdRng::seed_from_u64(11);
    let mut ctx = BuildContext {
        mode: Mode::Train,
        relu_leakiness: 0.1,
        updates: &updates,
        rng: &mut rng,
    };
    let body = BranchTree::new(&tree, 1, &mut ctx)?;
    let x = Tensor::randn((2, 8, 8, 16), 0.0, 1.0, &mut rng)?;

    let leaves = body.leaf_outputs(&x)?;
    assert_eq!(leaves.len(), 8);
    assert!(leaves.iter().all(|l| l.dims() == [2, 2, 2, 6]));
    assert_eq!(body.forward(&x)?.dims(), &[2, 2, 2, 48]);
    Ok(())
}

#[test]
fn test_eval_is_deterministic_and_leaves_statistics_alone() -> Result<()> {
    let hps = small_hps();
    let (images, labels) = batch(&hps, 8, 2)?;
    let (model, first) = build(hps, &images, &labels, Mode::Eval, 5)?;
    let second = model.build_graph(&images, &labels)?;
    assert_eq!(first.logits.to_vec()?, second.logits.to_vec()?);
    assert_eq!(first.cost.to_scalar()?, second.cost.to_scalar()?);
    assert_eq!(model.global_step(), 0);
    Ok(())
}

#[test]
fn test_train_step_moves_parameters_and_moving_averages() -> Result<()> {
    let hps = small_hps();
    let (images, labels) = batch(&hps, 8, 3)?;
    let (mut model, graph) = build(hps, &images, &labels, Mode::Train, 9)?;
    let op = graph.train_op.expect("train graph carries a train op");

    let mean_update = op
        .updates()
        .iter()
        .find(|u| u.name() == "final/bn/moving_mean")
        .expect("head batch norm queued its mean")
        .clone();
    assert_eq!(mean_update.target().to_vec()?, vec![0.0; 40]);

    let weights: Vec<(String, Tensor)> = model
        .named_parameters()
        .into_iter()
        .filter(|(n, _)| n.ends_with("weights"))
        .collect();
    let before: Vec<Vec<f32>> = weights.iter().map(|(_, t)| t.to_vec()).collect::<std::result::Result<_, _>>()?;

    let report = model.run_train_op(op)?;
    assert_eq!(report.step, 1);
    assert_eq!(model.global_step(), 1);

    assert_ne!(mean_update.target().to_vec()?, vec![0.0; 40]);
    let changed = weights
        .iter()
        .zip(&before)
        .filter(|((_, t), old)| t.to_vec().map(|now| now != **old).unwrap_or(false))
        .count();
    assert_eq!(changed, weights.len());
    Ok(())
}

#[test]
fn test_every_batch_norm_queues_two_updates() -> Result<()> {
    let hps = small_hps();
    let (images, labels) = batch(&hps, 8, 4)?;
    let (model, graph) = build(hps, &images, &labels, Mode::Train, 1)?;
    let op = graph.train_op.expect("train op");
    // 14 stages × 1 unit × 2 sub-blocks, plus the head
    assert_eq!(op.updates().len(), 2 * (14 * 2 + 1));

    // a second graph starts from an empty queue
    let again = model.build_graph(&images, &labels)?;
    assert_eq!(again.train_op.expect("train op").updates().len(), op.updates().len());
    Ok(())
}

#[test]
fn test_bare_forward_leaves_no_updates_behind() -> Result<()> {
    let hps = small_hps();
    let (images, labels) = batch(&hps, 8, 13)?;
    let mut rng = StdRng::seed_from_u64(4);
    let model = ResNet::new(hps, TreeConfig::default(), Mode::Train, &mut rng)?;

    for _ in 0..3 {
        model.forward(&images)?;
        assert_eq!(model.pending_updates()?, 0);
    }

    let graph = model.build_graph(&images, &labels)?;
    let op = graph.train_op.expect("train op");
    // one pass worth: 14 stages × 2 sub-blocks plus the head, two each
    assert_eq!(op.updates().len(), 2 * (14 * 2 + 1));
    assert_eq!(model.pending_updates()?, 0);
    Ok(())
}

#[test]
fn test_eval_view_follows_training() -> Result<()> {
    let hps = small_hps();
    let (images, labels) = batch(&hps, 8, 14)?;
    let mut rng = StdRng::seed_from_u64(7);
    let mut model = ResNet::new(hps.clone(), TreeConfig::default(), Mode::Train, &mut rng)?;
    let eval = model.eval_view();
    assert_eq!(eval.mode(), Mode::Eval);
    assert_eq!(eval.learning_rate(), None);

    // same seed, same parameters: the view starts as a fresh eval model
    let mut rng = StdRng::seed_from_u64(7);
    let fresh = ResNet::new(hps, TreeConfig::default(), Mode::Eval, &mut rng)?;
    let before = eval.forward(&images)?.to_vec()?;
    assert_eq!(before, fresh.forward(&images)?.to_vec()?);

    for _ in 0..5 {
        model.train_step(&images, &labels)?;
    }
    assert_eq!(model.global_step(), 5);

    let trained_mean = model.head().bn().moving_mean().to_vec()?;
    assert!(trained_mean.iter().any(|m| *m != 0.0));
    assert_eq!(eval.head().bn().moving_mean().to_vec()?, trained_mean);
    assert_eq!(
        eval.head().bn().moving_variance().to_vec()?,
        model.head().bn().moving_variance().to_vec()?
    );

    let after = eval.forward(&images)?.to_vec()?;
    assert_ne!(after, before);
    assert_eq!(after, eval.forward(&images)?.to_vec()?);
    assert_eq!(fresh.forward(&images)?.to_vec()?, before);

    let graph = eval.build_graph(&images, &labels)?;
    assert!(graph.train_op.is_none());
    assert_eq!(eval.pending_updates()?, 0);
    Ok(())
}

#[test]
fn test_eval_view_cannot_train() -> Result<()> {
    let hps = small_hps();
    let (images, labels) = batch(&hps, 8, 15)?;
    let mut rng = StdRng::seed_from_u64(0);
    let model = ResNet::new(hps, TreeConfig::default(), Mode::Train, &mut rng)?;
    let mut eval = model.eval_view();
    assert!(matches!(eval.train_step(&images, &labels), Err(Error::Config(_))));
    assert_eq!(model.global_step(), 0);
    Ok(())
}

#[test]
fn test_same_seed_same_model() -> Result<()> {
    let hps = small_hps();
    let (images, labels) = batch(&hps, 8, 6)?;
    let (_, a) = build(hps.clone(), &images, &labels, Mode::Eval, 21)?;
    let (_, b) = build(hps, &images, &labels, Mode::Eval, 21)?;
    assert_eq!(a.logits.to_vec()?, b.logits.to_vec()?);
    assert_eq!(a.param_count, b.param_count);
    Ok(())
}

#[test]
fn test_param_count_scopes() -> Result<()> {
    let hps = small_hps();
    let (images, labels) = batch(&hps, 8, 8)?;
    let (model, graph) = build(hps, &images, &labels, Mode::Eval, 2)?;
    let scopes: Vec<&str> = graph.param_count.by_scope.keys().map(|s| s.as_str()).collect();
    assert_eq!(scopes, vec!["block1", "block2", "block3", "final", "init", "logit"]);
    assert_eq!(graph.param_count.total, model.num_parameters());
    // init conv 3×3×3×16, fully connected 40×5 + 5
    assert_eq!(graph.param_count.by_scope["init"], 432);
    assert_eq!(graph.param_count.by_scope["logit"], 205);
    Ok(())
}

#[test]
fn test_residual_shortcut_sixteen_to_eight() -> Result<()> {
    let updates = UpdateOps::new();
    let mut rng = StdRng::seed_from_u64(0);
    let mut ctx = BuildContext {
        mode: Mode::Eval,
        relu_leakiness: 0.1,
        updates: &updates,
        rng: &mut rng,
    };
    let unit = ResidualUnit::new("r", 16, 8, 2, &mut ctx)?;
    for size in [5usize, 8, 9] {
        let x = Tensor::ones((1, size, size, 16));
        let s = unit.shortcut(&x, size.div_ceil(2))?;
        assert_eq!(s.dims(), &[1, size.div_ceil(2), size.div_ceil(2), 8]);
    }
    Ok(())
}

#[test]
fn test_learning_rate_floor() -> Result<()> {
    let hps = small_hps();
    let mut rng = StdRng::seed_from_u64(0);
    let mut model = ResNet::new(hps, TreeConfig::default(), Mode::Train, &mut rng)?;
    assert_eq!(model.set_learning_rate(0.05)?, 0.05);
    assert_eq!(model.set_learning_rate(0.0)?, 1e-4);
    assert_eq!(model.learning_rate(), Some(1e-4));
    Ok(())
}

#[test]
fn test_input_validation() -> Result<()> {
    let hps = small_hps();
    let (images, labels) = batch(&hps, 8, 10)?;

    let wrong_batch = Tensor::zeros((3, 8, 8, 3));
    assert!(matches!(
        build(hps.clone(), &wrong_batch, &labels, Mode::Eval, 0),
        Err(Error::Input(_))
    ));

    let wrong_channels = Tensor::zeros((2, 8, 8, 1));
    assert!(matches!(
        build(hps.clone(), &wrong_channels, &labels, Mode::Eval, 0),
        Err(Error::Input(_))
    ));

    let flat = Tensor::zeros((2, 192));
    assert!(matches!(
        build(hps.clone(), &flat, &labels, Mode::Eval, 0),
        Err(Error::Tensor(_))
    ));

    let wrong_labels = Tensor::zeros((2, 7));
    assert!(matches!(
        build(hps.clone(), &images, &wrong_labels, Mode::Eval, 0),
        Err(Error::Input(_))
    ));
    Ok(())
}

#[test]
fn test_configuration_errors() -> Result<()> {
    let hps = small_hps();
    let (images, labels) = batch(&hps, 8, 12)?;

    let odd_root = TreeConfig {
        init_filters: 15,
        ..TreeConfig::default()
    };
    assert!(matches!(
        build_with_tree(hps.clone(), odd_root, &images, &labels, Mode::Eval, 0),
        Err(Error::Config(_))
    ));

    let no_levels = TreeConfig {
        levels: Vec::new(),
        ..TreeConfig::default()
    };
    assert!(matches!(
        build_with_tree(hps.clone(), no_levels, &images, &labels, Mode::Eval, 0),
        Err(Error::Config(_))
    ));

    let bad_hps = HParams {
        min_lrn_rate: 1.0,
        ..hps.clone()
    };
    assert!(matches!(
        build(bad_hps, &images, &labels, Mode::Train, 0),
        Err(Error::Config(_))
    ));

    let mut rng = StdRng::seed_from_u64(0);
    let mut eval = ResNet::new(hps, TreeConfig::default(), Mode::Eval, &mut rng)?;
    assert!(matches!(eval.train_step(&images, &labels), Err(Error::Config(_))));
    assert!(eval.set_learning_rate(0.1).is_err());
    Ok(())
}
