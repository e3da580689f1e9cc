// Integration tests for deeproots-nn
//
// Layers are stacked the way the network stacks them and checked end to end:
// gradients reach every parameter, train and eval behave differently, and the
// update collector sees exactly the train-mode layers.

use deeproots_core::{Result, Tensor};
use deeproots_nn::{
    l2_weight_decay, softmax_cross_entropy_loss, BatchNorm2d, Conv2d, LeakyReLU, Linear, Mode,
    Module, UpdateOps,
};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

struct Tiny {
    bn: BatchNorm2d,
    relu: LeakyReLU,
    conv: Conv2d,
    fc: Linear,
}

impl Tiny {
    fn new(mode: Mode, updates: &UpdateOps, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        Ok(Tiny {
            bn: BatchNorm2d::new("tiny/bn", 3, mode, updates),
            relu: LeakyReLU::new(0.1),
            conv: Conv2d::new("tiny/conv", 3, 4, 2, &mut rng)?,
            fc: Linear::new("tiny/fc", 4, 2, &mut rng)?,
        })
    }
}

impl Module for Tiny {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let h = self.relu.forward(&self.bn.forward(x)?)?;
        let h = self.conv.forward(&h)?;
        self.fc.forward(&h.mean_spatial()?)
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        let mut p = self.bn.named_parameters();
        p.extend(self.conv.named_parameters());
        p.extend(self.fc.named_parameters());
        p
    }
}

fn batch(seed: u64) -> Result<(Tensor, Tensor)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let x = Tensor::randn((4, 6, 6, 3), 0.0, 1.0, &mut rng)?;
    let y = Tensor::from_vec(vec![1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0], (4, 2))?;
    Ok((x, y))
}

#[test]
fn test_gradients_reach_every_parameter() -> Result<()> {
    let updates = UpdateOps::new();
    let model = Tiny::new(Mode::Train, &updates, 0)?;
    let (x, y) = batch(1)?;

    let logits = model.forward(&x)?;
    assert_eq!(logits.dims(), &[4, 2]);
    let cost = softmax_cross_entropy_loss(&logits, &y)?
        .add(&l2_weight_decay(&model.named_parameters(), 2e-4)?)?;
    let grads = cost.backward()?;

    for (name, p) in model.named_parameters() {
        let g = grads.get(&p).unwrap_or_else(|| panic!("no gradient for {name}"));
        assert_eq!(g.dims(), p.dims(), "{name}");
        assert!(g.to_vec()?.iter().all(|v| v.is_finite()), "{name}");
    }
    assert_eq!(updates.len()?, 2);
    Ok(())
}

#[test]
fn test_eval_model_is_deterministic_and_side_effect_free() -> Result<()> {
    let updates = UpdateOps::new();
    let model = Tiny::new(Mode::Eval, &updates, 0)?;
    let (x, _) = batch(2)?;
    let a = model.forward(&x)?.to_vec()?;
    let b = model.forward(&x)?.to_vec()?;
    assert_eq!(a, b);
    assert!(updates.is_empty()?);
    Ok(())
}

#[test]
fn test_same_seed_same_parameters() -> Result<()> {
    let updates = UpdateOps::new();
    let m1 = Tiny::new(Mode::Eval, &updates, 9)?;
    let m2 = Tiny::new(Mode::Train, &updates, 9)?;
    for ((n1, p1), (n2, p2)) in m1.named_parameters().into_iter().zip(m2.named_parameters()) {
        assert_eq!(n1, n2);
        assert_eq!(p1.to_vec()?, p2.to_vec()?);
    }
    assert_eq!(m1.num_parameters(), 3 + 3 * 3 * 3 * 4 + 4 * 2 + 2);
    Ok(())
}

proptest! {
    #[test]
    fn leaky_relu_module_is_identity_on_nonnegatives(
        values in proptest::collection::vec(0.0f32..100.0f32, 1..64),
        leakiness in 0.0f32..1.0f32,
    ) {
        let x = Tensor::from_vec(values.clone(), values.len()).expect("shape matches");
        let y = LeakyReLU::new(leakiness).forward(&x).expect("elementwise op");
        prop_assert_eq!(y.to_vec().expect("readable"), values);
    }
}
