// deeproots-train - train the branching ResNet on synthetic data
//
// There is no data pipeline: every step draws normalized random images and
// random one-hot labels. The run shows the model builds, the cost stays
// finite, and steps advance parameters and batch-norm statistics together.
// A final batch is scored by an eval view of the trained model.
//
// Usage:
//   deeproots-train                                  # defaults, 10 steps
//   deeproots-train --hparams hps.json --steps 50    # custom hyperparameters
//   deeproots-train --image-size 16                  # smaller images
//
// Logging follows RUST_LOG (default `info`); `RUST_LOG=debug` adds per-block
// shapes.

use deeproots::{HParams, Mode, ResNet, Result, Tensor, TreeConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

const SEED: u64 = 42;

// Configuration

struct Config {
    hparams: Option<String>,
    steps: usize,
    image_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hparams: None,
            steps: 10,
            image_size: 32,
        }
    }
}

fn parse_args() -> Result<Config> {
    let mut cfg = Config::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .ok_or_else(|| deeproots::Error::config(format!("{flag} needs a value")))
        };
        match arg.as_str() {
            "--hparams" => cfg.hparams = Some(value("--hparams")?),
            "--steps" => {
                cfg.steps = value("--steps")?
                    .parse()
                    .map_err(|e| deeproots::Error::config(format!("invalid --steps: {e}")))?;
            }
            "--image-size" => {
                cfg.image_size = value("--image-size")?
                    .parse()
                    .map_err(|e| deeproots::Error::config(format!("invalid --image-size: {e}")))?;
            }
            "--help" | "-h" => {
                println!("usage: deeproots-train [--hparams FILE] [--steps N] [--image-size S]");
                std::process::exit(0);
            }
            other => return Err(deeproots::Error::config(format!("unknown argument '{other}'"))),
        }
    }
    if cfg.image_size == 0 {
        return Err(deeproots::Error::config("--image-size must be positive"));
    }
    Ok(cfg)
}

/// Standard-normal images and uniformly drawn one-hot labels.
fn synthetic_batch(hps: &HParams, image_size: usize, rng: &mut StdRng) -> Result<(Tensor, Tensor)> {
    let images = Tensor::randn((hps.batch_size, image_size, image_size, 3), 0.0, 1.0, rng)?;
    let mut labels = vec![0.0f32; hps.batch_size * hps.num_classes];
    for row in labels.chunks_mut(hps.num_classes) {
        row[rng.gen_range(0..hps.num_classes)] = 1.0;
    }
    let labels = Tensor::from_vec(labels, (hps.batch_size, hps.num_classes))?;
    Ok((images, labels))
}

fn run() -> Result<()> {
    let cfg = parse_args()?;
    let hps = match &cfg.hparams {
        Some(path) => HParams::from_file(path)?,
        None => HParams::default(),
    };
    tracing::info!(?hps, steps = cfg.steps, image_size = cfg.image_size, "configuration");

    let mut rng = StdRng::seed_from_u64(SEED);
    let mut model = ResNet::new(hps.clone(), TreeConfig::default(), Mode::Train, &mut rng)?;

    for _ in 0..cfg.steps {
        let (images, labels) = synthetic_batch(&hps, cfg.image_size, &mut rng)?;
        let report = model.train_step(&images, &labels)?;
        tracing::info!(
            step = report.step,
            cost = report.cost,
            lr = report.learning_rate,
            "step complete"
        );
    }

    let eval = model.eval_view();
    let (images, labels) = synthetic_batch(&hps, cfg.image_size, &mut rng)?;
    let cost = eval.build_graph(&images, &labels)?.cost.to_scalar()?;
    tracing::info!(cost, "held-out batch");
    Ok(())
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();

    if let Err(e) = run() {
        tracing::error!(error = %e, "training failed");
        std::process::exit(1);
    }
}
