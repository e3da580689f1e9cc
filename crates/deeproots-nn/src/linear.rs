// Linear - Fully connected layer
//
//   y = x @ W + b
//
// SHAPES:
//   Input:  [batch, in_features]
//   W:      [in_features, out_features]
//   b:      [out_features]
//   Output: [batch, out_features]
//
// W uses unit-scaling uniform initialization (factor 1.0), b starts at zero.

use deeproots_core::{Result, Tensor};
use rand::Rng;

use crate::init;
use crate::module::Module;

/// A fully connected layer with bias.
#[derive(Debug, Clone)]
pub struct Linear {
    scope: String,
    weight: Tensor,
    bias: Tensor,
    in_features: usize,
    out_features: usize,
}

impl Linear {
    /// Create a layer with parameters `<scope>/weights` and `<scope>/biases`.
    pub fn new<R: Rng + ?Sized>(
        scope: &str,
        in_features: usize,
        out_features: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if in_features == 0 || out_features == 0 {
            deeproots_core::bail!(
                "linear {scope}: features must be positive (in {in_features}, out {out_features})"
            );
        }
        Ok(Linear {
            scope: scope.to_string(),
            weight: init::uniform_unit_scaling((in_features, out_features), 1.0, rng)?,
            bias: init::zeros(out_features),
            in_features,
            out_features,
        })
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }
    pub fn out_features(&self) -> usize {
        self.out_features
    }
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }
    pub fn bias(&self) -> &Tensor {
        &self.bias
    }
}

impl Module for Linear {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        x.matmul(&self.weight)?.add_channel(&self.bias)
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        vec![
            (format!("{}/weights", self.scope), self.weight.clone()),
            (format!("{}/biases", self.scope), self.bias.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_linear_shape_and_bias() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(7);
        let fc = Linear::new("logit/fully_connected", 4, 3, &mut rng)?;
        assert_eq!(fc.weight().dims(), &[4, 3]);
        assert_eq!(fc.bias().to_vec()?, vec![0.0; 3]);

        let x = Tensor::zeros((5, 4));
        let y = fc.forward(&x)?;
        assert_eq!(y.dims(), &[5, 3]);
        assert!(y.to_vec()?.iter().all(|v| *v == 0.0));

        let names: Vec<String> = fc.named_parameters().into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec!["logit/fully_connected/weights", "logit/fully_connected/biases"]
        );
        Ok(())
    }
}
