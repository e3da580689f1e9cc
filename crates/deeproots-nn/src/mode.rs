use std::fmt;

/// Whether a model is built for training or for evaluation.
///
/// Chosen once at construction. In `Train` mode batch normalization uses
/// batch statistics and queues moving-average updates; in `Eval` mode it
/// reads the stored averages and has no side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Train,
    Eval,
}

impl Mode {
    pub fn is_training(self) -> bool {
        self == Mode::Train
    }

    /// Lowercase tag used as the prefix of summary names.
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Train => "train",
            Mode::Eval => "eval",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_tags() {
        assert_eq!(Mode::Train.to_string(), "train");
        assert_eq!(Mode::Eval.to_string(), "eval");
        assert!(Mode::Train.is_training());
        assert!(!Mode::Eval.is_training());
    }
}
