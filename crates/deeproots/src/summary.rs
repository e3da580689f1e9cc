// Scalar summaries
//
// A model records a few scalars per graph, tagged with its mode:
//
//   <mode>/cost             every graph
//   <mode>/learning rate    train graphs only
//
// Each record is kept for the caller and emitted as a tracing event, which
// is the only sink: writing event files is left to whoever consumes them.

use deeproots_nn::Mode;

/// One recorded scalar.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarSummary {
    pub tag: String,
    pub value: f32,
    pub step: u64,
}

/// Collected scalar summaries of one graph.
#[derive(Debug, Clone)]
pub struct Summaries {
    mode: Mode,
    scalars: Vec<ScalarSummary>,
}

impl Summaries {
    pub fn new(mode: Mode) -> Self {
        Summaries {
            mode,
            scalars: Vec::new(),
        }
    }

    /// Record `value` under `<mode>/<name>`.
    pub fn scalar(&mut self, name: &str, value: f32, step: u64) {
        let tag = format!("{}/{name}", self.mode);
        tracing::info!(tag = %tag, value, step, "summary");
        self.scalars.push(ScalarSummary { tag, value, step });
    }

    /// Latest value recorded under `tag`.
    pub fn get(&self, tag: &str) -> Option<f32> {
        self.scalars
            .iter()
            .rev()
            .find(|s| s.tag == tag)
            .map(|s| s.value)
    }

    pub fn scalars(&self) -> &[ScalarSummary] {
        &self.scalars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_mode_prefixed() {
        let mut s = Summaries::new(Mode::Train);
        s.scalar("cost", 2.5, 0);
        s.scalar("learning rate", 0.1, 0);
        s.scalar("cost", 2.0, 1);
        assert_eq!(s.get("train/cost"), Some(2.0));
        assert_eq!(s.get("train/learning rate"), Some(0.1));
        assert_eq!(s.get("eval/cost"), None);
        assert_eq!(s.scalars().len(), 3);
    }
}
