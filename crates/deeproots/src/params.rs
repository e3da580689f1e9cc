use std::collections::BTreeMap;
use std::fmt;

use deeproots_core::Tensor;

/// Number of trainable scalars, in total and per top-level scope
/// (`init`, `block1`, `block2`, `block3`, `final`, `logit`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamCount {
    pub total: usize,
    pub by_scope: BTreeMap<String, usize>,
}

impl ParamCount {
    pub fn from_named(params: &[(String, Tensor)]) -> Self {
        let mut count = ParamCount::default();
        for (name, t) in params {
            let scope = name.split('/').next().unwrap_or(name.as_str());
            *count.by_scope.entry(scope.to_string()).or_insert(0) += t.elem_count();
            count.total += t.elem_count();
        }
        count
    }

    /// Emit one `info` event per scope and one for the total.
    pub fn log(&self) {
        for (scope, n) in &self.by_scope {
            tracing::info!(scope = %scope, params = n, "parameters");
        }
        tracing::info!(total = self.total, "number of trainable parameters");
    }
}

impl fmt::Display for ParamCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (scope, n) in &self.by_scope {
            writeln!(f, "{scope:<10} {n:>10}")?;
        }
        write!(f, "{:<10} {:>10}", "total", self.total)
    }
}
