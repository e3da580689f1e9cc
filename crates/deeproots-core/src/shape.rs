use std::fmt;

use crate::error::{Error, Result};

// Shape - N-dimensional shape representation
//
// Feature maps in deeproots are always laid out NHWC:
//   [batch, height, width, channels]
// so the channel axis is the innermost (contiguous) dimension. Splitting and
// concatenating branches therefore happens along the last axis.
//
// Storage is always contiguous row-major; there are no strided views. The
// shape alone fully determines how a flat buffer is indexed.

/// N-dimensional shape of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape(Vec<usize>);

impl Shape {
    /// Create a new shape from a vector of dimension sizes.
    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    /// The dimension sizes as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of dimensions (0 for scalar).
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements. A scalar shape [] has 1 element.
    pub fn elem_count(&self) -> usize {
        self.0.iter().product()
    }

    /// Size of a specific dimension.
    pub fn dim(&self, d: usize) -> Result<usize> {
        self.0.get(d).copied().ok_or(Error::DimOutOfRange {
            dim: d,
            rank: self.rank(),
        })
    }

    /// Product of the dimensions before `dim` and after `dim`.
    ///
    /// A contiguous buffer can be viewed as `[outer, dims[dim], inner]`, which
    /// is all that narrow/cat need to move slices around.
    pub fn outer_inner(&self, dim: usize) -> Result<(usize, usize)> {
        if dim >= self.rank() {
            return Err(Error::DimOutOfRange {
                dim,
                rank: self.rank(),
            });
        }
        let outer = self.0[..dim].iter().product();
        let inner = self.0[dim + 1..].iter().product();
        Ok((outer, inner))
    }

    /// Unpack an NHWC shape as `(n, h, w, c)`.
    pub fn nhwc(&self, op: &'static str) -> Result<(usize, usize, usize, usize)> {
        match self.0.as_slice() {
            &[n, h, w, c] => Ok((n, h, w, c)),
            _ => Err(Error::RankMismatch {
                op,
                expected: 4,
                got: self.rank(),
            }),
        }
    }

    /// Size of the innermost (channel) dimension.
    pub fn channels(&self) -> Result<usize> {
        self.0.last().copied().ok_or(Error::DimOutOfRange { dim: 0, rank: 0 })
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

impl From<()> for Shape {
    fn from(_: ()) -> Self {
        Shape(vec![])
    }
}

impl From<usize> for Shape {
    fn from(d: usize) -> Self {
        Shape(vec![d])
    }
}

impl From<(usize,)> for Shape {
    fn from((d0,): (usize,)) -> Self {
        Shape(vec![d0])
    }
}

impl From<(usize, usize)> for Shape {
    fn from((d0, d1): (usize, usize)) -> Self {
        Shape(vec![d0, d1])
    }
}

impl From<(usize, usize, usize)> for Shape {
    fn from((d0, d1, d2): (usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2])
    }
}

impl From<(usize, usize, usize, usize)> for Shape {
    fn from((d0, d1, d2, d3): (usize, usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2, d3])
    }
}

impl From<Vec<usize>> for Shape {
    fn from(v: Vec<usize>) -> Self {
        Shape(v)
    }
}

impl From<&[usize]> for Shape {
    fn from(s: &[usize]) -> Self {
        Shape(s.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_has_one_element() {
        assert_eq!(Shape::from(()).elem_count(), 1);
        assert_eq!(Shape::from(()).rank(), 0);
    }

    #[test]
    fn test_outer_inner() -> Result<()> {
        let s = Shape::from((2, 4, 4, 16));
        assert_eq!(s.outer_inner(3)?, (32, 1));
        assert_eq!(s.outer_inner(1)?, (2, 64));
        assert!(s.outer_inner(4).is_err());
        Ok(())
    }

    #[test]
    fn test_nhwc_rejects_wrong_rank() {
        assert!(Shape::from((2, 3)).nhwc("test").is_err());
        assert_eq!(
            Shape::from((1, 2, 3, 4)).nhwc("test").ok(),
            Some((1, 2, 3, 4))
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Shape::from((8, 32, 32, 3)).to_string(), "[8, 32, 32, 3]");
    }
}
