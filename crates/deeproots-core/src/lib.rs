//! # deeproots-core
//!
//! Tensor primitives and reverse-mode autograd for deeproots.
//!
//! This crate provides:
//! - [`Tensor`] - NHWC `f32` array with automatic differentiation
//! - [`Shape`] - dimension sizes plus NHWC helpers
//! - [`Op`] - the recorded operation graph used by backprop
//! - [`GradStore`] - gradients returned by `backward()`
//!
//! Everything runs on the host. Convolutions are lowered to im2col + GEMM and
//! parallelised across the batch with rayon.

pub mod backprop;
pub mod error;
pub(crate) mod kernels;
pub mod op;
pub mod shape;
pub mod tensor;

pub use backprop::GradStore;
pub use error::{Error, Result};
pub use op::{Op, TensorId};
pub use shape::Shape;
pub use tensor::{BatchMoments, Tensor};
