// Host kernels - convolution, pooling and slice movement on flat NHWC buffers
//
// Convolution is lowered to im2col + GEMM per sample:
//
//   columns = im2col(input)   shape: [H_out * W_out, kH * kW * C_in]
//   output  = columns × W     shape: [H_out * W_out, C_out]
//
// where W is the HWIO weight [kH, kW, C_in, C_out] read as a
// [kH * kW * C_in, C_out] matrix. The column ordering (ki, kj, ci) matches the
// HWIO flattening, so no weight transpose is ever needed.
//
// Samples are independent, so forward and backward run one rayon task per
// sample. Weight gradients are reduced across tasks.

use rayon::prelude::*;

/// SAME padding: output size `ceil(input / stride)` and the padding placed
/// before the first element (the remainder goes after).
pub(crate) fn same_padding(input: usize, kernel: usize, stride: usize) -> (usize, usize) {
    let out = input.div_ceil(stride);
    let needed = ((out.saturating_sub(1)) * stride + kernel).saturating_sub(input);
    (out, needed / 2)
}

/// Geometry of one 2D window operation over NHWC data.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Window {
    pub h: usize,
    pub w: usize,
    pub c: usize,
    pub kh: usize,
    pub kw: usize,
    pub stride: usize,
    pub pad_h: usize,
    pub pad_w: usize,
    pub h_out: usize,
    pub w_out: usize,
}

impl Window {
    /// Input row/col for output position (oh, ow) and kernel tap (ki, kj),
    /// or None when the tap lands in the padding.
    #[inline]
    fn source(&self, oh: usize, ow: usize, ki: usize, kj: usize) -> Option<(usize, usize)> {
        let ih = (oh * self.stride + ki) as isize - self.pad_h as isize;
        let iw = (ow * self.stride + kj) as isize - self.pad_w as isize;
        if ih >= 0 && ih < self.h as isize && iw >= 0 && iw < self.w as isize {
            Some((ih as usize, iw as usize))
        } else {
            None
        }
    }

    fn col_width(&self) -> usize {
        self.kh * self.kw * self.c
    }

    fn positions(&self) -> usize {
        self.h_out * self.w_out
    }
}

/// im2col for a single sample `[H, W, C]`.
fn im2col(input: &[f32], g: &Window, columns: &mut [f32]) {
    let width = g.col_width();
    for oh in 0..g.h_out {
        for ow in 0..g.w_out {
            let row = (oh * g.w_out + ow) * width;
            for ki in 0..g.kh {
                for kj in 0..g.kw {
                    let dst = row + (ki * g.kw + kj) * g.c;
                    match g.source(oh, ow, ki, kj) {
                        Some((ih, iw)) => {
                            let src = (ih * g.w + iw) * g.c;
                            columns[dst..dst + g.c].copy_from_slice(&input[src..src + g.c]);
                        }
                        None => columns[dst..dst + g.c].fill(0.0),
                    }
                }
            }
        }
    }
}

/// col2im: scatter-add columns back into a `[H, W, C]` buffer.
fn col2im(columns: &[f32], g: &Window, output: &mut [f32]) {
    let width = g.col_width();
    for oh in 0..g.h_out {
        for ow in 0..g.w_out {
            let row = (oh * g.w_out + ow) * width;
            for ki in 0..g.kh {
                for kj in 0..g.kw {
                    if let Some((ih, iw)) = g.source(oh, ow, ki, kj) {
                        let src = row + (ki * g.kw + kj) * g.c;
                        let dst = (ih * g.w + iw) * g.c;
                        for ci in 0..g.c {
                            output[dst + ci] += columns[src + ci];
                        }
                    }
                }
            }
        }
    }
}

/// C += A × B, with A: [m, k], B: [k, n], C: [m, n], all row-major.
#[inline]
pub(crate) fn gemm(a: &[f32], b: &[f32], c: &mut [f32], m: usize, n: usize, k: usize) {
    for i in 0..m {
        let c_row = &mut c[i * n..(i + 1) * n];
        for p in 0..k {
            let a_val = a[i * k + p];
            if a_val == 0.0 {
                continue;
            }
            let b_row = &b[p * n..(p + 1) * n];
            for (cv, bv) in c_row.iter_mut().zip(b_row) {
                *cv += a_val * bv;
            }
        }
    }
}

/// C += Aᵀ × B, with A: [k, m], B: [k, n], C: [m, n].
#[inline]
pub(crate) fn gemm_at_b(a: &[f32], b: &[f32], c: &mut [f32], m: usize, n: usize, k: usize) {
    for p in 0..k {
        let b_row = &b[p * n..(p + 1) * n];
        for i in 0..m {
            let a_val = a[p * m + i];
            if a_val == 0.0 {
                continue;
            }
            let c_row = &mut c[i * n..(i + 1) * n];
            for (cv, bv) in c_row.iter_mut().zip(b_row) {
                *cv += a_val * bv;
            }
        }
    }
}

/// C += A × Bᵀ, with A: [m, k], B: [n, k], C: [m, n].
#[inline]
pub(crate) fn gemm_a_bt(a: &[f32], b: &[f32], c: &mut [f32], m: usize, n: usize, k: usize) {
    for i in 0..m {
        let a_row = &a[i * k..(i + 1) * k];
        for j in 0..n {
            let b_row = &b[j * k..(j + 1) * k];
            let dot: f32 = a_row.iter().zip(b_row).map(|(x, y)| x * y).sum();
            c[i * n + j] += dot;
        }
    }
}

/// Convolution forward over a batch. Returns `[N, H_out, W_out, C_out]`.
pub(crate) fn conv2d_forward(
    input: &[f32],
    weight: &[f32],
    n: usize,
    c_out: usize,
    g: &Window,
) -> Vec<f32> {
    let sample_in = g.h * g.w * g.c;
    let sample_out = g.positions() * c_out;
    let mut output = vec![0.0f32; n * sample_out];

    output
        .par_chunks_mut(sample_out)
        .enumerate()
        .for_each(|(ni, out)| {
            let mut columns = vec![0.0f32; g.positions() * g.col_width()];
            im2col(&input[ni * sample_in..(ni + 1) * sample_in], g, &mut columns);
            gemm(&columns, weight, out, g.positions(), c_out, g.col_width());
        });
    output
}

/// Convolution backward. Returns `(grad_input, grad_weight)`.
pub(crate) fn conv2d_backward(
    input: &[f32],
    weight: &[f32],
    grad_out: &[f32],
    n: usize,
    c_out: usize,
    g: &Window,
) -> (Vec<f32>, Vec<f32>) {
    let sample_in = g.h * g.w * g.c;
    let sample_out = g.positions() * c_out;
    let width = g.col_width();
    let mut grad_input = vec![0.0f32; n * sample_in];

    let grad_weight = grad_input
        .par_chunks_mut(sample_in)
        .enumerate()
        .map(|(ni, dx)| {
            let go = &grad_out[ni * sample_out..(ni + 1) * sample_out];

            // dW += columnsᵀ × grad_out
            let mut columns = vec![0.0f32; g.positions() * width];
            im2col(&input[ni * sample_in..(ni + 1) * sample_in], g, &mut columns);
            let mut dw = vec![0.0f32; width * c_out];
            gemm_at_b(&columns, go, &mut dw, width, c_out, g.positions());

            // dcolumns = grad_out × Wᵀ, then scatter back to the image
            columns.fill(0.0);
            gemm_a_bt(go, weight, &mut columns, g.positions(), width, c_out);
            col2im(&columns, g, dx);
            dw
        })
        .reduce(
            || vec![0.0f32; width * c_out],
            |mut acc, part| {
                for (a, p) in acc.iter_mut().zip(&part) {
                    *a += p;
                }
                acc
            },
        );

    (grad_input, grad_weight)
}

/// Average pooling (window == stride) counting only in-bounds cells.
pub(crate) fn avg_pool_forward(input: &[f32], n: usize, g: &Window) -> Vec<f32> {
    let sample_in = g.h * g.w * g.c;
    let sample_out = g.positions() * g.c;
    let mut output = vec![0.0f32; n * sample_out];
    for ni in 0..n {
        let x = &input[ni * sample_in..(ni + 1) * sample_in];
        let out = &mut output[ni * sample_out..(ni + 1) * sample_out];
        for oh in 0..g.h_out {
            for ow in 0..g.w_out {
                let dst = (oh * g.w_out + ow) * g.c;
                let mut count = 0usize;
                for ki in 0..g.kh {
                    for kj in 0..g.kw {
                        if let Some((ih, iw)) = g.source(oh, ow, ki, kj) {
                            let src = (ih * g.w + iw) * g.c;
                            for ci in 0..g.c {
                                out[dst + ci] += x[src + ci];
                            }
                            count += 1;
                        }
                    }
                }
                if count > 0 {
                    let inv = 1.0 / count as f32;
                    out[dst..dst + g.c].iter_mut().for_each(|v| *v *= inv);
                }
            }
        }
    }
    output
}

/// Average pooling backward: spread each output gradient uniformly over its window.
pub(crate) fn avg_pool_backward(grad_out: &[f32], n: usize, g: &Window) -> Vec<f32> {
    let sample_in = g.h * g.w * g.c;
    let sample_out = g.positions() * g.c;
    let mut grad_input = vec![0.0f32; n * sample_in];
    for ni in 0..n {
        let go = &grad_out[ni * sample_out..(ni + 1) * sample_out];
        let dx = &mut grad_input[ni * sample_in..(ni + 1) * sample_in];
        for oh in 0..g.h_out {
            for ow in 0..g.w_out {
                let taps: Vec<(usize, usize)> = (0..g.kh)
                    .flat_map(|ki| (0..g.kw).map(move |kj| (ki, kj)))
                    .filter_map(|(ki, kj)| g.source(oh, ow, ki, kj))
                    .collect();
                if taps.is_empty() {
                    continue;
                }
                let inv = 1.0 / taps.len() as f32;
                let src = (oh * g.w_out + ow) * g.c;
                for (ih, iw) in taps {
                    let dst = (ih * g.w + iw) * g.c;
                    for ci in 0..g.c {
                        dx[dst + ci] += go[src + ci] * inv;
                    }
                }
            }
        }
    }
    grad_input
}

/// Copy `[outer, len, inner]` out of a `[outer, size, inner]` buffer at `start`.
pub(crate) fn narrow_copy(
    src: &[f32],
    outer: usize,
    size: usize,
    inner: usize,
    start: usize,
    len: usize,
) -> Vec<f32> {
    let mut out = Vec::with_capacity(outer * len * inner);
    for o in 0..outer {
        let base = (o * size + start) * inner;
        out.extend_from_slice(&src[base..base + len * inner]);
    }
    out
}

/// Add a `[outer, len, inner]` block into a `[outer, size, inner]` buffer at `start`.
pub(crate) fn narrow_scatter_add(
    dst: &mut [f32],
    block: &[f32],
    outer: usize,
    size: usize,
    inner: usize,
    start: usize,
    len: usize,
) {
    for o in 0..outer {
        let base = (o * size + start) * inner;
        let src = &block[o * len * inner..(o + 1) * len * inner];
        for (d, s) in dst[base..base + len * inner].iter_mut().zip(src) {
            *d += s;
        }
    }
}
