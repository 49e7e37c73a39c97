//! Log-domain arithmetic used throughout the engine.
//!
//! Probability masses are kept as logarithms. The additive identity of that
//! domain is represented by [`LOG0`], a large negative finite sentinel rather
//! than `-inf`, so that sums of several "zero" masses never produce NaN
//! through `inf - inf` cancellation.

use ndarray::{Array1, Array2};

/// Log of zero probability mass. Finite so arithmetic on it stays defined.
pub const LOG0: f64 = -1.0e300;

/// Beyond this gap the smaller operand of a log-sum is below representable
/// relative precision and is dropped.
const MINUS_LOG_EPSILON: f64 = 30.0;

/// `ln(exp(a) + exp(b))` without leaving the log domain.
#[inline]
pub fn log_sum_exp(a: f64, b: f64) -> f64 {
    if a == b {
        return a + std::f64::consts::LN_2;
    }
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    if hi - lo > MINUS_LOG_EPSILON {
        hi
    } else {
        hi + (lo - hi).exp().ln_1p()
    }
}

/// `exp(d)` clamped to 0 for arguments too small to matter.
#[inline]
pub fn exp_clip(d: f64) -> f64 {
    if d < -MINUS_LOG_EPSILON {
        0.0
    } else {
        d.exp()
    }
}

/// Elementwise `acc[i] = logsumexp(acc[i], other[i])`.
pub fn log_sum_exp_assign(acc: &mut Array1<f64>, other: &Array1<f64>) {
    debug_assert_eq!(acc.len(), other.len());
    for (a, &b) in acc.iter_mut().zip(other.iter()) {
        *a = log_sum_exp(*a, b);
    }
}

/// Log-sum over all entries of a vector.
pub fn log_sum_exp_total(v: &Array1<f64>) -> f64 {
    let mut acc = LOG0;
    for &x in v.iter() {
        acc = log_sum_exp(acc, x);
    }
    acc
}

/// Log-domain matrix-vector product.
///
/// With `transpose == false`: `out[i] = logsumexp_j(m[i, j] + x[j])`,
/// otherwise `out[j] = logsumexp_i(m[i, j] + x[i])`.
pub fn log_mat_vec(m: &Array2<f64>, x: &Array1<f64>, transpose: bool, out: &mut Array1<f64>) {
    let (rows, cols) = m.dim();
    debug_assert_eq!(out.len(), if transpose { cols } else { rows });
    debug_assert_eq!(x.len(), if transpose { rows } else { cols });
    out.fill(LOG0);
    for i in 0..rows {
        for j in 0..cols {
            if transpose {
                out[j] = log_sum_exp(out[j], m[[i, j]] + x[i]);
            } else {
                out[i] = log_sum_exp(out[i], m[[i, j]] + x[j]);
            }
        }
    }
}
