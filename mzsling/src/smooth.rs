//! Least-squares Savitzky-Golay smoothing for evenly sampled intensity traces.
//!
//! Each output point is the value at that point of a polynomial fit by least squares to a
//! window of neighbouring input points. Points within half a window of either end reuse
//! the first or last complete window, evaluated at their own offset, instead of padding.

use mzsignal::smooth::Polynomial;
use nalgebra::{DMatrix, DVector};
use tracing::trace;

pub const DEFAULT_POLYNOMIAL_ORDER: usize = 2;

const SINGULAR_EPSILON: f64 = 1e-12;

/// The window width used for a trace of `n` points: `floor(10 ln n)`, forced odd and
/// no wider than the trace itself.
pub fn window_for_length(n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    let mut width = (10.0 * (n as f64).ln()).floor() as usize;
    if width % 2 == 0 {
        width += 1;
    }
    width.min(largest_odd_at_most(n))
}

fn largest_odd_at_most(n: usize) -> usize {
    if n % 2 == 0 {
        n.saturating_sub(1)
    } else {
        n
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavitzkyGolay {
    pub window: usize,
    pub order: usize,
}

impl Default for SavitzkyGolay {
    fn default() -> Self {
        Self::new(5, DEFAULT_POLYNOMIAL_ORDER)
    }
}

impl SavitzkyGolay {
    pub fn new(window: usize, order: usize) -> Self {
        let window = if window % 2 == 0 { window + 1 } else { window };
        Self { window, order }
    }

    pub fn for_length(n: usize, order: usize) -> Self {
        Self::new(window_for_length(n).max(1), order)
    }

    pub fn smooth(&self, values: &[f64]) -> Vec<f64> {
        let n = values.len();
        let width = self.window.min(largest_odd_at_most(n));
        if width < 3 {
            return values.to_vec();
        }
        let half = width / 2;
        let order = self.order.min(width - 1);

        let (Some(weights), Some(left), Some(right)) = (
            interior_weights(width, order),
            fit_edge(&values[..width], order),
            fit_edge(&values[n - width..], order),
        ) else {
            trace!("Could not solve a {width} point, order {order} filter, leaving the trace unsmoothed");
            return values.to_vec();
        };

        let head: Vec<f64> = (0..half).map(|i| i as f64).collect();
        let tail: Vec<f64> = (width - half..width).map(|i| i as f64).collect();

        let mut smoothed = left.eval(&head);
        smoothed.extend(values.windows(width).map(|window| {
            weights.iter().zip(window).map(|(w, y)| w * y).sum::<f64>()
        }));
        smoothed.extend(right.eval(&tail));
        smoothed
    }
}

fn vandermonde(xs: &[f64], order: usize) -> DMatrix<f64> {
    DMatrix::from_fn(xs.len(), order + 1, |i, j| xs[i].powi(j as i32))
}

/// The convolution weights giving the value at the centre of a `width` point window of
/// the least-squares polynomial of degree `order` through that window.
fn interior_weights(width: usize, order: usize) -> Option<Vec<f64>> {
    let half = (width / 2) as f64;
    let xs: Vec<f64> = (0..width).map(|j| j as f64 - half).collect();
    let mut unit = DVector::<f64>::zeros(order + 1);
    unit[0] = 1.0;
    let svd = vandermonde(&xs, order).transpose().svd(true, true);
    let weights = svd.solve(&unit, SINGULAR_EPSILON).ok()?;
    Some(weights.iter().copied().collect())
}

/// Fit a polynomial of degree `order` to `values` sampled at `0, 1, .., values.len() - 1`
fn fit_edge(values: &[f64], order: usize) -> Option<Polynomial<f64>> {
    let xs: Vec<f64> = (0..values.len()).map(|j| j as f64).collect();
    let svd = vandermonde(&xs, order).svd(true, true);
    let beta = svd
        .solve(&DVector::from_column_slice(values), SINGULAR_EPSILON)
        .ok()?;
    Some(Polynomial::new(beta.iter().copied().collect(), order))
}

/// Indices of points strictly lower than both of their neighbours
pub fn local_minima(values: &[f64]) -> Vec<usize> {
    if values.len() < 3 {
        return Vec::new();
    }
    (1..values.len() - 1)
        .filter(|i| values[*i] < values[i - 1] && values[*i] < values[i + 1])
        .collect()
}
