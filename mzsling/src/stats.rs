//! Small descriptive statistics shared by the tracing, envelope and alignment steps.
use itertools::Itertools;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// The mean and the population standard deviation of `values`
pub fn mean_and_deviation(values: impl IntoIterator<Item = f64>) -> Option<(f64, f64)> {
    let mut n = 0usize;
    let mut mean = 0.0;
    let mut m2 = 0.0;
    for x in values {
        n += 1;
        let delta = x - mean;
        mean += delta / n as f64;
        m2 += delta * (x - mean);
    }
    match n {
        0 => None,
        _ => Some((mean, (m2 / n as f64).sqrt())),
    }
}

/// The median of `values`, averaging the two central values for even lengths
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Every value that occurs with the highest frequency, ascending
pub fn modes(values: &[i32]) -> Vec<i32> {
    let counts = values.iter().copied().counts();
    let Some(top) = counts.values().copied().max() else {
        return Vec::new();
    };
    counts
        .into_iter()
        .filter(|(_, c)| *c == top)
        .map(|(v, _)| v)
        .sorted()
        .collect()
}

/// Pearson's correlation coefficient of two equal length series.
///
/// Returns `0.0` when fewer than two pairs are available or either series is constant,
/// so an undefined correlation always reads as "unrelated".
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }
    let xs = &xs[..n];
    let ys = &ys[..n];
    let mx = xs.iter().sum::<f64>() / n as f64;
    let my = ys.iter().sum::<f64>() / n as f64;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mx;
        let dy = y - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    let r = sxy / (sxx * syy).sqrt();
    if r.is_finite() {
        r
    } else {
        0.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_modes() {
        assert_eq!(modes(&[1, 2, 2, 3]), vec![2]);
        assert_eq!(modes(&[2, 1, 1, 2]), vec![1, 2]);
        assert!(modes(&[]).is_empty());
    }

    #[test]
    fn test_mean_and_deviation() {
        let (m, sd) = mean_and_deviation([2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((m - 5.0).abs() < 1e-12);
        assert!((sd - 2.0).abs() < 1e-12);
        assert_eq!(mean_and_deviation([3.0]), Some((3.0, 0.0)));
        assert_eq!(mean_and_deviation(std::iter::empty()), None);
    }

    #[test]
    fn test_pearson() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        let ys = [2.0, 4.0, 6.0, 8.0];
        assert!((pearson(&xs, &ys) - 1.0).abs() < 1e-12);
        let ys = [8.0, 6.0, 4.0, 2.0];
        assert!((pearson(&xs, &ys) + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&[1.0], &[1.0]), 0.0);
        assert_eq!(pearson(&xs, &[5.0, 5.0, 5.0, 5.0]), 0.0);
    }
}
