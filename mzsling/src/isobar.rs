//! Partition a chromatogram into isobars at the valleys of its smoothed trace.
use std::ops::Range;

use tracing::trace;

use crate::peaks::Peak;
use crate::smooth::{local_minima, SavitzkyGolay, DEFAULT_POLYNOMIAL_ORDER};

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IsobarParams {
    /// The smallest apex to edge intensity ratio of an isobar that counts as signal
    pub min_apex_ratio: f64,
    pub polynomial_order: usize,
    /// Traces shorter than this are not smoothed, their raw minima are used instead
    pub min_smoothing_length: usize,
}

impl Default for IsobarParams {
    fn default() -> Self {
        Self {
            min_apex_ratio: 5.0,
            polynomial_order: DEFAULT_POLYNOMIAL_ORDER,
            min_smoothing_length: 5,
        }
    }
}

/// One elution peak within a chromatogram, as a contiguous range of its points
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Isobar {
    range: Range<usize>,
    apex: usize,
    apex_intensity: f64,
    apex_time: f64,
    valid: bool,
}

impl Isobar {
    fn from_range(peaks: &[Peak], range: Range<usize>, min_apex_ratio: f64) -> Self {
        let segment = &peaks[range.clone()];
        let mut apex = 0;
        for (i, p) in segment.iter().enumerate() {
            if p.intensity > segment[apex].intensity {
                apex = i;
            }
        }
        let apex_intensity = segment[apex].intensity;
        let edge = segment[0]
            .intensity
            .min(segment[segment.len() - 1].intensity);
        let valid = if edge > 0.0 {
            apex_intensity / edge > min_apex_ratio
        } else {
            apex_intensity > 0.0
        };
        Self {
            apex: range.start + apex,
            apex_time: segment[apex].retention_time,
            range,
            apex_intensity,
            valid,
        }
    }

    /// The positions within the parent chromatogram this isobar covers
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// The position of the most intense point within the parent chromatogram
    pub fn apex_index(&self) -> usize {
        self.apex
    }

    pub fn apex_intensity(&self) -> f64 {
        self.apex_intensity
    }

    pub fn apex_time(&self) -> f64 {
        self.apex_time
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn peaks<'a>(&self, parent: &'a [Peak]) -> &'a [Peak] {
        &parent[self.range.clone()]
    }
}

/// The position whose retention time is closest to `time`, the earliest one on ties
pub(crate) fn nearest_time_index(peaks: &[Peak], time: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, p) in peaks.iter().enumerate() {
        let err = (p.retention_time - time).abs();
        match best {
            Some((_, e)) if err >= e => {}
            _ => best = Some((i, err)),
        }
    }
    best.map(|(i, _)| i)
}

/// Smooth the intensity trace of `peaks` and split it at every local minimum.
///
/// Returns the smoothed trace and the isobars, which tile `peaks` in order. A trace
/// with no minima produces a single isobar, an empty trace produces none.
pub fn split_isobars(peaks: &[Peak], params: &IsobarParams) -> (Vec<f64>, Vec<Isobar>) {
    let n = peaks.len();
    if n == 0 {
        return (Vec::new(), Vec::new());
    }
    let raw: Vec<f64> = peaks.iter().map(|p| p.intensity).collect();

    let (smoothed, minima) = if n < params.min_smoothing_length {
        let minima = local_minima(&raw);
        (raw, minima)
    } else {
        let smoothed = SavitzkyGolay::for_length(n, params.polynomial_order).smooth(&raw);
        let minima = local_minima(&smoothed)
            .into_iter()
            .filter_map(|i| nearest_time_index(peaks, peaks[i].retention_time))
            .collect();
        (smoothed, minima)
    };

    let mut bounds = Vec::with_capacity(minima.len() + 2);
    bounds.push(0);
    bounds.extend(minima);
    bounds.push(n);
    bounds.sort_unstable();
    bounds.dedup();

    let isobars: Vec<Isobar> = bounds
        .windows(2)
        .map(|w| Isobar::from_range(peaks, w[0]..w[1], params.min_apex_ratio))
        .collect();
    trace!("Split {n} points into {} isobars", isobars.len());
    (smoothed, isobars)
}
