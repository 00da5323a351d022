//! The intensity-ordered arena of MS1 peaks that seeds chromatogram tracing.
use std::collections::HashMap;

use identity_hash::BuildIdentityHasher;
use tracing::debug;

use crate::error::SlingError;
use crate::scan::LcMsRun;
use crate::stats::mean_and_deviation;

/// One MS1 point above the noise floor.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Peak {
    /// The dense MS1 scan index in its [`LcMsRun`]
    pub scan_index: usize,
    /// The index of this peak in its scan's peak set
    pub point_index: usize,
    pub mz: f64,
    pub intensity: f64,
    pub retention_time: f64,
}

/// How to choose the intensity a point must exceed to be considered signal
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NoiseFloor {
    /// A fixed intensity threshold
    Fixed(f64),
    /// The mean of all MS1 intensities plus this many standard deviations
    MeanPlusDeviations(f64),
}

impl Default for NoiseFloor {
    fn default() -> Self {
        Self::MeanPlusDeviations(2.0)
    }
}

impl NoiseFloor {
    pub fn threshold(&self, run: &LcMsRun) -> Result<f64, SlingError> {
        match self {
            Self::Fixed(threshold) => Ok(*threshold),
            Self::MeanPlusDeviations(k) => {
                let intensities = run
                    .scans()
                    .iter()
                    .flat_map(|s| s.peaks.iter().map(|p| p.intensity as f64));
                let (mean, sd) = mean_and_deviation(intensities).ok_or(SlingError::EmptyRun)?;
                debug!("Intensity mean {mean:0.3}, deviation {sd:0.3}");
                Ok(mean + k * sd)
            }
        }
    }
}

/// A one-way bitset over the positions of an arena.
///
/// Used both for peaks claimed by chromatograms and chromatograms claimed by isotope
/// envelopes. Bits can only be set, never cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumptionMask {
    words: Vec<u64>,
    len: usize,
    consumed: usize,
}

impl ConsumptionMask {
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
            len,
            consumed: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Out of range positions read as consumed so they are never handed out
    pub fn is_consumed(&self, position: usize) -> bool {
        if position >= self.len {
            return true;
        }
        self.words[position / 64] & (1 << (position % 64)) != 0
    }

    /// Mark `position` as consumed, returning `false` if it already was
    pub fn consume(&mut self, position: usize) -> bool {
        if self.is_consumed(position) {
            return false;
        }
        self.words[position / 64] |= 1 << (position % 64);
        self.consumed += 1;
        true
    }

    pub fn consumed_count(&self) -> usize {
        self.consumed
    }
}

fn position_key(scan_index: usize, point_index: usize) -> u64 {
    ((scan_index as u64) << 32) | (point_index as u64 & 0xFFFF_FFFF)
}

/// Every MS1 point of a run above the noise threshold, sorted by descending intensity.
///
/// The sort is stable, so equally intense peaks keep acquisition order and then m/z order.
#[derive(Debug, Clone, Default)]
pub struct PeakIndex {
    peaks: Vec<Peak>,
    positions: HashMap<u64, usize, BuildIdentityHasher<u64>>,
    threshold: f64,
}

impl PeakIndex {
    pub fn build(run: &LcMsRun, threshold: f64) -> Self {
        let mut peaks: Vec<Peak> = run
            .scans()
            .iter()
            .enumerate()
            .flat_map(|(scan_index, scan)| {
                scan.peaks
                    .iter()
                    .filter(|p| p.intensity as f64 > threshold)
                    .map(move |p| Peak {
                        scan_index,
                        point_index: p.index as usize,
                        mz: p.mz,
                        intensity: p.intensity as f64,
                        retention_time: scan.retention_time,
                    })
            })
            .collect();
        peaks.sort_by(|a, b| b.intensity.total_cmp(&a.intensity));

        let mut positions = HashMap::default();
        positions.reserve(peaks.len());
        for (i, p) in peaks.iter().enumerate() {
            positions.insert(position_key(p.scan_index, p.point_index), i);
        }
        debug!("Indexed {} peaks above {threshold:0.3}", peaks.len());
        Self {
            peaks,
            positions,
            threshold,
        }
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn get(&self, position: usize) -> Option<&Peak> {
        self.peaks.get(position)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Peak> {
        self.peaks.iter()
    }

    /// The arena position of the point at `point_index` in scan `scan_index`, if it is
    /// above the noise threshold
    pub fn position_of(&self, scan_index: usize, point_index: usize) -> Option<usize> {
        self.positions
            .get(&position_key(scan_index, point_index))
            .copied()
    }

    pub fn new_mask(&self) -> ConsumptionMask {
        ConsumptionMask::new(self.len())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::scan::peak_set;

    fn run() -> LcMsRun {
        LcMsRun::from_ms1([
            (1.0, peak_set(&[100.0, 200.0, 300.0], &[5.0, 50.0, 500.0])),
            (1.1, peak_set(&[100.0, 200.0], &[50.0, 7.0])),
        ])
    }

    #[test]
    fn test_index_order() {
        let run = run();
        let index = PeakIndex::build(&run, 6.0);
        assert_eq!(index.len(), 4);
        let intensities: Vec<_> = index.iter().map(|p| p.intensity).collect();
        assert_eq!(intensities, vec![500.0, 50.0, 50.0, 7.0]);
        // stable: the tie keeps scan order
        assert_eq!(index.get(1).unwrap().scan_index, 0);
        assert_eq!(index.get(2).unwrap().scan_index, 1);
        assert_eq!(index.position_of(1, 1), Some(3));
        assert_eq!(index.position_of(0, 0), None);
    }

    #[test]
    fn test_noise_floor() {
        let run = run();
        assert_eq!(NoiseFloor::Fixed(3.0).threshold(&run).unwrap(), 3.0);
        let t = NoiseFloor::MeanPlusDeviations(0.0).threshold(&run).unwrap();
        assert!((t - 122.4).abs() < 1e-9);
        // population deviation, sqrt(36033.04)
        let t = NoiseFloor::MeanPlusDeviations(1.0).threshold(&run).unwrap();
        assert!((t - 312.22371).abs() < 1e-4);
        assert!(matches!(
            NoiseFloor::default().threshold(&LcMsRun::default()),
            Err(SlingError::EmptyRun)
        ));
    }

    #[test]
    fn test_mask() {
        let mut mask = ConsumptionMask::new(70);
        assert!(!mask.is_consumed(65));
        assert!(mask.consume(65));
        assert!(!mask.consume(65));
        assert!(mask.is_consumed(65));
        assert!(mask.is_consumed(70));
        assert!(!mask.consume(100));
        assert_eq!(mask.consumed_count(), 1);
    }
}
