//! Tracing single m/z signals across consecutive MS1 scans.
//!
//! A [`Tracer`] starts from a seed [`Peak`] and walks outward one scan at a time, taking
//! the most intense point within a ppm window of the running mean m/z of everything it
//! has accepted so far. Each direction ends at the first scan with nothing above the
//! noise threshold, at a point another chromatogram already owns, or at the edge of
//! the run.
use mzpeaks::Tolerance;
use tracing::trace;

use crate::isobar::{split_isobars, Isobar, IsobarParams};
use crate::peaks::{ConsumptionMask, Peak, PeakIndex};
use crate::scan::{most_intense_within, Fragment, LcMsRun};

/// Conditions a chromatogram must meet to seed an isotope envelope
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ValidityRule {
    /// The chromatogram must have strictly more points than this
    pub min_points: usize,
    /// The ratio of the most to the least intense point must exceed this
    pub min_intensity_ratio: f64,
    /// The most intense point must exceed this multiple of the noise threshold
    pub threshold_multiple: f64,
    /// The retention time span must be strictly less than this
    pub max_time_span: f64,
}

impl Default for ValidityRule {
    fn default() -> Self {
        Self {
            min_points: 5,
            min_intensity_ratio: 5.0,
            threshold_multiple: 5.0,
            max_time_span: 0.5,
        }
    }
}

impl ValidityRule {
    pub fn accepts(&self, chromatogram: &Chromatogram) -> bool {
        let max = chromatogram.max_intensity();
        let min = chromatogram.min_intensity();
        chromatogram.len() > self.min_points
            && min > 0.0
            && max / min > self.min_intensity_ratio
            && max > self.threshold_multiple * chromatogram.threshold()
            && chromatogram.time_span() < self.max_time_span
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TraceParams {
    pub ppm: f64,
    pub validity: ValidityRule,
    pub isobars: IsobarParams,
}

impl Default for TraceParams {
    fn default() -> Self {
        Self {
            ppm: 20.0,
            validity: ValidityRule::default(),
            isobars: IsobarParams::default(),
        }
    }
}

impl TraceParams {
    pub fn new(ppm: f64) -> Self {
        Self {
            ppm,
            ..Default::default()
        }
    }
}

/// Why a trace stopped walking in one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TraceEnd {
    /// No point above the noise threshold in the next scan's window
    #[default]
    Boundary,
    /// The first or last scan of the run was reached
    EndOfRun,
    /// The best point in the next scan already belongs to another chromatogram
    Claimed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

/// The elution profile of one m/z signal
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Chromatogram {
    peaks: Vec<Peak>,
    mean_mz: f64,
    ppm: f64,
    threshold: f64,
    seed_index: usize,
    smoothed: Vec<f64>,
    isobars: Vec<Isobar>,
    fragments: Vec<Fragment>,
    ends: (TraceEnd, TraceEnd),
}

impl Chromatogram {
    /// Assemble a chromatogram from `peaks` in ascending scan order, with the seed
    /// at `seed_index`.
    ///
    /// Returns `None` if `peaks` is empty or `seed_index` is out of bounds.
    pub fn from_peaks(
        peaks: Vec<Peak>,
        seed_index: usize,
        ppm: f64,
        threshold: f64,
        isobar_params: &IsobarParams,
    ) -> Option<Self> {
        if seed_index >= peaks.len() {
            return None;
        }
        let mean_mz = peaks.iter().map(|p| p.mz).sum::<f64>() / peaks.len() as f64;
        let (smoothed, isobars) = split_isobars(&peaks, isobar_params);
        Some(Self {
            peaks,
            mean_mz,
            ppm,
            threshold,
            seed_index,
            smoothed,
            isobars,
            fragments: Vec::new(),
            ends: Default::default(),
        })
    }

    pub fn with_fragments(mut self, fragments: Vec<Fragment>) -> Self {
        self.fragments = fragments;
        self
    }

    pub fn peaks(&self) -> &[Peak] {
        &self.peaks
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn mean_mz(&self) -> f64 {
        self.mean_mz
    }

    pub fn ppm(&self) -> f64 {
        self.ppm
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn seed_index(&self) -> usize {
        self.seed_index
    }

    pub fn seed(&self) -> &Peak {
        &self.peaks[self.seed_index]
    }

    /// The retention time of the seed, which is the trace's apex unless a more intense
    /// point was reached from a less intense seed
    pub fn seed_time(&self) -> f64 {
        self.seed().retention_time
    }

    pub fn smoothed(&self) -> &[f64] {
        &self.smoothed
    }

    pub fn isobars(&self) -> &[Isobar] {
        &self.isobars
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// How the (lower, upper) scan walks ended
    pub fn ends(&self) -> (TraceEnd, TraceEnd) {
        self.ends
    }

    pub fn start_time(&self) -> f64 {
        self.peaks[0].retention_time
    }

    pub fn end_time(&self) -> f64 {
        self.peaks[self.peaks.len() - 1].retention_time
    }

    pub fn time_span(&self) -> f64 {
        self.end_time() - self.start_time()
    }

    pub fn first_scan(&self) -> usize {
        self.peaks[0].scan_index
    }

    pub fn last_scan(&self) -> usize {
        self.peaks[self.peaks.len() - 1].scan_index
    }

    pub fn max_intensity(&self) -> f64 {
        self.peaks
            .iter()
            .map(|p| p.intensity)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn min_intensity(&self) -> f64 {
        self.peaks
            .iter()
            .map(|p| p.intensity)
            .fold(f64::INFINITY, f64::min)
    }

    pub fn total_intensity(&self) -> f64 {
        self.peaks.iter().map(|p| p.intensity).sum()
    }

    /// Intensities of this and `other` at the scans both traces cover, in scan order
    pub fn shared_intensities(&self, other: &Self) -> (Vec<f64>, Vec<f64>) {
        let mut a = Vec::new();
        let mut b = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.peaks.len() && j < other.peaks.len() {
            let si = self.peaks[i].scan_index;
            let sj = other.peaks[j].scan_index;
            if si == sj {
                a.push(self.peaks[i].intensity);
                b.push(other.peaks[j].intensity);
                i += 1;
                j += 1;
            } else if si < sj {
                i += 1;
            } else {
                j += 1;
            }
        }
        (a, b)
    }
}

/// The result of a successful trace: the chromatogram and the arena positions of the
/// peaks it claims, which the caller is responsible for marking consumed.
#[derive(Debug, Clone)]
pub struct Trace {
    pub chromatogram: Chromatogram,
    pub claimed: Vec<usize>,
}

/// Builds chromatograms from seeds drawn from a [`PeakIndex`]
#[derive(Debug, Clone, Copy)]
pub struct Tracer<'a> {
    run: &'a LcMsRun,
    index: &'a PeakIndex,
    params: &'a TraceParams,
}

struct Walk {
    peaks: Vec<Peak>,
    claimed: Vec<usize>,
    end: TraceEnd,
}

impl<'a> Tracer<'a> {
    pub fn new(run: &'a LcMsRun, index: &'a PeakIndex, params: &'a TraceParams) -> Self {
        Self { run, index, params }
    }

    /// Trace the peak at arena position `seed` in both directions.
    ///
    /// Returns `None` if `seed` is out of bounds or already consumed. `mask` is only read,
    /// so a trace never claims anything on its own.
    pub fn trace(&self, seed: usize, mask: &ConsumptionMask) -> Option<Trace> {
        if mask.is_consumed(seed) {
            return None;
        }
        let seed_peak = *self.index.get(seed)?;

        let mut mz_sum = seed_peak.mz;
        let mut count = 1usize;
        let above = self.walk(&seed_peak, Direction::Up, &mut mz_sum, &mut count, mask);
        let below = self.walk(&seed_peak, Direction::Down, &mut mz_sum, &mut count, mask);

        let seed_index = below.peaks.len();
        let mut peaks = Vec::with_capacity(below.peaks.len() + above.peaks.len() + 1);
        peaks.extend(below.peaks.into_iter().rev());
        peaks.push(seed_peak);
        peaks.extend(above.peaks);

        let mut fragments = Vec::new();
        for p in peaks.iter() {
            fragments.extend_from_slice(self.run.fragments_at(p.scan_index, p.point_index));
        }

        let mut claimed = Vec::with_capacity(peaks.len());
        claimed.push(seed);
        claimed.extend(below.claimed);
        claimed.extend(above.claimed);

        trace!(
            "Traced {:0.4} at scan {} across {} scans, ended {:?}/{:?}",
            seed_peak.mz,
            seed_peak.scan_index,
            peaks.len(),
            below.end,
            above.end
        );

        let mut chromatogram = Chromatogram::from_peaks(
            peaks,
            seed_index,
            self.params.ppm,
            self.index.threshold(),
            &self.params.isobars,
        )?
        .with_fragments(fragments);
        chromatogram.ends = (below.end, above.end);
        Some(Trace {
            chromatogram,
            claimed,
        })
    }

    fn walk(
        &self,
        seed: &Peak,
        direction: Direction,
        mz_sum: &mut f64,
        count: &mut usize,
        mask: &ConsumptionMask,
    ) -> Walk {
        let tolerance = Tolerance::PPM(self.params.ppm);
        let threshold = self.index.threshold();
        let mut peaks = Vec::new();
        let mut claimed = Vec::new();
        let mut scan_index = seed.scan_index;

        let end = loop {
            let next = match direction {
                Direction::Up => scan_index + 1,
                Direction::Down => match scan_index.checked_sub(1) {
                    Some(i) => i,
                    None => break TraceEnd::EndOfRun,
                },
            };
            let Some(scan) = self.run.get(next) else {
                break TraceEnd::EndOfRun;
            };
            let mean = *mz_sum / *count as f64;
            let Some(peak) = most_intense_within(&scan.peaks, mean, tolerance) else {
                break TraceEnd::Boundary;
            };
            let (point, mz, intensity) = (peak.index as usize, peak.mz, peak.intensity as f64);
            if intensity <= threshold {
                break TraceEnd::Boundary;
            }
            let Some(position) = self.index.position_of(next, point) else {
                break TraceEnd::Boundary;
            };
            if mask.is_consumed(position) {
                break TraceEnd::Claimed;
            }
            peaks.push(Peak {
                scan_index: next,
                point_index: point,
                mz,
                intensity,
                retention_time: scan.retention_time,
            });
            claimed.push(position);
            *mz_sum += mz;
            *count += 1;
            scan_index = next;
        };
        Walk {
            peaks,
            claimed,
            end,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::scan::{peak_set, Ms1Scan};
    use mzpeaks::PeakSet;

    fn scenario_run() -> LcMsRun {
        let mut scans: Vec<(f64, PeakSet)> = (0..20)
            .map(|i| (i as f64 * 0.01, PeakSet::empty()))
            .collect();
        scans[9].1 = peak_set(&[499.9995, 650.0], &[800.0, 900.0]);
        scans[10].1 = peak_set(&[500.0], &[1000.0]);
        scans[11].1 = peak_set(&[500.0004], &[800.0]);
        scans[12].1 = peak_set(&[500.2], &[700.0]);
        LcMsRun::from_ms1(scans)
    }

    #[test_log::test]
    fn test_trace_scenario() {
        let run = scenario_run();
        let index = PeakIndex::build(&run, 100.0);
        let params = TraceParams::new(20.0);
        let tracer = Tracer::new(&run, &index, &params);
        let mut mask = index.new_mask();

        let seed = index.iter().position(|p| p.mz == 500.0).unwrap();
        let trace = tracer.trace(seed, &mask).unwrap();
        let chrom = &trace.chromatogram;
        assert_eq!(chrom.len(), 3);
        assert_eq!(chrom.seed_index(), 1);
        assert_eq!(chrom.first_scan(), 9);
        assert_eq!(chrom.last_scan(), 11);
        assert_eq!(chrom.ends(), (TraceEnd::Boundary, TraceEnd::Boundary));
        assert_eq!(trace.claimed.len(), 3);
        assert_eq!(trace.claimed[0], seed);

        for p in trace.claimed.iter() {
            assert!(mask.consume(*p));
        }
        assert!(tracer.trace(seed, &mask).is_none());
    }

    #[test]
    fn test_trace_respects_tolerance() {
        let run = scenario_run();
        let index = PeakIndex::build(&run, 100.0);
        let params = TraceParams::new(20.0);
        let tracer = Tracer::new(&run, &index, &params);
        let mask = index.new_mask();
        let trace = tracer
            .trace(index.iter().position(|p| p.mz == 500.0).unwrap(), &mask)
            .unwrap();
        let chrom = trace.chromatogram;
        // 500.2 is far outside 20 ppm of the running mean, 650 is another signal
        assert!(chrom.peaks().iter().all(|p| (p.mz - 500.0).abs() < 0.01));
        assert!((chrom.mean_mz() - 499.99997).abs() < 1e-4);
    }

    #[test]
    fn test_trace_stops_at_claimed_and_edges() {
        let run = LcMsRun::from_ms1((0..4).map(|i| {
            (
                i as f64 * 0.01,
                peak_set(&[300.0], &[200.0 + i as f64 * 100.0]),
            )
        }));
        let index = PeakIndex::build(&run, 50.0);
        let params = TraceParams::default();
        let tracer = Tracer::new(&run, &index, &params);
        let mut mask = index.new_mask();

        // claim scan 1's peak, then trace from scan 3 downward
        assert!(mask.consume(index.position_of(1, 0).unwrap()));
        let trace = tracer.trace(index.position_of(3, 0).unwrap(), &mask).unwrap();
        assert_eq!(trace.chromatogram.len(), 2);
        assert_eq!(
            trace.chromatogram.ends(),
            (TraceEnd::Claimed, TraceEnd::EndOfRun)
        );
    }

    #[test]
    fn test_fragments_follow_peaks() {
        let mut first = Ms1Scan::new(0, 0.0, peak_set(&[300.0], &[500.0]));
        first.attach_fragments(0, [Fragment::new(120.0, 10.0, 0.001)]);
        let second = Ms1Scan::new(1, 0.01, peak_set(&[300.001], &[400.0]));
        let run = LcMsRun::new(vec![first, second]);
        let index = PeakIndex::build(&run, 10.0);
        let params = TraceParams::default();
        let tracer = Tracer::new(&run, &index, &params);
        let trace = tracer.trace(1, &index.new_mask()).unwrap();
        assert_eq!(trace.chromatogram.len(), 2);
        assert_eq!(trace.chromatogram.fragments().len(), 1);
    }

    #[test]
    fn test_validity_rule() {
        let rule = ValidityRule::default();
        let make = |intensities: &[f64], dt: f64| {
            let peaks = intensities
                .iter()
                .enumerate()
                .map(|(i, v)| Peak {
                    scan_index: i,
                    point_index: 0,
                    mz: 400.0,
                    intensity: *v,
                    retention_time: i as f64 * dt,
                })
                .collect();
            Chromatogram::from_peaks(peaks, 2, 20.0, 100.0, &IsobarParams::default()).unwrap()
        };
        assert!(rule.accepts(&make(&[110.0, 400.0, 900.0, 600.0, 300.0, 150.0], 0.01)));
        // too few points
        assert!(!rule.accepts(&make(&[110.0, 400.0, 900.0, 600.0, 150.0], 0.01)));
        // too shallow
        assert!(!rule.accepts(&make(&[300.0, 400.0, 900.0, 600.0, 300.0, 250.0], 0.01)));
        // not far enough above the noise
        assert!(!rule.accepts(&make(&[101.0, 300.0, 450.0, 300.0, 200.0, 102.0], 0.01)));
        // too wide
        assert!(!rule.accepts(&make(&[110.0, 400.0, 900.0, 600.0, 300.0, 150.0], 0.2)));
    }
}
