//! Access to the scans of an LC-MS run.
//!
//! A [`ScanSource`] is anything that can hand out spectra by scan index, in acquisition
//! order. The processing pipeline never walks a [`ScanSource`] directly, it first builds
//! an [`LcMsRun`], which keeps only the MS1 scans, re-indexed densely, and attaches each
//! MS2 scan's fragments to the MS1 point that was selected as its precursor.
use std::collections::HashMap;

use identity_hash::BuildIdentityHasher;
use mzpeaks::prelude::*;
use mzpeaks::{CentroidPeak, PeakSet, Tolerance};
use tracing::{debug, trace};

/// A single MS2 fragment ion, carrying the retention time of the scan it was observed in
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Fragment {
    pub mz: f64,
    pub intensity: f64,
    pub retention_time: f64,
}

impl Fragment {
    pub fn new(mz: f64, intensity: f64, retention_time: f64) -> Self {
        Self {
            mz,
            intensity,
            retention_time,
        }
    }
}

/// Build a [`PeakSet`] from parallel m/z and intensity arrays.
///
/// If the arrays differ in length, the longer one is truncated. Peaks are sorted by m/z
/// and re-indexed.
pub fn peak_set(mz: &[f64], intensity: &[f64]) -> PeakSet {
    PeakSet::new(
        mz.iter()
            .zip(intensity)
            .map(|(mz, intensity)| CentroidPeak::new(*mz, *intensity as f32, 0))
            .collect(),
    )
}

/// Find the most intense peak within `tolerance` of `mz`. Ties go to the lowest m/z.
pub fn most_intense_within(peaks: &PeakSet, mz: f64, tolerance: Tolerance) -> Option<&CentroidPeak> {
    peaks
        .all_peaks_for(mz, tolerance)
        .iter()
        .fold(None, |best: Option<&CentroidPeak>, p| match best {
            Some(b) if p.intensity <= b.intensity => Some(b),
            _ => Some(p),
        })
}

/// A provider of scans in acquisition order.
///
/// Implementations may panic when asked for an index `>= scan_count()`.
pub trait ScanSource {
    fn scan_count(&self) -> usize;
    fn retention_time(&self, index: usize) -> f64;
    fn peaks(&self, index: usize) -> &PeakSet;
    fn ms_level(&self, index: usize) -> u8;
    /// The selected precursor m/z, only meaningful for MSn scans
    fn precursor_mz(&self, index: usize) -> Option<f64>;
}

#[derive(Debug, Clone)]
pub struct Scan {
    pub retention_time: f64,
    pub ms_level: u8,
    pub precursor_mz: Option<f64>,
    pub peaks: PeakSet,
}

impl Scan {
    pub fn new(
        retention_time: f64,
        ms_level: u8,
        precursor_mz: Option<f64>,
        peaks: PeakSet,
    ) -> Self {
        Self {
            retention_time,
            ms_level,
            precursor_mz,
            peaks,
        }
    }

    pub fn ms1(retention_time: f64, peaks: PeakSet) -> Self {
        Self::new(retention_time, 1, None, peaks)
    }

    pub fn ms2(retention_time: f64, precursor_mz: f64, peaks: PeakSet) -> Self {
        Self::new(retention_time, 2, Some(precursor_mz), peaks)
    }
}

/// An in-memory [`ScanSource`]
#[derive(Debug, Clone, Default)]
pub struct ScanStore {
    scans: Vec<Scan>,
}

impl ScanStore {
    pub fn new(scans: Vec<Scan>) -> Self {
        Self { scans }
    }

    pub fn push(&mut self, scan: Scan) {
        self.scans.push(scan)
    }

    pub fn len(&self) -> usize {
        self.scans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scans.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Scan> {
        self.scans.iter()
    }
}

impl FromIterator<Scan> for ScanStore {
    fn from_iter<T: IntoIterator<Item = Scan>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl ScanSource for ScanStore {
    fn scan_count(&self) -> usize {
        self.scans.len()
    }

    fn retention_time(&self, index: usize) -> f64 {
        self.scans[index].retention_time
    }

    fn peaks(&self, index: usize) -> &PeakSet {
        &self.scans[index].peaks
    }

    fn ms_level(&self, index: usize) -> u8 {
        self.scans[index].ms_level
    }

    fn precursor_mz(&self, index: usize) -> Option<f64> {
        self.scans[index].precursor_mz
    }
}

pub(crate) type FragmentMap = HashMap<usize, Vec<Fragment>, BuildIdentityHasher<usize>>;

/// One MS1 scan of an [`LcMsRun`] with the fragments attached to its points
#[derive(Debug, Clone, Default)]
pub struct Ms1Scan {
    /// The index of this scan in the [`ScanSource`] it was read from
    pub source_index: usize,
    pub retention_time: f64,
    pub peaks: PeakSet,
    fragments: FragmentMap,
}

impl Ms1Scan {
    pub fn new(source_index: usize, retention_time: f64, peaks: PeakSet) -> Self {
        Self {
            source_index,
            retention_time,
            peaks,
            fragments: FragmentMap::default(),
        }
    }

    /// The MS2 fragments attached to the peak whose index is `point_index`
    pub fn fragments_at(&self, point_index: usize) -> &[Fragment] {
        self.fragments
            .get(&point_index)
            .map(|v| v.as_slice())
            .unwrap_or_default()
    }

    pub fn attach_fragments(&mut self, point_index: usize, fragments: impl IntoIterator<Item = Fragment>) {
        self.fragments
            .entry(point_index)
            .or_default()
            .extend(fragments);
    }
}

/// The dense sequence of MS1 scans of one sample, which chromatogram tracing walks over
#[derive(Debug, Clone, Default)]
pub struct LcMsRun {
    scans: Vec<Ms1Scan>,
    associated_ms2: usize,
    unassigned_ms2: usize,
}

impl LcMsRun {
    pub fn new(scans: Vec<Ms1Scan>) -> Self {
        Self {
            scans,
            associated_ms2: 0,
            unassigned_ms2: 0,
        }
    }

    /// Build a run of MS1 scans with no fragments from `(retention_time, peaks)` pairs
    pub fn from_ms1(scans: impl IntoIterator<Item = (f64, PeakSet)>) -> Self {
        Self::new(
            scans
                .into_iter()
                .enumerate()
                .map(|(i, (rt, peaks))| Ms1Scan::new(i, rt, peaks))
                .collect(),
        )
    }

    /// Read every scan of `source`, keeping MS1 scans and folding each MS2 scan's
    /// fragments onto the MS1 point nearest its precursor m/z in the most recent MS1 scan.
    ///
    /// MS2 scans without a preceding MS1 scan, without a precursor, or whose precursor
    /// has no MS1 point within `precursor_tolerance` are counted as unassigned.
    pub fn from_source<S: ScanSource + ?Sized>(source: &S, precursor_tolerance: Tolerance) -> Self {
        let mut run = Self::default();
        for i in 0..source.scan_count() {
            let level = source.ms_level(i);
            if level == 1 {
                run.scans.push(Ms1Scan::new(
                    i,
                    source.retention_time(i),
                    source.peaks(i).clone(),
                ));
                continue;
            }
            let target = match (run.scans.last_mut(), source.precursor_mz(i)) {
                (Some(parent), Some(precursor_mz)) => parent
                    .peaks
                    .has_peak(precursor_mz, precursor_tolerance)
                    .map(|peak| peak.index as usize)
                    .map(|point| (parent, point)),
                _ => None,
            };
            match target {
                Some((parent, point)) => {
                    let rt = source.retention_time(i);
                    parent.attach_fragments(
                        point,
                        source
                            .peaks(i)
                            .iter()
                            .map(|p| Fragment::new(p.mz, p.intensity as f64, rt)),
                    );
                    run.associated_ms2 += 1;
                }
                None => {
                    trace!("MS{level} scan {i} could not be associated with an MS1 point");
                    run.unassigned_ms2 += 1;
                }
            }
        }
        debug!(
            "Read {} MS1 scans, associated {} MSn scans, {} unassigned",
            run.scans.len(),
            run.associated_ms2,
            run.unassigned_ms2
        );
        run
    }

    pub fn len(&self) -> usize {
        self.scans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scans.is_empty()
    }

    pub fn scans(&self) -> &[Ms1Scan] {
        &self.scans
    }

    pub fn get(&self, index: usize) -> Option<&Ms1Scan> {
        self.scans.get(index)
    }

    pub fn fragments_at(&self, scan_index: usize, point_index: usize) -> &[Fragment] {
        self.scans
            .get(scan_index)
            .map(|s| s.fragments_at(point_index))
            .unwrap_or_default()
    }

    pub fn associated_ms2_count(&self) -> usize {
        self.associated_ms2
    }

    pub fn unassigned_ms2_count(&self) -> usize {
        self.unassigned_ms2
    }
}
