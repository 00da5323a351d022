use std::path::Path;

use mzdata::prelude::*;
use mzdata::spectrum::{MultiLayerSpectrum, SignalContinuity};
use mzdata::MZReader;
use mzpeaks::coordinate::Span1D;
use mzpeaks::{PeakCollection, PeakSet, Tolerance};
use tracing::{debug, info, warn};

use mzsling::{LcMsRun, Scan, ScanStore};

use crate::driver::MZSlingerError;
use crate::progress::ProgressRecord;
use crate::time_range::TimeRange;

/// Centroid `spectrum`, picking peaks first if it holds profile data
fn centroid(spectrum: &mut MultiLayerSpectrum) -> Option<PeakSet> {
    if spectrum.signal_continuity() == SignalContinuity::Profile {
        if let Err(e) = spectrum.pick_peaks(1.0) {
            debug!("Failed to pick peaks for {}: {e}", spectrum.id());
            return None;
        }
        spectrum.description_mut().signal_continuity = SignalContinuity::Centroid;
    }
    match spectrum.try_build_centroids() {
        Ok(peaks) => Some(peaks.clone()),
        Err(e) => {
            debug!("Failed to centroid {}: {e}", spectrum.id());
            None
        }
    }
}

/// Read every spectrum of `path` inside `time_range` into a [`ScanStore`]
pub fn read_scans(
    path: &Path,
    time_range: Option<TimeRange>,
) -> Result<(ScanStore, ProgressRecord), MZSlingerError> {
    let reader = MZReader::open_path(path)?;
    let time_range = time_range.unwrap_or_default();
    let mut store = ScanStore::default();
    let mut progress = ProgressRecord::default();

    for mut spectrum in reader {
        let time = spectrum.start_time();
        if !time_range.contains(&time) {
            progress.outside_time_range += 1;
            continue;
        }
        let ms_level = spectrum.ms_level();
        let precursor_mz = spectrum.precursor().map(|p| p.ion().mz);
        let Some(points) = centroid(&mut spectrum) else {
            progress.failed_peak_picking += 1;
            continue;
        };
        if ms_level == 1 {
            progress.ms1_spectra += 1;
            progress.ms1_points += points.len();
            store.push(Scan::ms1(time, points));
        } else if let Some(precursor_mz) = precursor_mz {
            progress.msn_spectra += 1;
            progress.msn_points += points.len();
            store.push(Scan::new(time, ms_level, Some(precursor_mz), points));
        } else {
            warn!(
                "MS{ms_level} spectrum {} has no precursor and was skipped",
                spectrum.id()
            );
        }
    }
    Ok((store, progress))
}

/// Read `path` and associate its MS2 spectra with MS1 points
pub fn read_run(
    path: &Path,
    time_range: Option<TimeRange>,
    precursor_tolerance: Tolerance,
) -> Result<(LcMsRun, ProgressRecord), MZSlingerError> {
    let (store, progress) = read_scans(path, time_range)?;
    let run = LcMsRun::from_source(&store, precursor_tolerance);
    info!(
        "{}: MS1 Spectra: {} | MSn Spectra: {} | Associated MSn: {}",
        path.display(),
        progress.ms1_spectra,
        progress.msn_spectra,
        run.associated_ms2_count()
    );
    Ok((run, progress))
}
