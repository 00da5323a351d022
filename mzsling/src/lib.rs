//! Trace elution profiles out of LC-MS runs and group them into isotope envelopes.
//!
//! The pipeline for a single sample runs in this order:
//!
//! 1. [`LcMsRun`](crate::scan::LcMsRun) collects the MS1 scans of a [`ScanSource`](crate::scan::ScanSource)
//!    and attaches MS2 fragments to the MS1 points they were selected from.
//! 2. [`PeakIndex`](crate::peaks::PeakIndex) orders every point above the noise floor by
//!    descending intensity.
//! 3. [`Tracer`](crate::chromatogram::Tracer) walks each unclaimed seed across neighbouring
//!    scans to build a [`Chromatogram`](crate::chromatogram::Chromatogram), which splits itself
//!    into [`Isobar`](crate::isobar::Isobar)s.
//! 4. [`EnvelopeBuilder`](crate::envelope::EnvelopeBuilder) infers a charge state and links
//!    correlated isotopic neighbours into an [`IsotopeEnvelope`](crate::envelope::IsotopeEnvelope).
//!
//! [`process_sample`] drives all of these for one run, and [`process_samples`] runs several
//! independent runs in parallel.
pub mod adducts;
pub mod chromatogram;
pub mod envelope;
pub mod error;
pub mod isobar;
pub mod peaks;
pub mod sample;
pub mod scan;
pub mod smooth;
pub mod stats;

pub use adducts::{annotate_envelopes, Adduct, AdductCache, AdductSource, AdductTable};
pub use chromatogram::{Chromatogram, TraceEnd, TraceParams, Tracer, ValidityRule};
pub use envelope::{EnvelopeBuilder, EnvelopeParams, IsotopeEnvelope, NEUTRON_MASS};
pub use error::SlingError;
pub use isobar::{Isobar, IsobarParams};
pub use peaks::{ConsumptionMask, NoiseFloor, Peak, PeakIndex};
pub use sample::{process_sample, process_samples, SampleFeatures, SampleParams, SampleSummary};
pub use scan::{most_intense_within, peak_set, Fragment, LcMsRun, Scan, ScanSource, ScanStore};

pub use mzpeaks::Tolerance;
