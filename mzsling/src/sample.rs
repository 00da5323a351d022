//! The construction phase for one sample, from MS1 scans to isotope envelopes.
//!
//! Within a sample everything runs sequentially, since each seed must see which peaks and
//! chromatograms the more intense seeds before it have already claimed. Separate samples
//! share nothing and may be processed in parallel with [`process_samples`].
use std::ops::{Add, AddAssign};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::chromatogram::{Chromatogram, TraceParams, Tracer};
use crate::envelope::{EnvelopeBuilder, EnvelopeParams, IsotopeEnvelope};
use crate::error::SlingError;
use crate::peaks::{ConsumptionMask, NoiseFloor, PeakIndex};
use crate::scan::LcMsRun;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SampleParams {
    pub noise: NoiseFloor,
    pub trace: TraceParams,
    pub envelope: EnvelopeParams,
}

/// Counts describing what the construction phase did with one sample
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SampleSummary {
    pub ms1_scans: usize,
    pub noise_threshold: f64,
    pub indexed_peaks: usize,
    pub consumed_peaks: usize,
    pub chromatograms: usize,
    pub valid_chromatograms: usize,
    pub envelopes: usize,
    pub unassigned_ms2: usize,
}

impl Add for SampleSummary {
    type Output = SampleSummary;

    fn add(self, rhs: Self) -> Self::Output {
        let mut dup = self;
        dup += rhs;
        dup
    }
}

impl AddAssign for SampleSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.ms1_scans += rhs.ms1_scans;
        self.noise_threshold = self.noise_threshold.max(rhs.noise_threshold);
        self.indexed_peaks += rhs.indexed_peaks;
        self.consumed_peaks += rhs.consumed_peaks;
        self.chromatograms += rhs.chromatograms;
        self.valid_chromatograms += rhs.valid_chromatograms;
        self.envelopes += rhs.envelopes;
        self.unassigned_ms2 += rhs.unassigned_ms2;
    }
}

/// The finished isotope envelopes of one sample
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SampleFeatures {
    pub sample: usize,
    pub envelopes: Vec<IsotopeEnvelope>,
    pub summary: SampleSummary,
}

/// Trace a chromatogram from every unclaimed peak of `index`, most intense first.
///
/// Returns the chromatograms in creation order and the final peak consumption mask.
pub fn trace_chromatograms(
    run: &LcMsRun,
    index: &PeakIndex,
    params: &TraceParams,
) -> (Vec<Chromatogram>, ConsumptionMask) {
    let tracer = Tracer::new(run, index, params);
    let mut mask = index.new_mask();
    let mut chromatograms = Vec::new();
    for seed in 0..index.len() {
        if mask.is_consumed(seed) {
            continue;
        }
        let Some(trace) = tracer.trace(seed, &mask) else {
            continue;
        };
        for position in trace.claimed {
            if !mask.consume(position) {
                warn!("Peak {position} was claimed twice while tracing seed {seed}");
            }
        }
        chromatograms.push(trace.chromatogram);
    }
    (chromatograms, mask)
}

/// Group `chromatograms` into isotope envelopes, seeding from valid chromatograms in
/// the order given. Chromatograms that end up in no envelope are dropped.
pub fn build_envelopes(
    chromatograms: Vec<Chromatogram>,
    params: &SampleParams,
) -> Vec<IsotopeEnvelope> {
    let plans = {
        let builder = EnvelopeBuilder::new(&chromatograms, &params.envelope);
        let mut clustered = ConsumptionMask::new(chromatograms.len());
        let mut plans = Vec::new();
        for (seed, chromatogram) in chromatograms.iter().enumerate() {
            if clustered.is_consumed(seed) || !params.trace.validity.accepts(chromatogram) {
                continue;
            }
            let plan = builder.build(seed, &clustered);
            for member in plan.members.iter() {
                if !clustered.consume(*member) {
                    warn!("Chromatogram {member} was claimed by two envelopes");
                }
            }
            plans.push(plan);
        }
        plans
    };

    let mut slots: Vec<Option<Chromatogram>> = chromatograms.into_iter().map(Some).collect();
    plans
        .into_iter()
        .filter_map(|plan| {
            let members: Vec<Chromatogram> = plan
                .members
                .iter()
                .filter_map(|i| slots[*i].take())
                .collect();
            IsotopeEnvelope::new(members, plan.anchor, plan.charge, params.envelope.ppm)
        })
        .collect()
}

/// Run the whole construction phase for one sample
pub fn process_sample(
    sample: usize,
    run: &LcMsRun,
    params: &SampleParams,
) -> Result<SampleFeatures, SlingError> {
    let threshold = params.noise.threshold(run)?;
    let index = PeakIndex::build(run, threshold);
    if index.is_empty() {
        return Err(SlingError::NoPeaksAboveNoise(threshold));
    }

    let (chromatograms, mask) = trace_chromatograms(run, &index, &params.trace);
    let valid_chromatograms = chromatograms
        .iter()
        .filter(|c| params.trace.validity.accepts(c))
        .count();
    let n_chromatograms = chromatograms.len();
    debug!(
        "Sample {sample}: {n_chromatograms} chromatograms, {valid_chromatograms} valid, from {} peaks",
        index.len()
    );

    let envelopes = build_envelopes(chromatograms, params);
    let summary = SampleSummary {
        ms1_scans: run.len(),
        noise_threshold: threshold,
        indexed_peaks: index.len(),
        consumed_peaks: mask.consumed_count(),
        chromatograms: n_chromatograms,
        valid_chromatograms,
        envelopes: envelopes.len(),
        unassigned_ms2: run.unassigned_ms2_count(),
    };
    info!(
        "Sample {sample}: {} isotope envelopes above a noise floor of {threshold:0.2}",
        envelopes.len()
    );
    Ok(SampleFeatures {
        sample,
        envelopes,
        summary,
    })
}

/// Process independent samples in parallel. Each result is numbered by its position in
/// `runs`, and a failure in one sample does not affect the others.
pub fn process_samples(
    runs: &[LcMsRun],
    params: &SampleParams,
) -> Vec<Result<SampleFeatures, SlingError>> {
    runs.par_iter()
        .enumerate()
        .map(|(sample, run)| process_sample(sample, run, params))
        .collect()
}

#[cfg(test)]
pub(crate) mod test {
    use std::collections::HashSet;

    use super::*;
    use crate::envelope::NEUTRON_MASS;
    use crate::scan::peak_set;

    const ISOTOPE_RATIOS: [f64; 3] = [1.0, 0.6, 0.3];

    /// A compound's monoisotopic m/z, charge, apex scan, apex height and isotope count
    pub(crate) type Compound = (f64, i32, usize, f64, usize);

    /// Gaussian elution profiles two scans wide, 0.01 time units per scan, with a few
    /// low intensity noise points in every scan
    pub(crate) fn synthetic_run(compounds: &[Compound], n_scans: usize) -> LcMsRun {
        LcMsRun::from_ms1((0..n_scans).map(|scan| {
            let mut mzs = Vec::new();
            let mut intensities = Vec::new();
            for (mz, charge, apex, height, isotopes) in compounds.iter() {
                let d = scan as f64 - *apex as f64;
                let shape = (-d * d / 8.0).exp();
                for (k, ratio) in ISOTOPE_RATIOS.iter().take(*isotopes).enumerate() {
                    let intensity = height * ratio * shape;
                    if intensity > 1.0 {
                        mzs.push(mz + k as f64 * NEUTRON_MASS / *charge as f64);
                        intensities.push(intensity);
                    }
                }
            }
            for j in 0..3 {
                mzs.push(150.0 + ((scan * 7 + j * 13) % 50) as f64 * 3.1);
                intensities.push(5.0);
            }
            (scan as f64 * 0.01, peak_set(&mzs, &intensities))
        }))
    }

    fn params() -> SampleParams {
        SampleParams {
            noise: NoiseFloor::Fixed(20.0),
            ..Default::default()
        }
    }

    #[test_log::test]
    fn test_process_sample() {
        let run = synthetic_run(
            &[(400.0, 1, 20, 1000.0, 3), (600.0, 2, 40, 2000.0, 3), (800.0, 1, 60, 900.0, 1)],
            80,
        );
        let features = process_sample(3, &run, &params()).unwrap();
        assert_eq!(features.sample, 3);
        assert_eq!(features.envelopes.len(), 3);
        assert_eq!(features.summary.envelopes, 3);

        let mut envelopes: Vec<_> = features.envelopes.iter().collect();
        envelopes.sort_by(|a, b| a.anchor_mz().total_cmp(&b.anchor_mz()));

        assert_eq!(envelopes[0].charge(), 1);
        assert_eq!(envelopes[0].len(), 3);
        assert_eq!(envelopes[0].anchor_index(), 0);
        assert!((envelopes[0].anchor_mz() - 400.0).abs() < 1e-6);
        assert!((envelopes[0].anchor_time() - 0.2).abs() < 1e-9);

        assert_eq!(envelopes[1].charge(), 2);
        assert_eq!(envelopes[1].len(), 3);

        assert_eq!(envelopes[2].charge(), 1);
        assert_eq!(envelopes[2].len(), 1);
    }

    #[test]
    fn test_consumption_is_exclusive() {
        let run = synthetic_run(
            &[(400.0, 1, 20, 1000.0, 3), (400.002, 1, 24, 600.0, 1), (510.0, 3, 30, 800.0, 3)],
            60,
        );
        let index = PeakIndex::build(&run, 20.0);
        let (chromatograms, mask) = trace_chromatograms(&run, &index, &TraceParams::default());

        let mut seen = HashSet::new();
        let mut total = 0;
        for c in chromatograms.iter() {
            for p in c.peaks() {
                assert!(seen.insert((p.scan_index, p.point_index)), "{p:?} claimed twice");
                total += 1;
            }
        }
        assert_eq!(total, mask.consumed_count());
        assert_eq!(total, index.len());
    }

    #[test]
    fn test_sample_order_invariance() {
        let a = synthetic_run(&[(400.0, 1, 20, 1000.0, 3), (700.0, 2, 35, 1500.0, 2)], 60);
        let b = synthetic_run(&[(450.0, 1, 15, 1200.0, 3), (650.0, 3, 40, 1800.0, 3)], 60);
        let forward = process_samples(&[a.clone(), b.clone()], &params());
        let backward = process_samples(&[b, a], &params());

        let forward: Vec<_> = forward.into_iter().map(|r| r.unwrap().envelopes).collect();
        let backward: Vec<_> = backward.into_iter().map(|r| r.unwrap().envelopes).collect();
        assert_eq!(forward[0], backward[1]);
        assert_eq!(forward[1], backward[0]);
    }

    #[test]
    fn test_failures_are_isolated() {
        let good = synthetic_run(&[(400.0, 1, 20, 1000.0, 3)], 40);
        let results = process_samples(&[LcMsRun::default(), good], &SampleParams::default());
        assert!(matches!(results[0], Err(SlingError::EmptyRun)));
        assert!(results[1].is_ok());

        let quiet = synthetic_run(&[], 10);
        let result = process_sample(0, &quiet, &params());
        assert!(matches!(result, Err(SlingError::NoPeaksAboveNoise(_))));
    }
}
