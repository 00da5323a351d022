use std::collections::BTreeMap;

use itertools::Itertools;
use mzpeaks::Tolerance;
use thiserror::Error;
use tracing::{debug, info, trace};

use mzsling::stats::median;
use mzsling::{IsotopeEnvelope, SampleFeatures};

use crate::dbscan::Dbscan;
use crate::fragments::FragmentClusterer;
use crate::group::{AlignedGroup, AlignedMember};
use crate::rescale::Rescaler;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AlignmentError {
    #[error("No isotope envelopes were available to align")]
    NoEnvelopes,
    #[error("Aligned group at m/z {mz:0.4}, time {time:0.3} has no unique charge: {modes:?}")]
    AmbiguousCharge { mz: f64, time: f64, modes: Vec<i32> },
}

/// A way of matching the isotope envelopes of many samples to one another
pub trait AlignmentStrategy {
    /// Consume the finished envelopes of every sample and group them. Each envelope
    /// ends up in at most one [`AlignedGroup`]; the rest are discarded.
    fn align(&self, samples: Vec<SampleFeatures>) -> Result<Vec<AlignedGroup>, AlignmentError>;
}

/// The number of other members a group must be supported by, `n_samples - 2` unless set
fn support_floor(min_neighbors: Option<usize>, n_samples: usize) -> usize {
    min_neighbors.unwrap_or(n_samples.saturating_sub(2))
}

fn distance(a: [f64; 2], b: [f64; 2]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

fn fit_anchors(samples: &[SampleFeatures]) -> Result<Rescaler, AlignmentError> {
    Rescaler::fit(
        samples
            .iter()
            .flat_map(|s| s.envelopes.iter())
            .map(|e| (e.anchor_mz(), e.anchor_time())),
    )
}

/// DBSCAN over the rescaled envelope anchors of every sample
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DensityAligner {
    /// The neighbourhood radius on the unit square
    pub epsilon: f64,
    /// Overrides the `n_samples - 2` support floor
    pub min_neighbors: Option<usize>,
    pub fragments: FragmentClusterer,
}

impl Default for DensityAligner {
    fn default() -> Self {
        Self {
            epsilon: 0.005,
            min_neighbors: None,
            fragments: FragmentClusterer::default(),
        }
    }
}

impl DensityAligner {
    pub fn new(epsilon: f64, min_neighbors: Option<usize>) -> Self {
        Self {
            epsilon,
            min_neighbors,
            ..Default::default()
        }
    }

    pub fn with_fragments(mut self, fragments: FragmentClusterer) -> Self {
        self.fragments = fragments;
        self
    }

    /// Keep one point per sample from a cluster, the one nearest the cluster's median.
    /// Ties go to the lower point index.
    fn one_per_sample(cluster: &[usize], samples: &[usize], points: &[[f64; 2]]) -> Vec<usize> {
        let xs: Vec<f64> = cluster.iter().map(|i| points[*i][0]).collect();
        let ys: Vec<f64> = cluster.iter().map(|i| points[*i][1]).collect();
        let (Some(cx), Some(cy)) = (median(&xs), median(&ys)) else {
            return Vec::new();
        };
        let mut best: BTreeMap<usize, (usize, f64)> = BTreeMap::new();
        for i in cluster.iter().copied() {
            let d = distance(points[i], [cx, cy]);
            best.entry(samples[i])
                .and_modify(|current| {
                    if d < current.1 {
                        *current = (i, d);
                    }
                })
                .or_insert((i, d));
        }
        if best.len() < cluster.len() {
            debug!(
                "Dropped {} same-sample envelopes from a cluster of {}",
                cluster.len() - best.len(),
                cluster.len()
            );
        }
        best.into_values().map(|(i, _)| i).sorted().collect()
    }
}

impl AlignmentStrategy for DensityAligner {
    fn align(&self, samples: Vec<SampleFeatures>) -> Result<Vec<AlignedGroup>, AlignmentError> {
        let n_samples = samples.len();
        let rescaler = fit_anchors(&samples)?;
        let min_neighbors = support_floor(self.min_neighbors, n_samples);

        let mut owners = Vec::new();
        let mut slots: Vec<Option<IsotopeEnvelope>> = Vec::new();
        for features in samples {
            for envelope in features.envelopes {
                owners.push(features.sample);
                slots.push(Some(envelope));
            }
        }
        let points: Vec<[f64; 2]> = slots
            .iter()
            .flatten()
            .map(|e| rescaler.normalize(e.anchor_mz(), e.anchor_time()))
            .collect();

        let clusters = Dbscan::new(self.epsilon, min_neighbors).cluster(&points);
        trace!(
            "{} density clusters from {} envelopes with min_neighbors {min_neighbors}",
            clusters.len(),
            points.len()
        );

        let groups: Vec<AlignedGroup> = clusters
            .into_iter()
            .filter_map(|cluster| {
                let kept = Self::one_per_sample(&cluster, &owners, &points);
                if kept.len() < min_neighbors + 1 {
                    debug!(
                        "Discarding a cluster of {} envelopes from only {} samples",
                        cluster.len(),
                        kept.len()
                    );
                    return None;
                }
                let xs: Vec<f64> = kept.iter().map(|i| points[*i][0]).collect();
                let ys: Vec<f64> = kept.iter().map(|i| points[*i][1]).collect();
                let (mz, rt) = rescaler.reproject([median(&xs)?, median(&ys)?]);
                let members: Vec<AlignedMember> = kept
                    .iter()
                    .filter_map(|i| {
                        slots[*i].take().map(|envelope| AlignedMember {
                            sample: owners[*i],
                            envelope,
                        })
                    })
                    .collect();
                Some(AlignedGroup::new(members, mz, rt, &self.fragments))
            })
            .collect();
        info!(
            "Aligned {} groups across {n_samples} samples",
            groups.len()
        );
        Ok(groups)
    }
}

/// Seed-and-extend alignment: each unused envelope in turn takes, from every other
/// sample, the candidate nearest the running consensus inside an m/z and time gate.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IncrementalAligner {
    pub ppm: f64,
    /// The largest retention time difference from the running consensus
    pub time_window: f64,
    pub min_neighbors: Option<usize>,
    pub fragments: FragmentClusterer,
}

impl Default for IncrementalAligner {
    fn default() -> Self {
        Self {
            ppm: 20.0,
            time_window: 0.5,
            min_neighbors: None,
            fragments: FragmentClusterer::default(),
        }
    }
}

impl IncrementalAligner {
    pub fn new(ppm: f64, time_window: f64, min_neighbors: Option<usize>) -> Self {
        Self {
            ppm,
            time_window,
            min_neighbors,
            ..Default::default()
        }
    }

    pub fn with_fragments(mut self, fragments: FragmentClusterer) -> Self {
        self.fragments = fragments;
        self
    }

    fn nearest(
        &self,
        candidates: &[Option<IsotopeEnvelope>],
        consensus: (f64, f64),
        rescaler: &Rescaler,
    ) -> Option<usize> {
        let (low, high) = Tolerance::PPM(self.ppm).bounds(consensus.0);
        let target = rescaler.normalize(consensus.0, consensus.1);
        candidates
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (i, e)))
            .filter(|(_, e)| {
                let mz = e.anchor_mz();
                mz >= low && mz <= high && (e.anchor_time() - consensus.1).abs() <= self.time_window
            })
            .map(|(i, e)| {
                let d = distance(rescaler.normalize(e.anchor_mz(), e.anchor_time()), target);
                (i, d)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }
}

impl AlignmentStrategy for IncrementalAligner {
    fn align(&self, samples: Vec<SampleFeatures>) -> Result<Vec<AlignedGroup>, AlignmentError> {
        let n_samples = samples.len();
        let rescaler = fit_anchors(&samples)?;
        let min_neighbors = support_floor(self.min_neighbors, n_samples);

        let ids: Vec<usize> = samples.iter().map(|s| s.sample).collect();
        let mut pool: Vec<Vec<Option<IsotopeEnvelope>>> = samples
            .into_iter()
            .map(|s| s.envelopes.into_iter().map(Some).collect())
            .collect();

        let mut groups = Vec::new();
        for seed_sample in 0..pool.len() {
            for seed_index in 0..pool[seed_sample].len() {
                let Some(seed) = pool[seed_sample][seed_index].take() else {
                    continue;
                };
                let mut mzs = vec![seed.anchor_mz()];
                let mut rts = vec![seed.anchor_time()];
                let mut consensus = (seed.anchor_mz(), seed.anchor_time());
                let mut picked: Vec<(usize, usize)> = Vec::new();

                for other in (0..pool.len()).filter(|s| *s != seed_sample) {
                    let Some(i) = self.nearest(&pool[other], consensus, &rescaler) else {
                        continue;
                    };
                    if let Some(e) = pool[other][i].as_ref() {
                        mzs.push(e.anchor_mz());
                        rts.push(e.anchor_time());
                        consensus = (
                            median(&mzs).unwrap_or(consensus.0),
                            median(&rts).unwrap_or(consensus.1),
                        );
                        picked.push((other, i));
                    }
                }

                if picked.len() < min_neighbors {
                    trace!(
                        "Seed at m/z {:0.4} found {} partners, fewer than {min_neighbors}",
                        seed.anchor_mz(),
                        picked.len()
                    );
                    pool[seed_sample][seed_index] = Some(seed);
                    continue;
                }
                let mut members = vec![AlignedMember {
                    sample: ids[seed_sample],
                    envelope: seed,
                }];
                for (s, i) in picked {
                    if let Some(envelope) = pool[s][i].take() {
                        members.push(AlignedMember {
                            sample: ids[s],
                            envelope,
                        });
                    }
                }
                members.sort_by_key(|m| m.sample);
                groups.push(AlignedGroup::new(
                    members,
                    consensus.0,
                    consensus.1,
                    &self.fragments,
                ));
            }
        }
        info!(
            "Aligned {} groups across {n_samples} samples incrementally",
            groups.len()
        );
        Ok(groups)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::group::ChargeConsensus;
    use mzsling::adducts::annotate;
    use mzsling::{Adduct, AdductCache, AdductTable, Chromatogram, Fragment, IsobarParams, Peak};

    fn envelope(mz: f64, rt: f64, charge: i32, fragments: &[f64]) -> IsotopeEnvelope {
        let peaks = vec![Peak {
            scan_index: 0,
            point_index: 0,
            mz,
            intensity: 1000.0,
            retention_time: rt,
        }];
        let fragments = fragments
            .iter()
            .map(|f| Fragment::new(*f, 50.0, rt))
            .collect();
        let chromatogram = Chromatogram::from_peaks(peaks, 0, 20.0, 10.0, &IsobarParams::default())
            .unwrap()
            .with_fragments(fragments);
        IsotopeEnvelope::new(vec![chromatogram], 0, charge, 20.0).unwrap()
    }

    fn sample(sample: usize, envelopes: Vec<IsotopeEnvelope>) -> SampleFeatures {
        SampleFeatures {
            sample,
            envelopes,
            summary: Default::default(),
        }
    }

    /// Three samples agree near (0.5, 0.5) on the unit square, the fourth only
    /// contributes the corners and an outlier at (0.9, 0.9)
    fn scenario() -> Vec<SampleFeatures> {
        vec![
            sample(0, vec![envelope(500.0, 5.0, 1, &[199.998, 300.0])]),
            sample(1, vec![envelope(500.002, 5.01, 1, &[200.0])]),
            sample(2, vec![envelope(500.004, 5.02, 1, &[200.002])]),
            sample(
                3,
                vec![
                    envelope(100.0, 1.0, 1, &[]),
                    envelope(820.0, 8.2, 1, &[]),
                    envelope(900.0, 9.0, 1, &[]),
                ],
            ),
        ]
    }

    #[test_log::test]
    fn test_density_groups_supported_envelopes() {
        for aligner in [DensityAligner::new(0.005, Some(1)), DensityAligner::default()] {
            let groups = aligner.align(scenario()).unwrap();
            assert_eq!(groups.len(), 1);
            let group = &groups[0];
            assert_eq!(group.samples(), vec![0, 1, 2]);
            assert!((group.consensus_mz() - 500.002).abs() < 1e-6);
            assert!((group.consensus_rt() - 5.01).abs() < 1e-6);
            assert_eq!(group.consensus_charge().unwrap(), 1);
        }
    }

    #[test]
    fn test_fragments_in_consensus_frame() {
        let groups = DensityAligner::default().align(scenario()).unwrap();
        let clusters = groups[0].fragment_clusters();
        // The lone 300.0 fragment has no neighbour and is dropped as noise
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 3);
        assert_eq!(clusters[0].sample_count(), 3);
        assert!((clusters[0].mz - 200.0).abs() < 1e-6);
        assert!((clusters[0].retention_time - 5.01).abs() < 1e-6);
    }

    #[test]
    fn test_one_member_per_sample() {
        let samples = vec![
            sample(
                0,
                vec![
                    envelope(500.0, 5.0, 1, &[]),
                    envelope(500.003, 5.0, 1, &[]),
                    envelope(100.0, 1.0, 1, &[]),
                    envelope(900.0, 9.0, 1, &[]),
                ],
            ),
            sample(1, vec![envelope(500.001, 5.0, 1, &[])]),
        ];
        let groups = DensityAligner::new(0.005, Some(1)).align(samples).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].samples(), vec![0, 1]);
        let kept = groups[0].member_for(0).unwrap();
        assert!((kept.envelope.anchor_mz() - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_sample_cluster_is_unsupported() {
        let far = |s: usize| sample(s, vec![envelope(100.0 + 300.0 * s as f64, s as f64, 1, &[])]);
        let samples = vec![
            sample(
                0,
                vec![
                    envelope(500.0, 5.0, 1, &[]),
                    envelope(500.001, 5.0, 1, &[]),
                    envelope(500.002, 5.0, 1, &[]),
                ],
            ),
            far(1),
            far(2),
            far(3),
        ];
        let groups = DensityAligner::default().align(samples).unwrap();
        assert!(groups.is_empty());
    }

    #[test]
    fn test_ambiguous_charge_is_surfaced_and_skipped() {
        let samples = vec![
            sample(
                0,
                vec![
                    envelope(500.0, 5.0, 1, &[]),
                    envelope(100.0, 1.0, 1, &[]),
                    envelope(900.0, 9.0, 1, &[]),
                ],
            ),
            sample(1, vec![envelope(500.001, 5.001, 2, &[])]),
        ];
        let mut groups = DensityAligner::new(0.005, Some(1)).align(samples).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].charge(), &ChargeConsensus::Ambiguous(vec![1, 2]));
        assert!(matches!(
            groups[0].consensus_charge(),
            Err(AlignmentError::AmbiguousCharge { .. })
        ));

        let cache = AdductCache::new(AdductTable::new([Adduct {
            result_mz: 500.0005,
            ion_name: "[M+H]+".to_string(),
            formula: "C0".to_string(),
            compound_name: "x".to_string(),
            charge: 1,
        }]));
        let matched = annotate(&mut groups, &cache).unwrap();
        assert_eq!(matched, 0);
        assert!(groups[0].matches().is_empty());
    }

    #[test]
    fn test_no_envelopes() {
        let result = DensityAligner::default().align(vec![sample(0, vec![])]);
        assert_eq!(result, Err(AlignmentError::NoEnvelopes));
        let result = IncrementalAligner::default().align(Vec::new());
        assert_eq!(result, Err(AlignmentError::NoEnvelopes));
    }

    #[test_log::test]
    fn test_incremental_alignment() {
        let groups = IncrementalAligner::default().align(scenario()).unwrap();
        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.samples(), vec![0, 1, 2]);
        assert!((group.consensus_mz() - 500.002).abs() < 1e-6);
        assert!((group.consensus_rt() - 5.01).abs() < 1e-6);
        assert_eq!(group.fragment_clusters().len(), 1);
    }

    #[test]
    fn test_failed_seed_stays_available() {
        // 0 and 1 are too far apart to meet from either side, 2 lies between them
        let samples = vec![
            sample(0, vec![envelope(500.006, 5.0, 1, &[])]),
            sample(1, vec![envelope(500.0165, 5.0, 1, &[])]),
            sample(2, vec![envelope(500.008, 5.0, 1, &[])]),
        ];
        let groups = IncrementalAligner::new(20.0, 0.5, Some(2))
            .align(samples)
            .unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].samples(), vec![0, 1, 2]);
        assert!((groups[0].consensus_mz() - 500.008).abs() < 1e-6);
    }

    #[test]
    fn test_support_floor() {
        assert_eq!(support_floor(None, 5), 3);
        assert_eq!(support_floor(None, 1), 0);
        assert_eq!(support_floor(Some(1), 5), 1);
    }
}
