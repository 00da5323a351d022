//! Grouping of the MS2 fragments of an aligned group into characteristic fragment ions.
//!
//! Fragments are grouped twice. The fragments of each member envelope are first
//! clustered by m/z within that envelope, then the medians of those clusters are moved
//! into the group's consensus frame and clustered across members.
use mzsling::stats::median;
use mzsling::{Fragment, IsotopeEnvelope};
use tracing::trace;

use crate::dbscan::Dbscan;
use crate::group::AlignedMember;

/// The MS2 fragments of one envelope which share an m/z neighbourhood
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnvelopeFragmentCluster {
    /// The median fragment m/z
    pub mz: f64,
    /// The median fragment retention time
    pub retention_time: f64,
    pub fragments: Vec<Fragment>,
}

impl EnvelopeFragmentCluster {
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn total_intensity(&self) -> f64 {
        self.fragments.iter().map(|f| f.intensity).sum()
    }
}

/// A member's [`EnvelopeFragmentCluster`] moved into the group's consensus frame by
/// subtracting its sample's anchor offset from the consensus, on both axes
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AlignedFragment {
    pub sample: usize,
    pub mz: f64,
    pub retention_time: f64,
    pub cluster: EnvelopeFragmentCluster,
}

impl AlignedFragment {
    pub fn intensity(&self) -> f64 {
        self.cluster.total_intensity()
    }
}

/// Fragment clusters from one or more samples that share an m/z neighbourhood
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FragmentCluster {
    pub mz: f64,
    pub retention_time: f64,
    pub fragments: Vec<AlignedFragment>,
}

impl FragmentCluster {
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// The number of distinct samples contributing to this cluster
    pub fn sample_count(&self) -> usize {
        let mut samples: Vec<usize> = self.fragments.iter().map(|f| f.sample).collect();
        samples.sort_unstable();
        samples.dedup();
        samples.len()
    }

    pub fn total_intensity(&self) -> f64 {
        self.fragments.iter().map(|f| f.intensity()).sum()
    }
}

/// One-dimensional DBSCAN over fragment m/z, within an envelope and then across the
/// members of a group
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FragmentClusterer {
    /// Neighbourhood radius in m/z
    pub epsilon: f64,
    /// Neighbours required across members
    pub min_neighbors: usize,
    /// Neighbours required within one envelope. At 0 a fragment seen once is kept.
    pub envelope_min_neighbors: usize,
}

impl Default for FragmentClusterer {
    fn default() -> Self {
        Self {
            epsilon: 0.01,
            min_neighbors: 1,
            envelope_min_neighbors: 0,
        }
    }
}

/// Cluster `mzs` and return each cluster's indices with its median m/z and time
fn median_clusters(
    dbscan: Dbscan,
    mzs: &[f64],
    rts: &[f64],
) -> Vec<(Vec<usize>, f64, f64)> {
    let points: Vec<[f64; 2]> = mzs.iter().map(|mz| [*mz, 0.0]).collect();
    dbscan
        .cluster(&points)
        .into_iter()
        .filter_map(|members| {
            let cluster_mzs: Vec<f64> = members.iter().map(|i| mzs[*i]).collect();
            let cluster_rts: Vec<f64> = members.iter().map(|i| rts[*i]).collect();
            let mz = median(&cluster_mzs)?;
            let rt = median(&cluster_rts)?;
            Some((members, mz, rt))
        })
        .collect()
}

impl FragmentClusterer {
    pub fn new(epsilon: f64, min_neighbors: usize) -> Self {
        Self {
            epsilon,
            min_neighbors,
            ..Default::default()
        }
    }

    /// Cluster the fragments of a single envelope by m/z
    pub fn cluster_envelope(&self, envelope: &IsotopeEnvelope) -> Vec<EnvelopeFragmentCluster> {
        let fragments: Vec<Fragment> = envelope.fragments().copied().collect();
        let mzs: Vec<f64> = fragments.iter().map(|f| f.mz).collect();
        let rts: Vec<f64> = fragments.iter().map(|f| f.retention_time).collect();
        median_clusters(
            Dbscan::new(self.epsilon, self.envelope_min_neighbors),
            &mzs,
            &rts,
        )
        .into_iter()
        .map(|(members, mz, retention_time)| EnvelopeFragmentCluster {
            mz,
            retention_time,
            fragments: members.into_iter().map(|i| fragments[i]).collect(),
        })
        .collect()
    }

    /// Cluster each member's fragments, then shift the cluster medians into the
    /// consensus frame
    pub fn align_fragments(
        &self,
        members: &[AlignedMember],
        consensus_mz: f64,
        consensus_rt: f64,
    ) -> Vec<AlignedFragment> {
        members
            .iter()
            .flat_map(|m| {
                let mz_offset = m.envelope.anchor_mz() - consensus_mz;
                let rt_offset = m.envelope.anchor_time() - consensus_rt;
                self.cluster_envelope(&m.envelope)
                    .into_iter()
                    .map(move |cluster| AlignedFragment {
                        sample: m.sample,
                        mz: cluster.mz - mz_offset,
                        retention_time: cluster.retention_time - rt_offset,
                        cluster,
                    })
            })
            .collect()
    }

    /// Cluster aligned fragments by m/z, returning clusters in ascending m/z order
    pub fn cluster(&self, fragments: Vec<AlignedFragment>) -> Vec<FragmentCluster> {
        if fragments.is_empty() {
            return Vec::new();
        }
        let mzs: Vec<f64> = fragments.iter().map(|f| f.mz).collect();
        let rts: Vec<f64> = fragments.iter().map(|f| f.retention_time).collect();
        let groups = median_clusters(Dbscan::new(self.epsilon, self.min_neighbors), &mzs, &rts);

        let mut slots: Vec<Option<AlignedFragment>> = fragments.into_iter().map(Some).collect();
        let mut clusters: Vec<FragmentCluster> = groups
            .into_iter()
            .map(|(members, mz, retention_time)| FragmentCluster {
                mz,
                retention_time,
                fragments: members.into_iter().filter_map(|i| slots[i].take()).collect(),
            })
            .collect();
        clusters.sort_by(|a, b| a.mz.total_cmp(&b.mz));
        trace!("{} fragment clusters", clusters.len());
        clusters
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use mzsling::{Chromatogram, IsobarParams, Peak};

    fn aligned(sample: usize, mz: f64, rt: f64) -> AlignedFragment {
        AlignedFragment {
            sample,
            mz,
            retention_time: rt,
            cluster: EnvelopeFragmentCluster {
                mz,
                retention_time: rt,
                fragments: vec![Fragment::new(mz, 10.0, rt)],
            },
        }
    }

    fn envelope(mz: f64, rt: f64, fragments: &[(f64, f64)]) -> IsotopeEnvelope {
        let peaks = vec![Peak {
            scan_index: 0,
            point_index: 0,
            mz,
            intensity: 1000.0,
            retention_time: rt,
        }];
        let fragments = fragments
            .iter()
            .map(|(mz, rt)| Fragment::new(*mz, 20.0, *rt))
            .collect();
        let chromatogram = Chromatogram::from_peaks(peaks, 0, 20.0, 10.0, &IsobarParams::default())
            .unwrap()
            .with_fragments(fragments);
        IsotopeEnvelope::new(vec![chromatogram], 0, 1, 20.0).unwrap()
    }

    #[test]
    fn test_cluster_fragments() {
        let fragments = vec![
            aligned(0, 200.001, 1.0),
            aligned(1, 199.998, 1.2),
            aligned(2, 200.004, 1.1),
            aligned(0, 350.0, 1.0),
            aligned(1, 350.006, 1.05),
            aligned(2, 410.0, 1.0),
        ];
        let clusters = FragmentClusterer::default().cluster(fragments);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].len(), 3);
        assert!((clusters[0].mz - 200.001).abs() < 1e-9);
        assert!((clusters[0].retention_time - 1.1).abs() < 1e-9);
        assert_eq!(clusters[0].sample_count(), 3);
        assert!((clusters[1].mz - 350.003).abs() < 1e-9);
        assert!(FragmentClusterer::default().cluster(Vec::new()).is_empty());
    }

    #[test]
    fn test_cluster_within_envelope() {
        let env = envelope(
            500.0,
            5.0,
            &[(150.0, 4.9), (150.004, 5.1), (150.002, 5.0), (275.0, 5.0)],
        );
        let clusters = FragmentClusterer::default().cluster_envelope(&env);
        assert_eq!(clusters.len(), 2);
        let first = clusters.iter().find(|c| c.len() == 3).unwrap();
        assert!((first.mz - 150.002).abs() < 1e-9);
        assert!((first.retention_time - 5.0).abs() < 1e-9);
        assert!((first.total_intensity() - 60.0).abs() < 1e-9);
        // seen once in this envelope, still kept at this stage
        assert!(clusters.iter().any(|c| c.len() == 1 && c.mz == 275.0));

        let strict = FragmentClusterer {
            envelope_min_neighbors: 1,
            ..Default::default()
        };
        assert_eq!(strict.cluster_envelope(&env).len(), 1);
    }

    #[test]
    fn test_envelope_medians_are_aligned() {
        let members = vec![
            AlignedMember {
                sample: 0,
                envelope: envelope(500.0, 5.0, &[(150.0, 5.0), (150.002, 5.2)]),
            },
            AlignedMember {
                sample: 1,
                envelope: envelope(500.01, 5.5, &[(150.011, 5.5)]),
            },
        ];
        let clusterer = FragmentClusterer::default();
        let aligned = clusterer.align_fragments(&members, 500.005, 5.25);
        // one cluster per member, each carrying its own fragments
        assert_eq!(aligned.len(), 2);
        assert_eq!(aligned[0].cluster.len(), 2);
        assert!((aligned[0].mz - 150.006).abs() < 1e-9);
        assert!((aligned[0].retention_time - 5.35).abs() < 1e-9);
        assert!((aligned[1].mz - 150.006).abs() < 1e-9);
        assert!((aligned[1].retention_time - 5.25).abs() < 1e-9);

        let clusters = clusterer.cluster(aligned);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].sample_count(), 2);
        assert!((clusters[0].total_intensity() - 60.0).abs() < 1e-9);
    }
}
