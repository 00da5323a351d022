use mzpeaks::Tolerance;
use mzsling::adducts::{annotate, AdductTarget};
use mzsling::stats::modes;
use mzsling::{Adduct, AdductCache, AdductSource, IsotopeEnvelope, SlingError};
use tracing::warn;

use crate::aligner::AlignmentError;
use crate::fragments::{FragmentCluster, FragmentClusterer};

/// An isotope envelope and the sample it came from
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AlignedMember {
    pub sample: usize,
    pub envelope: IsotopeEnvelope,
}

/// The most common member charge of an aligned group
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChargeConsensus {
    Unique(i32),
    /// Several charges were equally common
    Ambiguous(Vec<i32>),
}

impl ChargeConsensus {
    pub fn from_charges(charges: &[i32]) -> Self {
        let mut found = modes(charges);
        if found.len() == 1 {
            Self::Unique(found[0])
        } else {
            found.sort_unstable();
            Self::Ambiguous(found)
        }
    }

    pub fn unique(&self) -> Option<i32> {
        match self {
            Self::Unique(z) => Some(*z),
            Self::Ambiguous(_) => None,
        }
    }
}

/// Isotope envelopes from different samples judged to be the same molecule
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AlignedGroup {
    members: Vec<AlignedMember>,
    consensus_mz: f64,
    consensus_rt: f64,
    charge: ChargeConsensus,
    fragment_clusters: Vec<FragmentCluster>,
    matches: Vec<Adduct>,
}

impl AlignedGroup {
    /// Build a group around an already computed consensus position, deriving the charge
    /// consensus and clustering the members' fragments.
    ///
    /// `members` should hold at most one envelope per sample.
    pub fn new(
        members: Vec<AlignedMember>,
        consensus_mz: f64,
        consensus_rt: f64,
        fragments: &FragmentClusterer,
    ) -> Self {
        let charges: Vec<i32> = members.iter().map(|m| m.envelope.charge()).collect();
        let charge = ChargeConsensus::from_charges(&charges);
        if let ChargeConsensus::Ambiguous(found) = &charge {
            warn!(
                "Aligned group at m/z {consensus_mz:0.4}, time {consensus_rt:0.3} has no unique charge: {found:?}"
            );
        }
        let fragment_clusters =
            fragments.cluster(fragments.align_fragments(&members, consensus_mz, consensus_rt));
        Self {
            members,
            consensus_mz,
            consensus_rt,
            charge,
            fragment_clusters,
            matches: Vec::new(),
        }
    }

    pub fn members(&self) -> &[AlignedMember] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The sample numbers of the members, ascending
    pub fn samples(&self) -> Vec<usize> {
        let mut samples: Vec<usize> = self.members.iter().map(|m| m.sample).collect();
        samples.sort_unstable();
        samples
    }

    pub fn member_for(&self, sample: usize) -> Option<&AlignedMember> {
        self.members.iter().find(|m| m.sample == sample)
    }

    pub fn consensus_mz(&self) -> f64 {
        self.consensus_mz
    }

    pub fn consensus_rt(&self) -> f64 {
        self.consensus_rt
    }

    pub fn charge(&self) -> &ChargeConsensus {
        &self.charge
    }

    pub fn consensus_charge(&self) -> Result<i32, AlignmentError> {
        match &self.charge {
            ChargeConsensus::Unique(z) => Ok(*z),
            ChargeConsensus::Ambiguous(found) => Err(AlignmentError::AmbiguousCharge {
                mz: self.consensus_mz,
                time: self.consensus_rt,
                modes: found.clone(),
            }),
        }
    }

    pub fn fragment_clusters(&self) -> &[FragmentCluster] {
        &self.fragment_clusters
    }

    /// The widest member tolerance, applied around the consensus m/z
    pub fn anchor_window(&self) -> (f64, f64) {
        let ppm = self
            .members
            .iter()
            .map(|m| m.envelope.ppm())
            .fold(0.0, f64::max);
        Tolerance::PPM(ppm).bounds(self.consensus_mz)
    }

    pub fn set_matches(&mut self, matches: Vec<Adduct>) {
        self.matches = matches;
    }

    pub fn matches(&self) -> &[Adduct] {
        &self.matches
    }

    pub fn into_members(self) -> Vec<AlignedMember> {
        self.members
    }
}

impl AdductTarget for AlignedGroup {
    fn adduct_charge(&self) -> Option<i32> {
        self.charge.unique()
    }

    fn anchor_window(&self) -> (f64, f64) {
        AlignedGroup::anchor_window(self)
    }

    fn set_matches(&mut self, matches: Vec<Adduct>) {
        AlignedGroup::set_matches(self, matches)
    }
}

/// Match every group with a unique consensus charge against the adduct cache. Groups
/// with an ambiguous charge are left without matches.
pub fn annotate_groups<S: AdductSource>(
    groups: &mut [AlignedGroup],
    cache: &AdductCache<S>,
) -> Result<usize, SlingError> {
    annotate(groups, cache)
}
