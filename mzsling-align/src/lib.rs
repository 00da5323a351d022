//! Align isotope envelopes across samples and summarize their shared fragments.
//!
//! Envelopes from every sample are placed on a common `[0, 1] x [0, 1]` plane by
//! min-max rescaling their anchor m/z and retention time, then grouped by DBSCAN
//! ([`DensityAligner`]). An incremental nearest-neighbour strategy
//! ([`IncrementalAligner`]) sits behind the same [`AlignmentStrategy`] interface.
//! Each [`AlignedGroup`] carries a consensus m/z, time and charge, and the
//! [`FragmentCluster`]s of the MS2 fragments of its members.
mod aligner;
mod dbscan;
mod fragments;
mod group;
mod rescale;

pub use aligner::{AlignmentError, AlignmentStrategy, DensityAligner, IncrementalAligner};
pub use dbscan::Dbscan;
pub use fragments::{
    AlignedFragment, EnvelopeFragmentCluster, FragmentCluster, FragmentClusterer,
};
pub use group::{annotate_groups, AlignedGroup, AlignedMember, ChargeConsensus};
pub use rescale::Rescaler;
