//! Isotope envelope construction.
//!
//! An isotope envelope is a seed chromatogram plus the chromatograms of its heavier and
//! lighter isotopic siblings, spaced `NEUTRON_MASS / z` apart. The charge `z` is inferred
//! first by looking for any co-eluting neighbour at one of the candidate spacings, then
//! the envelope is extended one isotope at a time in each direction, accepting only
//! neighbours whose intensity traces correlate with the current frontier.
//!
//! [`EnvelopeBuilder`] only reads the chromatogram pool. It returns an [`EnvelopePlan`]
//! naming the chromatograms it wants, and the caller claims them and later moves them
//! into an [`IsotopeEnvelope`].
use std::ops::Range;

use mzpeaks::Tolerance;
use tracing::trace;

use crate::adducts::{Adduct, AdductTarget};
use crate::chromatogram::Chromatogram;
use crate::peaks::ConsumptionMask;
use crate::scan::Fragment;
use crate::stats::pearson;

/// The mass difference between consecutive isotopic peaks, in Daltons
pub const NEUTRON_MASS: f64 = 1.00866491588;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnvelopeParams {
    /// The mass accuracy used for charge inference and the adduct window
    pub ppm: f64,
    pub max_charge: i32,
    /// The largest seed time difference between a chromatogram and a charge witness
    pub charge_time_window: f64,
    /// The absolute m/z slack allowed around each isotopic spacing during extension
    pub isotope_mz_window: f64,
    /// Extension candidates must correlate with the frontier strictly above this
    pub min_correlation: f64,
}

impl Default for EnvelopeParams {
    fn default() -> Self {
        Self {
            ppm: 20.0,
            max_charge: 3,
            charge_time_window: 0.03,
            isotope_mz_window: 0.05,
            min_correlation: 0.8,
        }
    }
}

/// Pearson correlation of two chromatograms over the scans they share, zero when they
/// share fewer than two scans
pub fn correlate(a: &Chromatogram, b: &Chromatogram) -> f64 {
    let (xs, ys) = a.shared_intensities(b);
    pearson(&xs, &ys)
}

/// The chromatograms an envelope should own, lowest m/z first, with the seed's position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopePlan {
    pub members: Vec<usize>,
    pub anchor: usize,
    pub charge: i32,
}

impl EnvelopePlan {
    pub fn seed(&self) -> usize {
        self.members[self.anchor]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Below,
    Above,
}

impl Direction {
    fn sign(&self) -> f64 {
        match self {
            Self::Below => -1.0,
            Self::Above => 1.0,
        }
    }
}

/// Plans isotope envelopes over a fixed pool of chromatograms.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder<'a> {
    pool: &'a [Chromatogram],
    params: &'a EnvelopeParams,
    /// Pool indices sorted by mean m/z, ties by pool index
    by_mz: Vec<usize>,
}

impl<'a> EnvelopeBuilder<'a> {
    pub fn new(pool: &'a [Chromatogram], params: &'a EnvelopeParams) -> Self {
        let mut by_mz: Vec<usize> = (0..pool.len()).collect();
        by_mz.sort_by(|a, b| pool[*a].mean_mz().total_cmp(&pool[*b].mean_mz()));
        Self {
            pool,
            params,
            by_mz,
        }
    }

    pub fn pool(&self) -> &'a [Chromatogram] {
        self.pool
    }

    /// Pool indices of chromatograms whose mean m/z lies in `[low, high]`
    fn between(&self, low: f64, high: f64) -> impl Iterator<Item = usize> + '_ {
        let range = self.range_between(low, high);
        self.by_mz[range].iter().copied()
    }

    fn range_between(&self, low: f64, high: f64) -> Range<usize> {
        let start = self
            .by_mz
            .partition_point(|i| self.pool[*i].mean_mz() < low);
        let end = self
            .by_mz
            .partition_point(|i| self.pool[*i].mean_mz() <= high);
        start..end.max(start)
    }

    /// Pick the largest charge in `2..=max_charge` for which some other chromatogram
    /// sits one isotopic spacing away from the seed within the ppm tolerance and elutes
    /// within the charge time window. Defaults to 1.
    pub fn infer_charge(&self, seed: usize) -> i32 {
        let Some(chrom) = self.pool.get(seed) else {
            return 1;
        };
        let tolerance = Tolerance::PPM(self.params.ppm);
        for charge in (2..=self.params.max_charge).rev() {
            let spacing = NEUTRON_MASS / charge as f64;
            for expected in [chrom.mean_mz() - spacing, chrom.mean_mz() + spacing] {
                let (low, high) = tolerance.bounds(expected);
                let witness = self.between(low, high).find(|j| {
                    *j != seed
                        && (self.pool[*j].seed_time() - chrom.seed_time()).abs()
                            < self.params.charge_time_window
                });
                if let Some(j) = witness {
                    trace!(
                        "{:0.4} has a z={charge} witness at {:0.4}",
                        chrom.mean_mz(),
                        self.pool[j].mean_mz()
                    );
                    return charge;
                }
            }
        }
        1
    }

    /// Plan the envelope seeded by `seed`, skipping any chromatogram `clustered` marks.
    pub fn build(&self, seed: usize, clustered: &ConsumptionMask) -> EnvelopePlan {
        let charge = self.infer_charge(seed);
        let mut taken = vec![seed];
        let below = self.extend(seed, charge, Direction::Below, clustered, &mut taken);
        let above = self.extend(seed, charge, Direction::Above, clustered, &mut taken);

        let anchor = below.len();
        let mut members = Vec::with_capacity(below.len() + above.len() + 1);
        members.extend(below.into_iter().rev());
        members.push(seed);
        members.extend(above);
        EnvelopePlan {
            members,
            anchor,
            charge,
        }
    }

    fn extend(
        &self,
        seed: usize,
        charge: i32,
        direction: Direction,
        clustered: &ConsumptionMask,
        taken: &mut Vec<usize>,
    ) -> Vec<usize> {
        let spacing = NEUTRON_MASS / charge as f64;
        let window = self.params.isotope_mz_window;
        let mut accepted = Vec::new();
        let mut frontier = seed;
        loop {
            let front = &self.pool[frontier];
            let expected = front.mean_mz() + direction.sign() * spacing;
            let mut best: Option<(usize, f64)> = None;
            for j in self.between(expected - window, expected + window) {
                if clustered.is_consumed(j) || taken.contains(&j) {
                    continue;
                }
                let candidate = &self.pool[j];
                let delta = candidate.mean_mz() - front.mean_mz();
                if delta * direction.sign() <= 0.0 || (delta.abs() - spacing).abs() >= window {
                    continue;
                }
                if correlate(front, candidate) <= self.params.min_correlation {
                    continue;
                }
                let err = (candidate.mean_mz() - expected).abs();
                match best {
                    Some((k, e)) if err > e || (err == e && j > k) => {}
                    _ => best = Some((j, err)),
                }
            }
            match best {
                Some((j, _)) => {
                    taken.push(j);
                    accepted.push(j);
                    frontier = j;
                }
                None => break,
            }
        }
        accepted
    }
}

/// A group of chromatograms judged to be the isotopic peaks of one ion
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IsotopeEnvelope {
    chromatograms: Vec<Chromatogram>,
    anchor: usize,
    charge: i32,
    ppm: f64,
    matches: Vec<Adduct>,
}

impl IsotopeEnvelope {
    /// Returns `None` if `chromatograms` is empty or `anchor` is out of bounds
    pub fn new(chromatograms: Vec<Chromatogram>, anchor: usize, charge: i32, ppm: f64) -> Option<Self> {
        if anchor >= chromatograms.len() {
            return None;
        }
        Some(Self {
            chromatograms,
            anchor,
            charge,
            ppm,
            matches: Vec::new(),
        })
    }

    pub fn chromatograms(&self) -> &[Chromatogram] {
        &self.chromatograms
    }

    pub fn len(&self) -> usize {
        self.chromatograms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chromatograms.is_empty()
    }

    pub fn anchor_index(&self) -> usize {
        self.anchor
    }

    /// The seed (M+0 as far as this envelope knows) chromatogram
    pub fn anchor(&self) -> &Chromatogram {
        &self.chromatograms[self.anchor]
    }

    pub fn anchor_mz(&self) -> f64 {
        self.anchor().mean_mz()
    }

    pub fn anchor_time(&self) -> f64 {
        self.anchor().seed_time()
    }

    pub fn charge(&self) -> i32 {
        self.charge
    }

    pub fn ppm(&self) -> f64 {
        self.ppm
    }

    /// The m/z interval `anchor_mz * (1 ± ppm / 1e6)` used to look up adducts
    pub fn anchor_window(&self) -> (f64, f64) {
        Tolerance::PPM(self.ppm).bounds(self.anchor_mz())
    }

    pub fn set_matches(&mut self, matches: Vec<Adduct>) {
        self.matches = matches;
    }

    pub fn matches(&self) -> &[Adduct] {
        &self.matches
    }

    /// Every MS2 fragment attached to any member chromatogram
    pub fn fragments(&self) -> impl Iterator<Item = &Fragment> + '_ {
        self.chromatograms.iter().flat_map(|c| c.fragments().iter())
    }

    pub fn total_intensity(&self) -> f64 {
        self.chromatograms.iter().map(|c| c.total_intensity()).sum()
    }
}

impl AdductTarget for IsotopeEnvelope {
    fn adduct_charge(&self) -> Option<i32> {
        Some(self.charge)
    }

    fn anchor_window(&self) -> (f64, f64) {
        IsotopeEnvelope::anchor_window(self)
    }

    fn set_matches(&mut self, matches: Vec<Adduct>) {
        IsotopeEnvelope::set_matches(self, matches)
    }
}
