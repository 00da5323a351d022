//! Matching isotope envelopes and aligned groups against a table of known adducts.
//!
//! Adduct tables are partitioned by charge and looked up through an [`AdductCache`] that
//! fetches each charge from its [`AdductSource`] at most once and then serves it
//! read-only to every worker thread.
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use rayon::prelude::*;
use tracing::{debug, trace};

use crate::error::SlingError;

/// One ionized form of a known compound, with its precomputed m/z
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Adduct {
    pub result_mz: f64,
    pub ion_name: String,
    pub formula: String,
    pub compound_name: String,
    pub charge: i32,
}

/// A provider of adducts by charge, sorted by ascending `result_mz`
pub trait AdductSource: Send + Sync {
    fn lookup(&self, charge: i32) -> Result<Vec<Adduct>, SlingError>;
}

/// An in-memory [`AdductSource`]
#[derive(Debug, Clone, Default)]
pub struct AdductTable {
    by_charge: HashMap<i32, Vec<Adduct>>,
}

impl AdductTable {
    pub fn new(adducts: impl IntoIterator<Item = Adduct>) -> Self {
        let mut by_charge: HashMap<i32, Vec<Adduct>> = HashMap::new();
        for adduct in adducts {
            by_charge.entry(adduct.charge).or_default().push(adduct);
        }
        for bin in by_charge.values_mut() {
            bin.sort_by(|a, b| a.result_mz.total_cmp(&b.result_mz));
        }
        Self { by_charge }
    }

    pub fn len(&self) -> usize {
        self.by_charge.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<Adduct> for AdductTable {
    fn from_iter<T: IntoIterator<Item = Adduct>>(iter: T) -> Self {
        Self::new(iter)
    }
}

impl AdductSource for AdductTable {
    fn lookup(&self, charge: i32) -> Result<Vec<Adduct>, SlingError> {
        Ok(self.by_charge.get(&charge).cloned().unwrap_or_default())
    }
}

/// A read-through cache over an [`AdductSource`], holding one immutable slice per charge.
///
/// Concurrent misses on the same charge may both query the source, but only the first
/// result is kept, so every caller sees the same slice afterwards.
#[derive(Debug)]
pub struct AdductCache<S: AdductSource> {
    source: S,
    entries: RwLock<HashMap<i32, Arc<[Adduct]>>>,
}

impl<S: AdductSource> AdductCache<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            entries: RwLock::default(),
        }
    }

    pub fn get(&self, charge: i32) -> Result<Arc<[Adduct]>, SlingError> {
        if let Some(hit) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&charge)
        {
            return Ok(hit.clone());
        }
        let fetched: Arc<[Adduct]> = self.source.lookup(charge)?.into();
        trace!("Loaded {} adducts for charge {charge}", fetched.len());
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(entries.entry(charge).or_insert(fetched).clone())
    }

    pub fn cached_charges(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// The adducts of a table sorted by `result_mz` whose m/z lies in `[low, high]`
pub fn matches_in_window(adducts: &[Adduct], low: f64, high: f64) -> &[Adduct] {
    let start = adducts.partition_point(|a| a.result_mz < low);
    let end = adducts.partition_point(|a| a.result_mz <= high);
    &adducts[start..end.max(start)]
}

/// Something that can be annotated with adduct matches
pub trait AdductTarget {
    /// The charge to look adducts up under, `None` to skip this target
    fn adduct_charge(&self) -> Option<i32>;
    fn anchor_window(&self) -> (f64, f64);
    fn set_matches(&mut self, matches: Vec<Adduct>);
}

/// Look up the adducts of every target in parallel, returning how many targets got at
/// least one match. Targets without a charge are left untouched.
pub fn annotate<T: AdductTarget + Send, S: AdductSource>(
    targets: &mut [T],
    cache: &AdductCache<S>,
) -> Result<usize, SlingError> {
    let matched = targets
        .par_iter_mut()
        .map(|target| -> Result<usize, SlingError> {
            let Some(charge) = target.adduct_charge() else {
                return Ok(0);
            };
            let table = cache.get(charge)?;
            let (low, high) = target.anchor_window();
            let hits = matches_in_window(&table, low, high).to_vec();
            let found = usize::from(!hits.is_empty());
            target.set_matches(hits);
            Ok(found)
        })
        .try_reduce(|| 0, |a, b| Ok(a + b))?;
    debug!("{matched} of {} targets matched an adduct", targets.len());
    Ok(matched)
}

/// [`annotate`] specialized to the isotope envelopes of one sample
pub fn annotate_envelopes<S: AdductSource>(
    envelopes: &mut [crate::envelope::IsotopeEnvelope],
    cache: &AdductCache<S>,
) -> Result<usize, SlingError> {
    annotate(envelopes, cache)
}
