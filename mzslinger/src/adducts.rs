use std::io;
use std::path::Path;

use mzsling::{Adduct, AdductTable};
use tracing::info;

use crate::driver::MZSlingerError;

/// Read adducts from CSV with the header
/// `result_mz,ion_name,formula,compound_name,charge`
pub fn read_adducts<R: io::Read>(source: R) -> Result<AdductTable, MZSlingerError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(source);
    let adducts = reader
        .deserialize::<Adduct>()
        .collect::<Result<Vec<_>, _>>()?;
    Ok(AdductTable::new(adducts))
}

pub fn load_adducts(path: &Path) -> Result<AdductTable, MZSlingerError> {
    let table = read_adducts(io::BufReader::new(std::fs::File::open(path)?))?;
    info!("Loaded {} adducts from {}", table.len(), path.display());
    Ok(table)
}
