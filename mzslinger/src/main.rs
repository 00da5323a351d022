use clap::Parser;
use tracing::error;

use mzslinger::{configure_log, MZSlinger, MZSlingerError};

fn main() -> Result<(), MZSlingerError> {
    let args = MZSlinger::parse().configure()?;
    let _guard = configure_log(args.log_file.as_deref())?;
    if let Err(e) = args.main() {
        error!("{e}");
        return Err(e);
    }
    Ok(())
}
