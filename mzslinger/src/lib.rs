mod adducts;
mod args;
mod driver;
mod progress;
mod reader;
mod time_range;
mod write;

pub use adducts::{load_adducts, read_adducts};
pub use args::AlignmentMethod;
pub use driver::{configure_log, MZSlinger, MZSlingerError};
pub use progress::ProgressRecord;
pub use reader::{read_run, read_scans};
pub use time_range::{TimeRange, TimeRangeParseError};
pub use write::{write_json, write_report, SampleLabel};
